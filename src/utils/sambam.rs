// src/utils/sambam.rs: alignment datasets and `samtools stats` summary parsing

use std::fmt;
use std::path::PathBuf;

use crate::config::defs::PipelineError;
use crate::utils::stats::round2;

const READS_MAPPED_KEY: &str = "reads mapped:";
const BASES_MAPPED_KEY: &str = "bases mapped (cigar):";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappingStats {
    pub reads_mapped: u64,
    pub bases_mapped: u64,
    /// bases_mapped / reference length, 2 decimals.
    pub coverage: f64,
}

impl fmt::Display for MappingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reads mapped, {} bases mapped, {:.2}x coverage",
            self.reads_mapped, self.bases_mapped, self.coverage
        )
    }
}

/// One BAM file and the samples it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentDataset {
    pub path: PathBuf,
    pub samples: Vec<String>,
    pub stats: MappingStats,
}

/// Pulls the mapped read and base counts out of `samtools stats` text.
///
/// # Arguments
///
/// * `text` - Full stdout of `samtools stats`.
/// * `reference_length` - Total reference length used for the coverage ratio.
///
/// # Returns
/// MappingStats, or InvalidData if a summary line is missing or unparsable.
pub fn parse_samtools_stats(text: &str, reference_length: u64) -> Result<MappingStats, PipelineError> {
    let reads_mapped = summary_number(text, READS_MAPPED_KEY)?;
    let bases_mapped = summary_number(text, BASES_MAPPED_KEY)?;
    if reference_length == 0 {
        return Err(PipelineError::InvalidData("reference length is zero".to_string()));
    }
    Ok(MappingStats {
        reads_mapped,
        bases_mapped,
        coverage: round2(bases_mapped as f64 / reference_length as f64),
    })
}

// Summary lines look like `SN\treads mapped:\t1234\t# comment`.
fn summary_number(text: &str, key: &str) -> Result<u64, PipelineError> {
    let line = text
        .lines()
        .filter_map(|l| l.strip_prefix("SN\t"))
        .find(|l| l.starts_with(key))
        .ok_or_else(|| PipelineError::InvalidData(format!("samtools stats output has no '{}' line", key)))?;
    let value = line[key.len()..]
        .trim_start()
        .split(['\t', ' '])
        .next()
        .unwrap_or("");
    value.parse::<u64>().map_err(|e| {
        PipelineError::InvalidData(format!("invalid '{}' value '{}': {}", key, value, e))
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    const STATS: &str = "# This file was produced by samtools stats\n\
SN\traw total sequences:\t2000\n\
SN\treads mapped:\t1500\n\
SN\treads mapped and paired:\t1400\t# paired-end technology bit set + both mates mapped\n\
SN\tbases mapped:\t151000\t# ignores clipping\n\
SN\tbases mapped (cigar):\t150000\t# more accurate\n\
RL\t100\t2000\n";

    #[test]
    fn test_parse_samtools_stats() {
        let stats = parse_samtools_stats(STATS, 1000).unwrap();
        assert_eq!(stats.reads_mapped, 1500);
        assert_eq!(stats.bases_mapped, 150000);
        assert_eq!(stats.coverage, 150.0);
    }

    #[test]
    fn test_coverage_rounding() {
        let stats = parse_samtools_stats(STATS, 7).unwrap();
        // 150000 / 7 = 21428.571..
        assert_eq!(stats.coverage, 21428.57);
        assert_eq!(stats.to_string(), "1500 reads mapped, 150000 bases mapped, 21428.57x coverage");
    }

    #[test]
    fn test_missing_lines() {
        let err = parse_samtools_stats("SN\treads mapped:\t10\n", 100).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidData(_)));
        let err = parse_samtools_stats("", 100).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidData(_)));
        let err = parse_samtools_stats("SN\treads mapped:\tmany\nSN\tbases mapped (cigar):\t1\n", 100)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidData(_)));
    }

    #[test]
    fn test_zero_reference_length() {
        assert!(parse_samtools_stats(STATS, 0).is_err());
    }
}
