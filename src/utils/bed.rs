// src/utils/bed.rs: bedgraph coverage profiles and zero-coverage gap sets

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::defs::PipelineError;
use crate::utils::fastx::ContigInfo;
use crate::utils::stats::round2;

/// Half-open interval `[start, end)` on one contig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub contig: String,
    pub start: u64,
    pub end: u64,
}

impl Interval {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageInterval {
    pub interval: Interval,
    pub depth: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageSummary {
    pub min_depth: u64,
    pub max_depth: u64,
    /// Length-weighted mean, rounded to 2 decimals.
    pub mean_depth: f64,
}

/// Run-length depth intervals covering the reference.
#[derive(Debug, Clone, Default)]
pub struct CoverageProfile {
    pub intervals: Vec<CoverageInterval>,
}

impl CoverageProfile {
    /// Parses `contig<TAB>start<TAB>end<TAB>depth` lines; blank, `track` and `#` lines are skipped.
    pub fn from_bedgraph<R: BufRead>(reader: R) -> Result<Self, PipelineError> {
        let mut intervals = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("track") {
                continue;
            }
            let fields: Vec<&str> = trimmed.split('\t').collect();
            if fields.len() < 4 {
                return Err(PipelineError::InvalidData(format!(
                    "bedgraph line {}: expected 4 fields, found {}: '{}'",
                    line_no + 1,
                    fields.len(),
                    trimmed
                )));
            }
            let parse = |value: &str, what: &str| -> Result<u64, PipelineError> {
                value.parse::<u64>().map_err(|e| {
                    PipelineError::InvalidData(format!(
                        "bedgraph line {}: invalid {} '{}': {}",
                        line_no + 1,
                        what,
                        value,
                        e
                    ))
                })
            };
            let start = parse(fields[1], "start")?;
            let end = parse(fields[2], "end")?;
            let depth = parse(fields[3], "depth")?;
            if end <= start {
                return Err(PipelineError::InvalidData(format!(
                    "bedgraph line {}: empty interval {}-{}",
                    line_no + 1,
                    start,
                    end
                )));
            }
            intervals.push(CoverageInterval {
                interval: Interval { contig: fields[0].to_string(), start, end },
                depth,
            });
        }
        Ok(CoverageProfile { intervals })
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        Self::from_bedgraph(BufReader::new(File::open(path)?))
    }

    pub fn total_length(&self) -> u64 {
        self.intervals.iter().map(|c| c.interval.len()).sum()
    }

    /// Checks that the intervals partition every contig exactly: per contig they are
    /// sorted, start at 0, abut each other and end at the contig length.
    ///
    /// # Arguments
    ///
    /// * `contigs` - Reference contigs with their lengths.
    ///
    /// # Returns
    /// Ok, or InvalidData describing the first violation.
    pub fn validate(&self, contigs: &[ContigInfo]) -> Result<(), PipelineError> {
        let lengths: HashMap<&str, u64> = contigs.iter().map(|c| (c.name.as_str(), c.length)).collect();
        let mut covered_to: HashMap<&str, u64> = HashMap::new();

        for cov in &self.intervals {
            let contig = cov.interval.contig.as_str();
            let contig_len = *lengths.get(contig).ok_or_else(|| {
                PipelineError::InvalidData(format!("coverage reported for unknown contig '{}'", contig))
            })?;
            let expected_start = covered_to.get(contig).copied().unwrap_or(0);
            if cov.interval.start != expected_start {
                return Err(PipelineError::InvalidData(format!(
                    "coverage on '{}' jumps from {} to {}",
                    contig, expected_start, cov.interval.start
                )));
            }
            if cov.interval.end > contig_len {
                return Err(PipelineError::InvalidData(format!(
                    "coverage on '{}' ends at {}, past contig length {}",
                    contig, cov.interval.end, contig_len
                )));
            }
            covered_to.insert(contig, cov.interval.end);
        }

        for contig in contigs {
            let end = covered_to.get(contig.name.as_str()).copied().unwrap_or(0);
            if end != contig.length {
                return Err(PipelineError::InvalidData(format!(
                    "coverage on '{}' covers {} of {} bases",
                    contig.name, end, contig.length
                )));
            }
        }
        Ok(())
    }

    /// Min, max and length-weighted mean depth; None for an empty profile.
    pub fn summary(&self) -> Option<CoverageSummary> {
        let min_depth = self.intervals.iter().map(|c| c.depth).min()?;
        let max_depth = self.intervals.iter().map(|c| c.depth).max()?;
        let total_length = self.total_length();
        if total_length == 0 {
            return None;
        }
        let weighted: f64 = self
            .intervals
            .iter()
            .map(|c| c.interval.len() as f64 * c.depth as f64)
            .sum();
        Some(CoverageSummary {
            min_depth,
            max_depth,
            mean_depth: round2(weighted / total_length as f64),
        })
    }

    /// All zero-depth intervals, with touching intervals on the same contig merged.
    pub fn gaps(&self) -> GapSet {
        let mut intervals: Vec<Interval> = Vec::new();
        for cov in self.intervals.iter().filter(|c| c.depth == 0) {
            match intervals.last_mut() {
                Some(prev) if prev.contig == cov.interval.contig && prev.end == cov.interval.start => {
                    prev.end = cov.interval.end;
                }
                _ => intervals.push(cov.interval.clone()),
            }
        }
        GapSet { intervals }
    }
}


/// Zero-coverage intervals, masked with N in the consensus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GapSet {
    pub intervals: Vec<Interval>,
}

impl GapSet {
    pub fn count(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn total_length(&self) -> u64 {
        self.intervals.iter().map(Interval::len).sum()
    }

    /// Writes BED3 lines.
    pub fn write_bed(&self, path: &Path) -> Result<(), PipelineError> {
        let mut writer = BufWriter::new(File::create(path)?);
        for gap in &self.intervals {
            writeln!(writer, "{}\t{}\t{}", gap.contig, gap.start, gap.end)?;
        }
        writer.flush()?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn contig(name: &str, length: u64) -> ContigInfo {
        ContigInfo { name: name.to_string(), length }
    }

    fn profile(text: &str) -> CoverageProfile {
        CoverageProfile::from_bedgraph(Cursor::new(text)).unwrap()
    }

    #[test]
    fn test_uniform_depth() {
        let p = profile("cp\t0\t1000\t37\n");
        p.validate(&[contig("cp", 1000)]).unwrap();
        let summary = p.summary().unwrap();
        assert_eq!(summary.min_depth, 37);
        assert_eq!(summary.max_depth, 37);
        assert_eq!(summary.mean_depth, 37.0);
        assert!(p.gaps().is_empty());
    }

    #[test]
    fn test_weighted_mean_and_gaps() {
        let p = profile("cp\t0\t100\t0\ncp\t100\t400\t10\ncp\t400\t450\t0\ncp\t450\t1000\t3\n");
        p.validate(&[contig("cp", 1000)]).unwrap();
        assert_eq!(p.total_length(), 1000);

        let summary = p.summary().unwrap();
        assert_eq!(summary.min_depth, 0);
        assert_eq!(summary.max_depth, 10);
        // (300*10 + 550*3) / 1000
        assert_eq!(summary.mean_depth, 4.65);

        let gaps = p.gaps();
        assert_eq!(gaps.count(), 2);
        assert_eq!(gaps.total_length(), 150);
        assert!(gaps.total_length() <= 1000);
        for pair in gaps.intervals.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn test_mean_is_rounded() {
        let p = profile("cp\t0\t1\t1\ncp\t1\t3\t2\n");
        // 5 / 3 = 1.666..
        assert_eq!(p.summary().unwrap().mean_depth, 1.67);
    }

    #[test]
    fn test_touching_gaps_are_merged() {
        let p = profile("cp\t0\t5\t0\ncp\t5\t9\t0\ncp\t9\t10\t1\n");
        assert_eq!(
            p.gaps().intervals,
            vec![Interval { contig: "cp".to_string(), start: 0, end: 9 }]
        );
    }

    #[test]
    fn test_partition_violations() {
        let contigs = [contig("cp", 100)];
        assert!(profile("cp\t0\t50\t1\ncp\t60\t100\t1\n").validate(&contigs).is_err());
        assert!(profile("cp\t0\t60\t1\ncp\t50\t100\t1\n").validate(&contigs).is_err());
        assert!(profile("cp\t0\t90\t1\n").validate(&contigs).is_err());
        assert!(profile("cp\t0\t120\t1\n").validate(&contigs).is_err());
        assert!(profile("other\t0\t100\t1\n").validate(&contigs).is_err());
        assert!(profile("").validate(&contigs).is_err());
    }

    #[test]
    fn test_multi_contig_partition() {
        let p = profile("a\t0\t10\t2\nb\t0\t5\t0\na\t10\t20\t4\n");
        p.validate(&[contig("a", 20), contig("b", 5)]).unwrap();
        assert_eq!(p.gaps().total_length(), 5);
    }

    #[test]
    fn test_malformed_lines() {
        assert!(CoverageProfile::from_bedgraph(Cursor::new("cp\t0\t10\n")).is_err());
        assert!(CoverageProfile::from_bedgraph(Cursor::new("cp\t0\tx\t1\n")).is_err());
        assert!(CoverageProfile::from_bedgraph(Cursor::new("cp\t10\t10\t1\n")).is_err());
        let p = profile("track type=bedGraph\n# comment\n\ncp\t0\t10\t1\n");
        assert_eq!(p.intervals.len(), 1);
    }

    #[test]
    fn test_write_bed() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("gaps.bed");
        profile("cp\t0\t5\t0\ncp\t5\t10\t4\ncp\t10\t12\t0\n").gaps().write_bed(&path)?;
        assert_eq!(std::fs::read_to_string(path)?, "cp\t0\t5\ncp\t10\t12\n");
        Ok(())
    }
}
