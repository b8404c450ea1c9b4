// src/utils/vcf.rs: VCF records, INFO parsing, homozygosity filter and type histograms

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::defs::{HOMOZYGOUS_MIN_AF, PipelineError, UNCLASSIFIED_VARIANT};

const MIN_VCF_FIELDS: usize = 8;
const INFO_COLUMN: usize = 7;

/// Parsed INFO column. Bare keys are flags and map to None.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoField {
    entries: HashMap<String, Option<String>>,
}

impl InfoField {
    pub fn parse(raw: &str) -> Self {
        let mut entries = HashMap::new();
        if raw == "." {
            return InfoField { entries };
        }
        for item in raw.split(';').filter(|s| !s.is_empty()) {
            match item.split_once('=') {
                Some((key, value)) => entries.insert(key.to_string(), Some(value.to_string())),
                None => entries.insert(item.to_string(), None),
            };
        }
        InfoField { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|v| v.as_deref())
    }

    pub fn has_flag(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

/// One VCF data line. The raw text is kept so filtered output is byte-identical.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantCall {
    pub line: String,
    pub chrom: String,
    pub pos: u64,
    pub ref_allele: String,
    pub alt_alleles: Vec<String>,
    pub info: InfoField,
}

impl VariantCall {
    pub fn parse(line: &str) -> Result<Self, PipelineError> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < MIN_VCF_FIELDS {
            return Err(PipelineError::InvalidData(format!(
                "Invalid VCF line format: expected at least {} fields, found {} in line: '{}'",
                MIN_VCF_FIELDS,
                fields.len(),
                line
            )));
        }
        let pos = fields[1].parse::<u64>().map_err(|e| {
            PipelineError::InvalidData(format!("invalid VCF position '{}': {}", fields[1], e))
        })?;
        Ok(VariantCall {
            line: line.to_string(),
            chrom: fields[0].to_string(),
            pos,
            ref_allele: fields[3].to_string(),
            alt_alleles: fields[4].split(',').map(str::to_string).collect(),
            info: InfoField::parse(fields[INFO_COLUMN]),
        })
    }

    /// The TYPE annotation, or the `unclassified` bucket when absent.
    pub fn variant_type(&self) -> &str {
        match self.info.get("TYPE") {
            Some(t) if !t.is_empty() => t,
            _ => UNCLASSIFIED_VARIANT,
        }
    }

    /// Largest numeric AF value; None when AF is missing or nothing parses.
    pub fn confidence(&self) -> Option<f64> {
        self.info
            .get("AF")?
            .split(',')
            .filter_map(|v| v.trim().parse::<f64>().ok())
            .filter(|v| !v.is_nan())
            .reduce(f64::max)
    }

    pub fn is_homozygous(&self) -> bool {
        self.confidence().is_some_and(|af| af >= HOMOZYGOUS_MIN_AF)
    }

    /// True when REF and ALT lengths differ, so applying it shifts coordinates.
    pub fn is_indel(&self) -> bool {
        let allele_lens: HashSet<usize> = std::iter::once(self.ref_allele.len())
            .chain(
                self.alt_alleles
                    .iter()
                    .filter(|a| a.as_str() != "." && a.as_str() != "*")
                    .map(|a| a.len()),
            )
            .collect();
        allele_lens.len() > 1
    }
}


/// Variant counts per TYPE, reported by descending count then name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeHistogram {
    counts: BTreeMap<String, u64>,
}

impl TypeHistogram {
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn count(&self, variant_type: &str) -> u64 {
        self.counts.get(variant_type).copied().unwrap_or(0)
    }

    pub fn sorted(&self) -> Vec<(&str, u64)> {
        let mut entries: Vec<(&str, u64)> = self.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
    }
}

impl fmt::Display for TypeHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.counts.is_empty() {
            return write!(f, "none");
        }
        let parts: Vec<String> = self.sorted().iter().map(|(t, n)| format!("{}: {}", t, n)).collect();
        write!(f, "{}", parts.join(", "))
    }
}


#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantSet {
    pub header: Vec<String>,
    pub records: Vec<VariantCall>,
}

impl VariantSet {
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, PipelineError> {
        let mut set = VariantSet::default();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.trim().is_empty() {
                continue;
            }
            if trimmed.starts_with('#') {
                set.header.push(trimmed.to_string());
            } else {
                set.records.push(VariantCall::parse(trimmed)?);
            }
        }
        Ok(set)
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        let mut writer = BufWriter::new(File::create(path)?);
        for line in &self.header {
            writeln!(writer, "{}", line)?;
        }
        for record in &self.records {
            writeln!(writer, "{}", record.line)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keeps records with confidence >= 1.0, in input order, under the same header.
    pub fn filter_homozygous(&self) -> VariantSet {
        VariantSet {
            header: self.header.clone(),
            records: self.records.iter().filter(|r| r.is_homozygous()).cloned().collect(),
        }
    }

    pub fn type_histogram(&self) -> TypeHistogram {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.variant_type().to_string()).or_insert(0) += 1;
        }
        TypeHistogram { counts }
    }

    pub fn has_indels(&self) -> bool {
        self.records.iter().any(VariantCall::is_indel)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    const VCF: &str = "##fileformat=VCFv4.2\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
cp\t10\t.\tA\tG\t50\t.\tAF=1;TYPE=snp\n\
cp\t20\t.\tA\tC\t40\t.\tAF=0.5;TYPE=snp\n\
cp\t30\t.\tAT\tA\t60\t.\tAF=0.5,1;TYPE=del\n\
cp\t40\t.\tAC\tGT\t60\t.\tAF=1;TYPE=mnp\n\
cp\t50\t.\tC\tT\t10\t.\tDP=3\n\
cp\t60\t.\tG\tA\t10\t.\tAF=x;TYPE=snp;INDEL\n";

    fn set() -> VariantSet {
        VariantSet::from_reader(Cursor::new(VCF)).unwrap()
    }

    #[test]
    fn test_info_parsing() {
        let info = InfoField::parse("AF=0.5,1;TYPE=del;INDEL;DP=7");
        assert_eq!(info.get("TYPE"), Some("del"));
        assert_eq!(info.get("DP"), Some("7"));
        assert!(info.has_flag("INDEL"));
        assert_eq!(info.get("INDEL"), None);
        assert!(!info.has_flag("MQ"));
        assert_eq!(InfoField::parse("."), InfoField::default());
    }

    #[test]
    fn test_confidence() {
        let s = set();
        assert_eq!(s.records[0].confidence(), Some(1.0));
        assert_eq!(s.records[2].confidence(), Some(1.0));
        assert_eq!(s.records[4].confidence(), None);
        assert_eq!(s.records[5].confidence(), None);
    }

    #[test]
    fn test_filter_homozygous() {
        let raw = set();
        let filtered = raw.filter_homozygous();
        let positions: Vec<u64> = filtered.records.iter().map(|r| r.pos).collect();
        assert_eq!(positions, vec![10, 30, 40]);
        assert_eq!(filtered.header, raw.header);
        for record in &filtered.records {
            assert!(raw.records.contains(record));
            assert!(record.confidence().unwrap() >= 1.0);
        }
    }

    #[test]
    fn test_type_histogram() {
        let hist = set().type_histogram();
        assert_eq!(hist.total(), 6);
        assert_eq!(hist.count("snp"), 3);
        assert_eq!(hist.count(UNCLASSIFIED_VARIANT), 1);
        assert_eq!(
            hist.sorted(),
            vec![("snp", 3), ("del", 1), ("mnp", 1), ("unclassified", 1)]
        );
        assert_eq!(hist.to_string(), "snp: 3, del: 1, mnp: 1, unclassified: 1");
        assert_eq!(TypeHistogram::default().to_string(), "none");
    }

    #[test]
    fn test_indels() {
        let s = set();
        assert!(!s.records[0].is_indel());
        assert!(s.records[2].is_indel());
        assert!(!s.records[3].is_indel());
        assert!(s.has_indels());
        assert!(!VariantSet { header: vec![], records: vec![s.records[0].clone()] }.has_indels());
    }

    #[test]
    fn test_short_line_rejected() {
        let err = VariantSet::from_reader(Cursor::new("cp\t1\t.\tA\tG\n")).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidData(_)));
    }

    #[test]
    fn test_write_preserves_lines() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("filtered.vcf");
        let filtered = set().filter_homozygous();
        filtered.write(&path)?;
        let text = std::fs::read_to_string(&path)?;
        assert!(text.starts_with("##fileformat=VCFv4.2\n#CHROM"));
        assert!(text.contains("cp\t30\t.\tAT\tA\t60\t.\tAF=0.5,1;TYPE=del\n"));
        assert_eq!(VariantSet::from_file(&path)?, filtered);

        let empty = VariantSet { header: filtered.header.clone(), records: vec![] };
        empty.write(&path)?;
        assert!(VariantSet::from_file(&path)?.is_empty());
        Ok(())
    }
}
