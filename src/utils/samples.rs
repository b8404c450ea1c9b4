// src/utils/samples.rs: classification of raw read inputs into samples

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::defs::PipelineError;
use crate::utils::file::extension_remover;

/// Read-pair markers trimmed from the end of an R1 file stem, checked in order.
const R1_MARKERS: &[&str] = &["_1", "_R1", "_F"];

#[derive(Debug, Clone, PartialEq)]
pub enum SampleKind {
    PairedFastq { r1: PathBuf, r2: PathBuf },
    SingleFastq { path: PathBuf },
    SraAccession { accession: String },
}

/// One logical read source, named by `output_basename` everywhere downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub kind: SampleKind,
    pub output_basename: String,
}

impl Sample {
    pub fn paired(r1: PathBuf, r2: PathBuf) -> Self {
        let output_basename = fastq_basename(&r1, true);
        Sample { kind: SampleKind::PairedFastq { r1, r2 }, output_basename }
    }

    pub fn single(path: PathBuf) -> Self {
        let output_basename = fastq_basename(&path, false);
        Sample { kind: SampleKind::SingleFastq { path }, output_basename }
    }

    pub fn accession(accession: &str) -> Self {
        Sample {
            kind: SampleKind::SraAccession { accession: accession.to_string() },
            output_basename: accession.to_string(),
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self.kind, SampleKind::PairedFastq { .. })
    }

    pub fn accession_id(&self) -> Option<&str> {
        match &self.kind {
            SampleKind::SraAccession { accession } => Some(accession),
            _ => None,
        }
    }

    /// Fails with InvalidInput if any FASTQ file of this sample is missing.
    pub fn check_exists(&self) -> Result<(), PipelineError> {
        let paths: Vec<&PathBuf> = match &self.kind {
            SampleKind::PairedFastq { r1, r2 } => vec![r1, r2],
            SampleKind::SingleFastq { path } => vec![path],
            SampleKind::SraAccession { .. } => vec![],
        };
        for path in paths {
            if !path.is_file() {
                return Err(PipelineError::InvalidInput(format!(
                    "FASTQ file {} does not exist",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SampleKind::PairedFastq { r1, r2 } => {
                write!(f, "{} (paired: {}, {})", self.output_basename, r1.display(), r2.display())
            }
            SampleKind::SingleFastq { path } => {
                write!(f, "{} (single: {})", self.output_basename, path.display())
            }
            SampleKind::SraAccession { accession } => write!(f, "{} (SRA accession)", accession),
        }
    }
}


/// Turns the raw read or accession tokens into an ordered sample list.
///
/// # Arguments
///
/// * `read_tokens` - FASTQ tokens, `{r1}{r2}` for pairs.
/// * `accession_tokens` - SRA accession identifiers.
///
/// # Returns
/// Samples in input order, or InputConflict / MissingInput / InvalidInput.
/// Two samples resolving to the same output basename are InvalidInput.
pub fn resolve_samples(
    read_tokens: &[String],
    accession_tokens: &[String],
) -> Result<Vec<Sample>, PipelineError> {
    let samples = classify_tokens(read_tokens, accession_tokens)?;
    check_unique_basenames(&samples)?;
    Ok(samples)
}

fn classify_tokens(
    read_tokens: &[String],
    accession_tokens: &[String],
) -> Result<Vec<Sample>, PipelineError> {
    match (read_tokens.is_empty(), accession_tokens.is_empty()) {
        (false, false) => Err(PipelineError::InputConflict(
            "FASTQ reads and SRA accessions cannot be combined; supply one or the other".to_string(),
        )),
        (true, true) => Err(PipelineError::MissingInput(
            "no FASTQ reads or SRA accessions were supplied".to_string(),
        )),
        (false, true) => read_tokens.iter().map(|t| classify_read_token(t)).collect(),
        (true, false) => accession_tokens
            .iter()
            .map(|token| {
                let accession = token.trim();
                if accession.is_empty() {
                    Err(PipelineError::InvalidInput("empty accession identifier".to_string()))
                } else {
                    Ok(Sample::accession(accession))
                }
            })
            .collect(),
    }
}

// Per-sample outputs are keyed by basename.
fn check_unique_basenames(samples: &[Sample]) -> Result<(), PipelineError> {
    let mut seen: HashMap<&str, &Sample> = HashMap::new();
    for sample in samples {
        if let Some(first) = seen.insert(sample.output_basename.as_str(), sample) {
            return Err(PipelineError::InvalidInput(format!(
                "inputs {} and {} both resolve to output name '{}'",
                first, sample, sample.output_basename
            )));
        }
    }
    Ok(())
}

fn classify_read_token(token: &str) -> Result<Sample, PipelineError> {
    let token = token.trim();
    if !token.contains('{') && !token.contains('}') {
        return Ok(Sample::single(PathBuf::from(token)));
    }

    let groups = brace_groups(token)
        .ok_or_else(|| PipelineError::InvalidInput(format!("malformed paired token '{}'", token)))?;
    match groups.as_slice() {
        [r1, r2] if !r1.is_empty() && !r2.is_empty() => {
            Ok(Sample::paired(PathBuf::from(r1), PathBuf::from(r2)))
        }
        _ => Err(PipelineError::InvalidInput(format!(
            "paired token '{}' must contain exactly two non-empty groups, e.g. {{r1.fq}}{{r2.fq}}",
            token
        ))),
    }
}

// Splits `{a}{b}...` into its groups; None on stray characters or unbalanced braces.
fn brace_groups(token: &str) -> Option<Vec<String>> {
    let mut groups = Vec::new();
    let mut rest = token;
    while !rest.is_empty() {
        let inner = rest.strip_prefix('{')?;
        let close = inner.find('}')?;
        let group = &inner[..close];
        if group.contains('{') {
            return None;
        }
        groups.push(group.trim().to_string());
        rest = &inner[close + 1..];
    }
    Some(groups)
}

fn fastq_basename(path: &Path, paired: bool) -> String {
    let (stem, _) = extension_remover(path);
    let name = stem
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !paired {
        return name;
    }
    for marker in R1_MARKERS {
        if let Some(trimmed) = name.strip_suffix(marker) {
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    name
}
