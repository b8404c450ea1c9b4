use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::warn;
use seq_io::fasta::{Reader as FastaReader, Record};

use crate::config::defs::{PipelineError, AMBIGUITY_BASE};
use crate::utils::bed::Interval;
use crate::utils::file::{extension_remover, FileReader};


/// One FASTA record with its header split into id and description.
#[derive(Debug, Clone, PartialEq)]
pub struct FastaRecord {
    pub id: String,
    pub desc: Option<String>,
    pub seq: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContigInfo {
    pub name: String,
    pub length: u64,
}

/// The mapping target for a run.
#[derive(Debug, Clone)]
pub struct Reference {
    pub path: PathBuf,
    /// Sum of sequence line lengths across all records.
    pub length: u64,
    pub contigs: Vec<ContigInfo>,
}

impl Reference {
    /// Reads a (possibly gzipped) FASTA and measures it.
    ///
    /// # Arguments
    ///
    /// * `path` - FASTA file.
    ///
    /// # Returns
    /// Reference, or InvalidInput for a missing, empty or unreadable file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::InvalidInput(format!(
                "Reference {} does not exist",
                path.display()
            )));
        }
        let mut reader = FastaReader::new(FileReader::open(path)?);
        let mut contigs = Vec::new();
        while let Some(result) = reader.next() {
            let record = result.map_err(|e| {
                PipelineError::InvalidInput(format!("Invalid FASTA {}: {}", path.display(), e))
            })?;
            let (name, _) = parse_header(record.head(), '>');
            let length: usize = record.seq_lines().map(|line| line.len()).sum();
            contigs.push(ContigInfo { name, length: length as u64 });
        }

        let length: u64 = contigs.iter().map(|c| c.length).sum();
        if contigs.is_empty() || length == 0 {
            return Err(PipelineError::InvalidInput(format!(
                "Reference {} contains no sequence",
                path.display()
            )));
        }
        if contigs.len() > 1 {
            warn!(
                "Reference {} has {} records; masking and consensus assume a single contiguous target",
                path.display(),
                contigs.len()
            );
        }

        Ok(Reference { path: path.to_path_buf(), length, contigs })
    }

    pub fn record_count(&self) -> usize {
        self.contigs.len()
    }

    /// Writes an uncompressed copy into `dir` so index files land beside it.
    ///
    /// # Returns
    /// The staged Reference, pointing at `dir/<stem>.fasta`.
    pub fn stage_into(&self, dir: &Path) -> Result<Reference, PipelineError> {
        let (stem, _) = extension_remover(&self.path);
        let name = stem
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reference".to_string());
        let staged_path = dir.join(format!("{}.fasta", name));
        let records = read_fasta_records(&self.path)?;
        write_fasta_file(&staged_path, &records)?;
        Ok(Reference { path: staged_path, length: self.length, contigs: self.contigs.clone() })
    }
}


/// Reads every record of a (possibly gzipped) FASTA file.
pub fn read_fasta_records(path: &Path) -> Result<Vec<FastaRecord>, PipelineError> {
    let mut reader = FastaReader::new(FileReader::open(path)?);
    let mut records = Vec::new();
    while let Some(result) = reader.next() {
        let record = result.map_err(|e| {
            PipelineError::InvalidData(format!("Invalid FASTA {}: {}", path.display(), e))
        })?;
        let (id, desc) = parse_header(record.head(), '>');
        records.push(FastaRecord { id, desc, seq: record.full_seq().into_owned() });
    }
    Ok(records)
}

pub fn write_fasta_record<W: Write>(
    writer: &mut W,
    id: &str,
    desc: Option<&str>,
    seq: &[u8],
) -> io::Result<()> {
    // Write header
    writer.write_all(b">")?;
    writer.write_all(id.as_bytes())?;
    if let Some(desc) = desc {
        writer.write_all(b" ")?;
        writer.write_all(desc.as_bytes())?;
    }
    writer.write_all(b"\n")?;

    // Write sequence (with line wrapping, e.g., 80 chars per line)
    for chunk in seq.chunks(80) {
        writer.write_all(chunk)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

pub fn write_fasta_file(path: &Path, records: &[FastaRecord]) -> Result<(), PipelineError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        write_fasta_record(&mut writer, &record.id, record.desc.as_deref(), &record.seq)?;
    }
    writer.flush()?;
    Ok(())
}


/// Renames every record of a FASTA: the first becomes `new_id`, later ones `new_id_2`, `new_id_3`...
///
/// # Arguments
///
/// * `input` - FASTA produced by the consensus tool.
/// * `output` - Destination path.
/// * `new_id` - Species abbreviation.
///
/// # Returns
/// The renamed records.
pub fn rename_fasta_records(
    input: &Path,
    output: &Path,
    new_id: &str,
) -> Result<Vec<FastaRecord>, PipelineError> {
    let records = read_fasta_records(input)?;
    if records.is_empty() {
        return Err(PipelineError::InvalidData(format!(
            "{} contains no FASTA records",
            input.display()
        )));
    }
    let renamed: Vec<FastaRecord> = records
        .into_iter()
        .enumerate()
        .map(|(i, record)| FastaRecord {
            id: if i == 0 { new_id.to_string() } else { format!("{}_{}", new_id, i + 1) },
            desc: None,
            seq: record.seq,
        })
        .collect();
    write_fasta_file(output, &renamed)?;
    Ok(renamed)
}


/// Length and symbol histogram of a FASTA file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SequenceComposition {
    pub ids: Vec<String>,
    pub length: u64,
    /// Case-sensitive symbol counts; BTreeMap keeps them alphabetical.
    pub counts: BTreeMap<char, u64>,
}

impl SequenceComposition {
    pub fn from_records(records: &[FastaRecord]) -> Self {
        let mut composition = SequenceComposition::default();
        for record in records {
            composition.ids.push(record.id.clone());
            composition.length += record.seq.len() as u64;
            for &base in &record.seq {
                *composition.counts.entry(base as char).or_insert(0) += 1;
            }
        }
        composition
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn ambiguous(&self) -> u64 {
        self.counts.get(&(AMBIGUITY_BASE as char)).copied().unwrap_or(0)
    }
}


/// Counts positions inside `gaps` that are not the ambiguity symbol.
/// Intervals reaching past the end of `seq` count their missing positions as unmasked.
pub fn unmasked_gap_positions(seq: &[u8], gaps: &[Interval]) -> u64 {
    let mut unmasked = 0;
    for gap in gaps {
        for pos in gap.start..gap.end {
            match seq.get(pos as usize) {
                Some(&base) if base == AMBIGUITY_BASE => {}
                _ => unmasked += 1,
            }
        }
    }
    unmasked
}


/// Parses a FASTX header.
///
///
/// # Arguments
///
/// * `head` - Header line of a FASTX record.
/// * 'prefix' - Leading, defining character of the header. > for FASTA, @ for FASTQ.
///
/// # Returns
/// Tuple: (id, desc) split of header on whitespace.
///
fn parse_header(head: &[u8], prefix: char) -> (String, Option<String>) {
    let head_str = String::from_utf8_lossy(head).into_owned();
    let parts: Vec<&str> = head_str.splitn(2, |c: char| c.is_whitespace()).collect();
    let id = parts[0].trim_start_matches(prefix).to_string();
    let desc = parts.get(1).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    (id, desc)
}
