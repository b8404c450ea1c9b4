use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use flate2::read::MultiGzDecoder;

use crate::config::defs::{COMPRESSION_EXTS, DEFAULT_SPECIES_ABBR, FASTA_EXTS, FASTQ_EXTS};

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Enum to hold either an uncompressed or gzipped file reader
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(MultiGzDecoder<File>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

impl FileReader {
    /// Opens a file, transparently decompressing gzip (and bgzip) content.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        if is_gzipped(path)? {
            Ok(FileReader::Gzipped(MultiGzDecoder::new(file)))
        } else {
            Ok(FileReader::Uncompressed(BufReader::new(file)))
        }
    }
}


/// Splits known sequence and compression extensions off a file name.
///
/// # Arguments
///
/// * `path` - File path, e.g. `reads/sample_R1.fastq.gz`.
///
/// # Returns
/// (path without the extensions, extensions in file order), e.g.
/// (`reads/sample_R1`, [`fastq`, `gz`]).
pub fn extension_remover(path: &Path) -> (PathBuf, Vec<String>) {
    let mut stem = path.to_path_buf();
    let mut extensions = Vec::new();

    while let Some(ext) = stem.extension().and_then(|e| e.to_str()).map(str::to_string) {
        let known = COMPRESSION_EXTS
            .iter()
            .chain(FASTQ_EXTS.iter())
            .chain(FASTA_EXTS.iter())
            .any(|k| k.eq_ignore_ascii_case(&ext));
        if !known {
            break;
        }
        extensions.insert(0, ext);
        stem.set_extension("");
    }

    (stem, extensions)
}


/// Builds an output path from a base name.
///
/// # Arguments
///
/// * `base` - Base path; only its file name is used when `dir` is given.
/// * `dir` - Optional directory to place the result in.
/// * `prefix` - Optional prefix joined before the base name.
/// * `suffix` - Optional suffix joined after the base name.
/// * `delimiter` - String placed between prefix/base/suffix.
///
/// # Returns
/// PathBuf of the assembled file name.
pub fn file_path_manipulator(
    base: &Path,
    dir: Option<&Path>,
    prefix: Option<&str>,
    suffix: Option<&str>,
    delimiter: &str,
) -> PathBuf {
    let base_name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut name = String::new();
    if let Some(p) = prefix {
        name.push_str(p);
        name.push_str(delimiter);
    }
    name.push_str(&base_name);
    if let Some(s) = suffix {
        name.push_str(delimiter);
        name.push_str(s);
    }

    match dir {
        Some(d) => d.join(name),
        None => match base.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        },
    }
}


/// Short name used for every cohort-level file and the consensus record id.
///
/// Words are split on `_`, `-` or whitespace; the first two characters of the first
/// two words are joined, so `Nicotiana_benthamiana` becomes `Nibe`. A single word gives
/// its first two characters and a missing name gives the default abbreviation.
pub fn species_abbreviation(species: Option<&str>) -> String {
    let words: Vec<&str> = species
        .unwrap_or("")
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return DEFAULT_SPECIES_ABBR.to_string();
    }
    words.iter().take(2).flat_map(|w| w.chars().take(2)).collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::NamedTempFile;

    #[test]
    fn test_extension_remover() {
        let (stem, exts) = extension_remover(Path::new("reads/sample_R1.fastq.gz"));
        assert_eq!(stem, PathBuf::from("reads/sample_R1"));
        assert_eq!(exts, vec!["fastq".to_string(), "gz".to_string()]);

        let (stem, exts) = extension_remover(Path::new("run.v2.FQ"));
        assert_eq!(stem, PathBuf::from("run.v2"));
        assert_eq!(exts, vec!["FQ".to_string()]);

        let (stem, exts) = extension_remover(Path::new("notes.txt"));
        assert_eq!(stem, PathBuf::from("notes.txt"));
        assert!(exts.is_empty());
    }

    #[test]
    fn test_file_path_manipulator() {
        let out = Path::new("/out/02_mapping");
        assert_eq!(
            file_path_manipulator(Path::new("/data/sample"), Some(out), None, Some("to_consensus.bam"), "_"),
            PathBuf::from("/out/02_mapping/sample_to_consensus.bam")
        );
        assert_eq!(
            file_path_manipulator(Path::new("sample.bam"), None, Some("sorted"), None, "."),
            PathBuf::from("sorted.sample.bam")
        );
    }

    #[test]
    fn test_species_abbreviation() {
        assert_eq!(species_abbreviation(Some("Nicotiana_benthamiana")), "Nibe");
        assert_eq!(species_abbreviation(Some("Arabidopsis thaliana")), "Arth");
        assert_eq!(species_abbreviation(Some("zea-mays_subsp")), "zema");
        assert_eq!(species_abbreviation(Some("Oryza")), "Or");
        assert_eq!(species_abbreviation(Some("  ")), "Sps");
        assert_eq!(species_abbreviation(None), "Sps");
    }

    #[test]
    fn test_file_reader_gzip_and_plain() -> anyhow::Result<()> {
        let mut plain = NamedTempFile::new()?;
        write!(plain, ">a\nACGT\n")?;
        let mut text = String::new();
        FileReader::open(plain.path())?.read_to_string(&mut text)?;
        assert_eq!(text, ">a\nACGT\n");

        let gz = NamedTempFile::new()?;
        let mut encoder = GzEncoder::new(File::create(gz.path())?, Compression::default());
        encoder.write_all(b">b\nTTTT\n")?;
        encoder.finish()?;
        assert!(is_gzipped(gz.path())?);
        let mut text = String::new();
        FileReader::open(gz.path())?.read_to_string(&mut text)?;
        assert_eq!(text, ">b\nTTTT\n");
        Ok(())
    }
}
