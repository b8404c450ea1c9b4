use std::path::PathBuf;
use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;

use crate::cli::Arguments;
use crate::config::settings::{validate_polisher_options, ExternalSettings};
use crate::utils::command::{check_versions, ToolRegistry};
use crate::utils::fastx::Reference;
use crate::utils::file::species_abbreviation;
use crate::utils::samples::{resolve_samples, Sample};
use crate::utils::system::effective_threads;

// External software
pub const BOWTIE2_BUILD_TAG: &str = "bowtie2-build";
pub const BOWTIE2_TAG: &str = "bowtie2";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const BEDTOOLS_TAG: &str = "bedtools";
pub const FREEBAYES_TAG: &str = "freebayes";
pub const BGZIP_TAG: &str = "bgzip";
pub const TABIX_TAG: &str = "tabix";
pub const BCFTOOLS_TAG: &str = "bcftools";
pub const JAVA_TAG: &str = "java";

/// Every executable the pipeline drives, in the order they are resolved at startup.
pub const REQUIRED_TOOLS: &[&str] = &[
    BOWTIE2_BUILD_TAG,
    BOWTIE2_TAG,
    SAMTOOLS_TAG,
    BEDTOOLS_TAG,
    FREEBAYES_TAG,
    BGZIP_TAG,
    TABIX_TAG,
    BCFTOOLS_TAG,
    JAVA_TAG,
];

lazy_static! {
    /// Environment variables that override the PATH lookup of a tool.
    pub static ref TOOL_PATH_VARS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert(BOWTIE2_BUILD_TAG, "BOWTIE2_BUILD_PATH");
        m.insert(BOWTIE2_TAG, "BOWTIE2_PATH");
        m.insert(SAMTOOLS_TAG, "SAMTOOLS_PATH");
        m.insert(BEDTOOLS_TAG, "BEDTOOLS_PATH");
        m.insert(FREEBAYES_TAG, "FREEBAYES_PATH");
        m.insert(BGZIP_TAG, "BGZIP_PATH");
        m.insert(TABIX_TAG, "TABIX_PATH");
        m.insert(BCFTOOLS_TAG, "BCFTOOLS_PATH");
        m.insert(JAVA_TAG, "JAVA_PATH");
        m
    };

    /// Minimum (major, minor) versions for tools with a version gate.
    pub static ref TOOL_MIN_VERSIONS: HashMap<&'static str, (u32, u32)> = {
        let mut m = HashMap::new();
        m.insert(BEDTOOLS_TAG, (2, 20));
        m
    };
}

pub const POLISHER_ARCHIVE_VAR: &str = "PILON_JAR";
pub const CACHE_DIR_VAR: &str = "NCBI_CACHE_DIR";
pub const POLISHER_MEMORY_OPTIONS: &[&str] = &["-Xmx", "-Xms"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    Faidx,
    View,
    Sort,
    Stats,
    Merge,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BedtoolsSubcommand {
    Version,
    Genomecov,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BcftoolsSubcommand {
    Consensus,
}

// Output layout, one directory per stage
pub const REFERENCE_DIR: &str = "01_reference";
pub const MAPPING_DIR: &str = "02_mapping";
pub const MERGED_DIR: &str = "03_merged";
pub const COVERAGE_DIR: &str = "04_coverage";
pub const VARIANTS_DIR: &str = "05_variants";
pub const CONSENSUS_DIR: &str = "06_consensus";
pub const REMAP_DIR: &str = "07_remap";
pub const POLISH_DIR: &str = "08_polish";

// Static Parameters
pub const DEFAULT_SPECIES_ABBR: &str = "Sps";
pub const AMBIGUITY_BASE: u8 = b'N';
pub const HOMOZYGOUS_MIN_AF: f64 = 1.0;
pub const UNCLASSIFIED_VARIANT: &str = "unclassified";
pub const BOWTIE2_INDEX_NAME: &str = "bt2_index";

pub const FASTA_EXTS: &[&'static str] = &["fasta", "fa", "fna", "fas"];
pub const FASTQ_EXTS: &[&'static str] = &["fastq", "fq"];
pub const COMPRESSION_EXTS: &[&'static str] = &["gz", "bz2"];


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Conflicting inputs: {0}")]
    InputConflict(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Tool '{tool}' not found: set {env_var} or add it to PATH")]
    ToolNotFound { tool: String, env_var: String },

    #[error("Unsupported {tool} version {found}; at least {required} is required")]
    UnsupportedVersion { tool: String, found: String, required: String },

    #[error("Missing dependency for {tool}: {path} does not exist")]
    DependencyMissing { tool: String, path: String },

    #[error("Invalid polisher option '{option}'; allowed prefixes: {allowed}")]
    InvalidOption { option: String, allowed: String },

    #[error("Tool execution failed: {tool}: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    IOError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}


/// Everything a run needs, validated before the first stage starts.
#[derive(Debug)]
pub struct RunConfig {
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub samples: Vec<Sample>,
    pub reference: Reference,
    pub tools: ToolRegistry,
    pub settings: ExternalSettings,
    pub polisher_archive: PathBuf,
    pub polisher_options: Vec<String>,
    pub threads: usize,
    pub species_abbr: String,
}

impl RunConfig {
    /// Validates arguments and environment, cheapest checks first, so input mistakes
    /// are reported before any external tool is touched.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command line.
    /// * `settings` - Environment snapshot.
    /// * `cwd` - Directory relative output paths are resolved against.
    ///
    /// # Returns
    /// RunConfig with the output directory created.
    pub async fn build(
        args: Arguments,
        settings: ExternalSettings,
        cwd: PathBuf,
    ) -> Result<Self, PipelineError> {
        let samples = resolve_samples(&args.reads, &args.accessions)?;
        for sample in &samples {
            sample.check_exists()?;
        }
        let polisher_options = validate_polisher_options(&args.polish_mem)?;
        let polisher_archive = settings.check_polisher_archive()?;

        let tools = ToolRegistry::resolve(REQUIRED_TOOLS, &settings)?;
        check_versions(&tools).await?;

        let reference = Reference::load(&cwd.join(&args.reference))?;

        let out_dir = cwd.join(&args.out_dir);
        std::fs::create_dir_all(&out_dir).map_err(|e| {
            PipelineError::IOError(format!("Cannot create output directory {}: {}", out_dir.display(), e))
        })?;

        let threads = effective_threads(args.threads);
        let species_abbr = species_abbreviation(args.species.as_deref());

        Ok(RunConfig {
            out_dir,
            args,
            samples,
            reference,
            tools,
            settings,
            polisher_archive,
            polisher_options,
            threads,
            species_abbr,
        })
    }

    pub fn stage_dir(&self, name: &str) -> PathBuf {
        self.out_dir.join(name)
    }

    pub fn all_paired(&self) -> bool {
        self.samples.iter().all(Sample::is_paired)
    }
}
