/// Functions and structs for resolving external tools and creating their command-line arguments

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::defs::{PipelineError, BEDTOOLS_TAG, TOOL_MIN_VERSIONS, TOOL_PATH_VARS};
use crate::config::settings::ExternalSettings;
use crate::utils::streams::{read_child_output_lines, ProcessStage};


/// Produces the argument vector for one invocation of a tool.
pub trait ArgGenerator {
    fn tool(&self) -> &'static str;
    fn arg_generator(&self, threads: usize) -> Vec<String>;
}


/// Tool tag -> executable, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    paths: HashMap<String, PathBuf>,
}

impl ToolRegistry {
    /// Resolves every tool: environment override first, then a PATH search.
    ///
    /// # Arguments
    ///
    /// * `tools` - Tool tags to resolve.
    /// * `settings` - Overrides and PATH captured from the environment.
    ///
    /// # Returns
    /// ToolRegistry, or ToolNotFound for the first unresolved tool.
    pub fn resolve(tools: &[&str], settings: &ExternalSettings) -> Result<Self, PipelineError> {
        let mut paths = HashMap::new();
        for &tool in tools {
            let env_var = TOOL_PATH_VARS.get(tool).copied().unwrap_or("PATH");
            let resolved = match settings.tool_overrides.get(tool) {
                Some(candidate) if candidate.components().count() > 1 => {
                    Some(candidate.clone()).filter(|p| is_executable(p))
                }
                Some(bare_name) => settings
                    .search_path
                    .as_deref()
                    .and_then(|p| search_path(bare_name.as_os_str(), p)),
                None => settings
                    .search_path
                    .as_deref()
                    .and_then(|p| search_path(OsStr::new(tool), p)),
            };
            match resolved {
                Some(path) => {
                    debug!("Resolved {} to {}", tool, path.display());
                    paths.insert(tool.to_string(), path);
                }
                None => {
                    return Err(PipelineError::ToolNotFound {
                        tool: tool.to_string(),
                        env_var: env_var.to_string(),
                    })
                }
            }
        }
        Ok(ToolRegistry { paths })
    }

    /// Registry with fixed paths, no lookup.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = (S, PathBuf)>,
        S: Into<String>,
    {
        ToolRegistry { paths: paths.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }

    pub fn path(&self, tool: &str) -> Result<&PathBuf, PipelineError> {
        self.paths.get(tool).ok_or_else(|| PipelineError::ToolNotFound {
            tool: tool.to_string(),
            env_var: TOOL_PATH_VARS.get(tool).copied().unwrap_or("PATH").to_string(),
        })
    }

    /// Builds a runnable process stage from a tool configuration.
    pub fn stage(&self, cmd: &dyn ArgGenerator, threads: usize) -> Result<ProcessStage, PipelineError> {
        let program = self.path(cmd.tool())?.clone();
        Ok(ProcessStage::new(cmd.tool(), program, cmd.arg_generator(threads)))
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn search_path(exe: &OsStr, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(exe))
        .find(|candidate| is_executable(candidate))
}


/// A semantic version as printed by a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    /// Finds the first `[v]X.Y[.Z]` token in a version line.
    pub fn parse(line: &str) -> Option<Self> {
        line.split_whitespace().find_map(|token| {
            let token = token.trim_start_matches(['v', 'V']);
            let mut parts = token.split('.');
            let major = parts.next()?.parse().ok()?;
            let minor = parts.next()?.parse().ok()?;
            let patch = parts
                .next()
                .map(|p| {
                    let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
                    digits.parse().unwrap_or(0)
                })
                .unwrap_or(0);
            Some(ToolVersion { major, minor, patch })
        })
    }

    /// Major then minor comparison; patch levels never fail a gate.
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}


pub mod bowtie2 {
    use std::path::PathBuf;
    use crate::config::defs::{BOWTIE2_BUILD_TAG, BOWTIE2_TAG};
    use crate::utils::command::ArgGenerator;
    use crate::utils::samples::{Sample, SampleKind};

    #[derive(Debug, Clone)]
    pub struct Bowtie2BuildConfig {
        pub reference: PathBuf,
        pub index_prefix: PathBuf,
    }

    impl ArgGenerator for Bowtie2BuildConfig {
        fn tool(&self) -> &'static str {
            BOWTIE2_BUILD_TAG
        }

        fn arg_generator(&self, threads: usize) -> Vec<String> {
            vec![
                "--threads".to_string(),
                threads.to_string(),
                self.reference.to_string_lossy().to_string(),
                self.index_prefix.to_string_lossy().to_string(),
            ]
        }
    }

    /// Maps one sample; unaligned reads are never written.
    #[derive(Debug, Clone)]
    pub struct Bowtie2Config {
        pub index_prefix: PathBuf,
        pub sample: Sample,
    }

    impl ArgGenerator for Bowtie2Config {
        fn tool(&self) -> &'static str {
            BOWTIE2_TAG
        }

        fn arg_generator(&self, threads: usize) -> Vec<String> {
            let mut args_vec: Vec<String> = vec![
                "-p".to_string(),
                threads.to_string(),
                "--no-unal".to_string(),
                "-x".to_string(),
                self.index_prefix.to_string_lossy().to_string(),
            ];
            match &self.sample.kind {
                SampleKind::PairedFastq { r1, r2 } => {
                    args_vec.push("-1".to_string());
                    args_vec.push(r1.to_string_lossy().to_string());
                    args_vec.push("-2".to_string());
                    args_vec.push(r2.to_string_lossy().to_string());
                }
                SampleKind::SingleFastq { path } => {
                    args_vec.push("-U".to_string());
                    args_vec.push(path.to_string_lossy().to_string());
                }
                SampleKind::SraAccession { accession } => {
                    args_vec.push("--sra-acc".to_string());
                    args_vec.push(accession.clone());
                }
            }
            args_vec
        }
    }
}

pub mod samtools {
    use crate::config::defs::{SamtoolsSubcommand, SAMTOOLS_TAG};
    use crate::utils::command::ArgGenerator;

    #[derive(Debug, Clone)]
    pub struct SamtoolsConfig {
        pub subcommand: SamtoolsSubcommand,
        /// Options in command-line order; `None` for bare flags.
        pub subcommand_fields: Vec<(String, Option<String>)>,
        /// Positional arguments appended after the options.
        pub inputs: Vec<String>,
    }

    impl SamtoolsConfig {
        pub fn new(subcommand: SamtoolsSubcommand) -> Self {
            SamtoolsConfig { subcommand, subcommand_fields: Vec::new(), inputs: Vec::new() }
        }

        pub fn field(mut self, key: &str, value: Option<&str>) -> Self {
            self.subcommand_fields.push((key.to_string(), value.map(str::to_string)));
            self
        }

        pub fn input<S: Into<String>>(mut self, input: S) -> Self {
            self.inputs.push(input.into());
            self
        }
    }

    impl ArgGenerator for SamtoolsConfig {
        fn tool(&self) -> &'static str {
            SAMTOOLS_TAG
        }

        fn arg_generator(&self, threads: usize) -> Vec<String> {
            let mut args_vec: Vec<String> = Vec::new();
            let (name, threaded) = match self.subcommand {
                SamtoolsSubcommand::Faidx => ("faidx", false),
                SamtoolsSubcommand::View => ("view", true),
                SamtoolsSubcommand::Sort => ("sort", true),
                SamtoolsSubcommand::Stats => ("stats", true),
                SamtoolsSubcommand::Merge => ("merge", true),
                SamtoolsSubcommand::Index => ("index", true),
            };
            args_vec.push(name.to_string());
            if threaded {
                args_vec.push("-@".to_string());
                args_vec.push(threads.to_string());
            }
            for (key, value) in &self.subcommand_fields {
                args_vec.push(key.clone());
                if let Some(v) = value {
                    args_vec.push(v.clone());
                }
            }
            args_vec.extend(self.inputs.iter().cloned());
            args_vec
        }
    }
}

pub mod bedtools {
    use crate::config::defs::{BedtoolsSubcommand, BEDTOOLS_TAG};
    use crate::utils::command::ArgGenerator;

    #[derive(Debug, Clone)]
    pub struct BedtoolsConfig {
        pub subcommand: BedtoolsSubcommand,
        pub subcommand_fields: Vec<(String, Option<String>)>,
    }

    impl ArgGenerator for BedtoolsConfig {
        fn tool(&self) -> &'static str {
            BEDTOOLS_TAG
        }

        fn arg_generator(&self, _threads: usize) -> Vec<String> {
            let mut args_vec: Vec<String> = Vec::new();
            match self.subcommand {
                BedtoolsSubcommand::Version => args_vec.push("--version".to_string()),
                BedtoolsSubcommand::Genomecov => args_vec.push("genomecov".to_string()),
            }
            for (key, value) in &self.subcommand_fields {
                args_vec.push(key.clone());
                if let Some(v) = value {
                    args_vec.push(v.clone());
                }
            }
            args_vec
        }
    }
}

pub mod freebayes {
    use std::path::PathBuf;
    use crate::config::defs::FREEBAYES_TAG;
    use crate::utils::command::ArgGenerator;

    #[derive(Debug, Clone)]
    pub struct FreebayesConfig {
        pub reference: PathBuf,
        pub bam: PathBuf,
    }

    impl ArgGenerator for FreebayesConfig {
        fn tool(&self) -> &'static str {
            FREEBAYES_TAG
        }

        fn arg_generator(&self, _threads: usize) -> Vec<String> {
            vec![
                "-f".to_string(),
                self.reference.to_string_lossy().to_string(),
                self.bam.to_string_lossy().to_string(),
            ]
        }
    }
}

pub mod htslib {
    use std::path::PathBuf;
    use crate::config::defs::{BCFTOOLS_TAG, BGZIP_TAG, BcftoolsSubcommand, TABIX_TAG};
    use crate::utils::command::ArgGenerator;

    /// Block-compresses a file to stdout.
    #[derive(Debug, Clone)]
    pub struct BgzipConfig {
        pub input: PathBuf,
    }

    impl ArgGenerator for BgzipConfig {
        fn tool(&self) -> &'static str {
            BGZIP_TAG
        }

        fn arg_generator(&self, threads: usize) -> Vec<String> {
            vec![
                "-f".to_string(),
                "-c".to_string(),
                "-@".to_string(),
                threads.to_string(),
                self.input.to_string_lossy().to_string(),
            ]
        }
    }

    #[derive(Debug, Clone)]
    pub struct TabixConfig {
        pub input: PathBuf,
    }

    impl ArgGenerator for TabixConfig {
        fn tool(&self) -> &'static str {
            TABIX_TAG
        }

        fn arg_generator(&self, _threads: usize) -> Vec<String> {
            vec![
                "-f".to_string(),
                "-p".to_string(),
                "vcf".to_string(),
                self.input.to_string_lossy().to_string(),
            ]
        }
    }

    #[derive(Debug, Clone)]
    pub struct BcftoolsConfig {
        pub subcommand: BcftoolsSubcommand,
        pub subcommand_fields: Vec<(String, Option<String>)>,
        pub inputs: Vec<String>,
    }

    impl ArgGenerator for BcftoolsConfig {
        fn tool(&self) -> &'static str {
            BCFTOOLS_TAG
        }

        fn arg_generator(&self, _threads: usize) -> Vec<String> {
            let mut args_vec: Vec<String> = match self.subcommand {
                BcftoolsSubcommand::Consensus => vec!["consensus".to_string()],
            };
            for (key, value) in &self.subcommand_fields {
                args_vec.push(key.clone());
                if let Some(v) = value {
                    args_vec.push(v.clone());
                }
            }
            args_vec.extend(self.inputs.iter().cloned());
            args_vec
        }
    }
}

pub mod pilon {
    use std::path::PathBuf;
    use crate::config::defs::JAVA_TAG;
    use crate::utils::command::ArgGenerator;

    /// Pilon runs inside the JVM, so the executable is `java`.
    #[derive(Debug, Clone)]
    pub struct PilonConfig {
        pub archive: PathBuf,
        pub memory_options: Vec<String>,
        pub genome: PathBuf,
        pub bam: PathBuf,
        pub paired: bool,
        pub output: String,
        pub outdir: PathBuf,
    }

    impl ArgGenerator for PilonConfig {
        fn tool(&self) -> &'static str {
            JAVA_TAG
        }

        fn arg_generator(&self, threads: usize) -> Vec<String> {
            let mut args_vec: Vec<String> = self.memory_options.clone();
            args_vec.push("-jar".to_string());
            args_vec.push(self.archive.to_string_lossy().to_string());
            args_vec.push("--genome".to_string());
            args_vec.push(self.genome.to_string_lossy().to_string());
            args_vec.push(if self.paired { "--frags" } else { "--unpaired" }.to_string());
            args_vec.push(self.bam.to_string_lossy().to_string());
            args_vec.push("--output".to_string());
            args_vec.push(self.output.clone());
            args_vec.push("--outdir".to_string());
            args_vec.push(self.outdir.to_string_lossy().to_string());
            args_vec.push("--threads".to_string());
            args_vec.push(threads.to_string());
            args_vec
        }
    }
}


/// Probes a tool's version.
///
/// # Arguments
///
/// * `tools` - Resolved tool registry.
/// * `tool` - Tool tag with a known version flag.
///
/// # Returns
/// The first version found in the tool's output.
pub async fn check_version(tools: &ToolRegistry, tool: &str) -> Result<ToolVersion, PipelineError> {
    let stage = match tool {
        BEDTOOLS_TAG => tools.stage(
            &bedtools::BedtoolsConfig {
                subcommand: crate::config::defs::BedtoolsSubcommand::Version,
                subcommand_fields: Vec::new(),
            },
            1,
        )?,
        _ => return Err(PipelineError::InvalidConfig(format!("No version probe for tool: {}", tool))),
    };

    let lines = read_child_output_lines(&stage).await?;
    let first_line = lines
        .first()
        .ok_or_else(|| PipelineError::InvalidData(format!("No output from {} version probe", tool)))?;
    ToolVersion::parse(first_line)
        .ok_or_else(|| PipelineError::InvalidData(format!("Invalid {} version output: {}", tool, first_line)))
}

/// Enforces every minimum version in TOOL_MIN_VERSIONS.
pub async fn check_versions(tools: &ToolRegistry) -> Result<(), PipelineError> {
    let mut gated: Vec<(&&str, &(u32, u32))> = TOOL_MIN_VERSIONS.iter().collect();
    gated.sort();
    for (tool, &(major, minor)) in gated {
        let version = check_version(tools, tool).await?;
        if !version.at_least(major, minor) {
            return Err(PipelineError::UnsupportedVersion {
                tool: tool.to_string(),
                found: version.to_string(),
                required: format!("{}.{}.0", major, minor),
            });
        }
        info!("{} version {} (>= {}.{}.0)", tool, version, major, minor);
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;
    use crate::config::defs::{SamtoolsSubcommand, BOWTIE2_TAG, SAMTOOLS_TAG};
    use crate::utils::samples::Sample;

    fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(
            ToolVersion::parse("bedtools v2.30.0"),
            Some(ToolVersion { major: 2, minor: 30, patch: 0 })
        );
        assert_eq!(
            ToolVersion::parse("bedtools v2.19.1-12-gabc"),
            Some(ToolVersion { major: 2, minor: 19, patch: 1 })
        );
        assert_eq!(ToolVersion::parse("2.20"), Some(ToolVersion { major: 2, minor: 20, patch: 0 }));
        assert_eq!(ToolVersion::parse("no version here"), None);
    }

    #[test]
    fn test_version_gate_is_semantic() {
        // 2.9 is older than 2.20 even though 2.9 > 2.20 as a float
        assert!(!ToolVersion::parse("v2.9.0").unwrap().at_least(2, 20));
        assert!(ToolVersion::parse("v2.20.0").unwrap().at_least(2, 20));
        assert!(ToolVersion::parse("v2.31.1").unwrap().at_least(2, 20));
        assert!(ToolVersion::parse("v3.0.0").unwrap().at_least(2, 20));
        assert!(!ToolVersion::parse("v1.99.0").unwrap().at_least(2, 20));
    }

    #[test]
    fn test_resolve_prefers_override_then_path() -> anyhow::Result<()> {
        let bin = TempDir::new()?;
        let opt = TempDir::new()?;
        let on_path = fake_tool(bin.path(), "samtools", "exit 0");
        let overridden = fake_tool(opt.path(), "bt2", "exit 0");

        let mut settings = ExternalSettings {
            search_path: Some(OsString::from(bin.path())),
            ..Default::default()
        };
        settings.tool_overrides.insert(BOWTIE2_TAG.to_string(), overridden.clone());

        let registry = ToolRegistry::resolve(&[SAMTOOLS_TAG, BOWTIE2_TAG], &settings)?;
        assert_eq!(registry.path(SAMTOOLS_TAG)?, &on_path);
        assert_eq!(registry.path(BOWTIE2_TAG)?, &overridden);
        Ok(())
    }

    #[test]
    fn test_resolve_missing_tool() -> anyhow::Result<()> {
        let empty = TempDir::new()?;
        let settings = ExternalSettings {
            search_path: Some(OsString::from(empty.path())),
            ..Default::default()
        };
        match ToolRegistry::resolve(&[BEDTOOLS_TAG], &settings) {
            Err(PipelineError::ToolNotFound { tool, env_var }) => {
                assert_eq!(tool, "bedtools");
                assert_eq!(env_var, "BEDTOOLS_PATH");
            }
            other => panic!("expected ToolNotFound, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_non_executable_is_not_resolved() -> anyhow::Result<()> {
        let bin = TempDir::new()?;
        std::fs::write(bin.path().join("samtools"), "not a program")?;
        let settings = ExternalSettings {
            search_path: Some(OsString::from(bin.path())),
            ..Default::default()
        };
        assert!(ToolRegistry::resolve(&[SAMTOOLS_TAG], &settings).is_err());
        Ok(())
    }

    #[test]
    fn test_samtools_args_keep_order() {
        let sort = samtools::SamtoolsConfig::new(SamtoolsSubcommand::Sort)
            .field("-o", Some("out.bam"))
            .input("in.bam");
        assert_eq!(sort.arg_generator(8), vec!["sort", "-@", "8", "-o", "out.bam", "in.bam"]);

        let faidx = samtools::SamtoolsConfig::new(SamtoolsSubcommand::Faidx).input("ref.fasta");
        assert_eq!(faidx.arg_generator(8), vec!["faidx", "ref.fasta"]);
    }

    #[test]
    fn test_bowtie2_inputs_by_sample_kind() {
        let paired = bowtie2::Bowtie2Config {
            index_prefix: PathBuf::from("idx/bt2_index"),
            sample: Sample::paired(PathBuf::from("a_1.fq"), PathBuf::from("a_2.fq")),
        };
        assert_eq!(
            paired.arg_generator(2),
            vec!["-p", "2", "--no-unal", "-x", "idx/bt2_index", "-1", "a_1.fq", "-2", "a_2.fq"]
        );

        let sra = bowtie2::Bowtie2Config {
            index_prefix: PathBuf::from("idx/bt2_index"),
            sample: Sample::accession("SRR1"),
        };
        assert_eq!(&sra.arg_generator(2)[5..], &["--sra-acc".to_string(), "SRR1".to_string()]);
    }

    #[test]
    fn test_pilon_args() {
        let pilon = pilon::PilonConfig {
            archive: PathBuf::from("/opt/pilon.jar"),
            memory_options: vec!["-Xmx8G".to_string()],
            genome: PathBuf::from("cons.fasta"),
            bam: PathBuf::from("merged.bam"),
            paired: false,
            output: "Nibe_final".to_string(),
            outdir: PathBuf::from("08_polish"),
        };
        assert_eq!(
            pilon.arg_generator(4),
            vec![
                "-Xmx8G", "-jar", "/opt/pilon.jar", "--genome", "cons.fasta", "--unpaired",
                "merged.bam", "--output", "Nibe_final", "--outdir", "08_polish", "--threads", "4"
            ]
        );
    }

    #[tokio::test]
    async fn test_check_versions_gate() -> anyhow::Result<()> {
        let bin = TempDir::new()?;
        let old = fake_tool(bin.path(), "bedtools-old", "echo 'bedtools v2.17.0'");
        let registry = ToolRegistry::from_paths([(BEDTOOLS_TAG, old)]);
        assert!(matches!(
            check_versions(&registry).await,
            Err(PipelineError::UnsupportedVersion { .. })
        ));

        let new = fake_tool(bin.path(), "bedtools-new", "echo 'bedtools v2.31.1'");
        let registry = ToolRegistry::from_paths([(BEDTOOLS_TAG, new)]);
        check_versions(&registry).await?;
        Ok(())
    }
}
