// src/pipelines/plastid_consensus.rs: reference-guided chloroplast reconstruction

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::defs::{
    BcftoolsSubcommand, BedtoolsSubcommand, PipelineError, RunConfig, SamtoolsSubcommand,
    BOWTIE2_INDEX_NAME, CONSENSUS_DIR, COVERAGE_DIR, MAPPING_DIR, MERGED_DIR, POLISH_DIR,
    REFERENCE_DIR, REMAP_DIR, VARIANTS_DIR,
};
use crate::utils::bed::{CoverageProfile, CoverageSummary, GapSet};
use crate::utils::command::bedtools::BedtoolsConfig;
use crate::utils::command::bowtie2::{Bowtie2BuildConfig, Bowtie2Config};
use crate::utils::command::freebayes::FreebayesConfig;
use crate::utils::command::htslib::{BcftoolsConfig, BgzipConfig, TabixConfig};
use crate::utils::command::pilon::PilonConfig;
use crate::utils::command::samtools::SamtoolsConfig;
use crate::utils::fastx::{
    read_fasta_records, rename_fasta_records, unmasked_gap_positions, Reference, SequenceComposition,
};
use crate::utils::file::file_path_manipulator;
use crate::utils::sambam::{parse_samtools_stats, AlignmentDataset, MappingStats};
use crate::utils::samples::Sample;
use crate::utils::stats::RunStats;
use crate::utils::streams::ProcessPipeline;
use crate::utils::vcf::VariantSet;

/// A staged FASTA with its aligner index.
#[derive(Debug, Clone)]
pub struct MappingTarget {
    pub reference: Reference,
    pub index_prefix: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CoverageResult {
    pub gaps_bed: PathBuf,
    pub summary: CoverageSummary,
    pub gaps: GapSet,
}

#[derive(Debug, Clone)]
pub struct VariantResult {
    pub raw: VariantSet,
    pub filtered: VariantSet,
    /// bgzipped and tabix-indexed filtered calls.
    pub compressed: PathBuf,
}

/// A FASTA produced by the pipeline and its composition.
#[derive(Debug, Clone)]
pub struct SequenceResult {
    pub path: PathBuf,
    pub composition: SequenceComposition,
}

/// Second-generation mapping results.
#[derive(Debug, Clone)]
pub struct RemapResult {
    pub target: MappingTarget,
    pub datasets: Vec<AlignmentDataset>,
    pub cohort: AlignmentDataset,
    pub merged: bool,
}

fn stage_header(title: &str) {
    info!("------------- {} -------------", title);
}

fn create_stage_dir(config: &RunConfig, name: &str) -> Result<PathBuf, PipelineError> {
    let dir = config.stage_dir(name);
    fs::create_dir_all(&dir).map_err(|e| {
        PipelineError::IOError(format!("Cannot create {}: {}", dir.display(), e))
    })?;
    Ok(dir)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}


/// Stages a reference into `dir`, then builds the FASTA index and the aligner index.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `reference` - FASTA to map against.
/// * `dir` - Stage directory receiving the copy and every index file.
///
/// # Returns
/// MappingTarget for the staged copy.
pub async fn index_reference(
    config: Arc<RunConfig>,
    reference: &Reference,
    dir: &Path,
) -> Result<MappingTarget, PipelineError> {
    let staged = reference.stage_into(dir)?;
    debug!("Staged {} as {}", reference.path.display(), staged.path.display());

    let faidx = SamtoolsConfig::new(SamtoolsSubcommand::Faidx).input(path_arg(&staged.path));
    ProcessPipeline::new(config.tools.stage(&faidx, config.threads)?).run().await?;

    let index_prefix = dir.join(BOWTIE2_INDEX_NAME);
    let build = Bowtie2BuildConfig { reference: staged.path.clone(), index_prefix: index_prefix.clone() };
    ProcessPipeline::new(config.tools.stage(&build, config.threads)?).run().await?;

    info!("Indexed {} ({} bp)", staged.path.display(), staged.length);
    Ok(MappingTarget { reference: staged, index_prefix })
}

/// Runs `samtools stats` on a BAM, keeps the report next to it, and parses the summary.
pub async fn mapping_stats(
    config: Arc<RunConfig>,
    bam: &Path,
    reference_length: u64,
) -> Result<MappingStats, PipelineError> {
    let stats_cmd = SamtoolsConfig::new(SamtoolsSubcommand::Stats).input(path_arg(bam));
    let output = ProcessPipeline::new(config.tools.stage(&stats_cmd, config.threads)?)
        .capture_stdout()
        .run()
        .await?;
    let text = output.stdout_string();
    let report_path = file_path_manipulator(bam, None, None, Some("stats"), ".");
    fs::write(&report_path, &text)?;
    parse_samtools_stats(&text, reference_length)
}

/// Maps one sample and produces a sorted, mapped-only BAM.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `target` - Indexed reference.
/// * `sample` - Read source.
/// * `dir` - Output directory.
/// * `suffix` - Optional name suffix, e.g. `to_consensus`.
///
/// # Returns
/// AlignmentDataset for `<base>[_suffix].bam`.
pub async fn map_sample(
    config: Arc<RunConfig>,
    target: &MappingTarget,
    sample: &Sample,
    dir: &Path,
    suffix: Option<&str>,
) -> Result<AlignmentDataset, PipelineError> {
    let name = match suffix {
        Some(s) => format!("{}_{}.bam", sample.output_basename, s),
        None => format!("{}.bam", sample.output_basename),
    };
    let sorted_bam = dir.join(name);

    // removed on drop, after sorting
    let unsorted = tempfile::Builder::new()
        .prefix(&format!("{}.", sample.output_basename))
        .suffix(".unsorted.bam")
        .tempfile_in(dir)?;

    let align = Bowtie2Config { index_prefix: target.index_prefix.clone(), sample: sample.clone() };
    let view = SamtoolsConfig::new(SamtoolsSubcommand::View)
        .field("-b", None)
        .field("-F", Some("4"))
        .field("-o", Some(path_arg(unsorted.path()).as_str()))
        .input("-");
    ProcessPipeline::new(config.tools.stage(&align, config.threads)?)
        .pipe(config.tools.stage(&view, config.threads)?)
        .run()
        .await?;

    let sort = SamtoolsConfig::new(SamtoolsSubcommand::Sort)
        .field("-o", Some(path_arg(&sorted_bam).as_str()))
        .input(path_arg(unsorted.path()));
    ProcessPipeline::new(config.tools.stage(&sort, config.threads)?).run().await?;
    unsorted.close()?;

    let stats = mapping_stats(config.clone(), &sorted_bam, target.reference.length).await?;
    info!("{}: {}", sample.output_basename, stats);
    Ok(AlignmentDataset {
        path: sorted_bam,
        samples: vec![sample.output_basename.clone()],
        stats,
    })
}

/// Maps every sample, in order, against one target.
pub async fn map_samples(
    config: Arc<RunConfig>,
    target: &MappingTarget,
    dir: &Path,
    suffix: Option<&str>,
) -> Result<Vec<AlignmentDataset>, PipelineError> {
    let mut datasets = Vec::with_capacity(config.samples.len());
    for sample in &config.samples {
        info!("Mapping {}", sample);
        datasets.push(map_sample(config.clone(), target, sample, dir, suffix).await?);
    }
    Ok(datasets)
}

/// Combines per-sample BAMs into one cohort BAM. A single dataset is returned as is.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `datasets` - Per-sample alignments, non-empty.
/// * `merged_bam` - Destination when more than one dataset is given.
/// * `reference_length` - For the coverage ratio of the merged stats.
///
/// # Returns
/// (cohort dataset, whether a merge ran).
pub async fn merge_datasets(
    config: Arc<RunConfig>,
    datasets: &[AlignmentDataset],
    merged_bam: &Path,
    reference_length: u64,
) -> Result<(AlignmentDataset, bool), PipelineError> {
    match datasets {
        [] => Err(PipelineError::InvalidData("no alignments to merge".to_string())),
        [single] => {
            info!("Single sample; using {} as the cohort alignment", single.path.display());
            Ok((single.clone(), false))
        }
        many => {
            let mut merge = SamtoolsConfig::new(SamtoolsSubcommand::Merge)
                .field("-f", None)
                .input(path_arg(merged_bam));
            for dataset in many {
                merge = merge.input(path_arg(&dataset.path));
            }
            ProcessPipeline::new(config.tools.stage(&merge, config.threads)?).run().await?;

            let stats = mapping_stats(config.clone(), merged_bam, reference_length).await?;
            info!("Merged {} alignments into {}: {}", many.len(), merged_bam.display(), stats);
            Ok((
                AlignmentDataset {
                    path: merged_bam.to_path_buf(),
                    samples: many.iter().flat_map(|d| d.samples.iter().cloned()).collect(),
                    stats,
                },
                true,
            ))
        }
    }
}

/// Builds the per-base coverage profile of the cohort and extracts zero-coverage gaps.
pub async fn coverage_analysis(
    config: Arc<RunConfig>,
    cohort: &AlignmentDataset,
    reference: &Reference,
) -> Result<CoverageResult, PipelineError> {
    let dir = create_stage_dir(&config, COVERAGE_DIR)?;
    let bedgraph = dir.join(format!("{}_coverage.bedgraph", config.species_abbr));
    let gaps_bed = dir.join(format!("{}_gaps.bed", config.species_abbr));

    let genomecov = BedtoolsConfig {
        subcommand: BedtoolsSubcommand::Genomecov,
        subcommand_fields: vec![
            ("-ibam".to_string(), Some(path_arg(&cohort.path))),
            ("-bga".to_string(), None),
        ],
    };
    ProcessPipeline::new(config.tools.stage(&genomecov, config.threads)?)
        .stdout_to_file(bedgraph.clone())
        .run()
        .await?;

    let profile = CoverageProfile::from_file(&bedgraph)?;
    profile.validate(&reference.contigs)?;
    let summary = profile
        .summary()
        .ok_or_else(|| PipelineError::InvalidData(format!("{} is empty", bedgraph.display())))?;
    let gaps = profile.gaps();
    gaps.write_bed(&gaps_bed)?;

    info!(
        "Depth min {} / max {} / mean {:.2}; {} gap(s) covering {} bp",
        summary.min_depth,
        summary.max_depth,
        summary.mean_depth,
        gaps.count(),
        gaps.total_length()
    );
    Ok(CoverageResult { gaps_bed, summary, gaps })
}

/// Calls variants on the cohort, keeps homozygous calls, then compresses and indexes them.
pub async fn call_variants(
    config: Arc<RunConfig>,
    cohort: &AlignmentDataset,
    reference: &Reference,
) -> Result<VariantResult, PipelineError> {
    let dir = create_stage_dir(&config, VARIANTS_DIR)?;
    let abbr = &config.species_abbr;
    let raw_vcf = dir.join(format!("{}_raw.vcf", abbr));
    let filtered_vcf = dir.join(format!("{}_filtered.vcf", abbr));
    let compressed = dir.join(format!("{}_filtered.vcf.gz", abbr));

    let caller = FreebayesConfig { reference: reference.path.clone(), bam: cohort.path.clone() };
    ProcessPipeline::new(config.tools.stage(&caller, config.threads)?)
        .stdout_to_file(raw_vcf.clone())
        .run()
        .await?;

    let raw = VariantSet::from_file(&raw_vcf)?;
    info!("Called {} variant(s): {}", raw.len(), raw.type_histogram());

    let filtered = raw.filter_homozygous();
    filtered.write(&filtered_vcf)?;
    info!("Kept {} homozygous variant(s): {}", filtered.len(), filtered.type_histogram());

    let bgzip = BgzipConfig { input: filtered_vcf.clone() };
    ProcessPipeline::new(config.tools.stage(&bgzip, config.threads)?)
        .stdout_to_file(compressed.clone())
        .run()
        .await?;
    let tabix = TabixConfig { input: compressed.clone() };
    ProcessPipeline::new(config.tools.stage(&tabix, config.threads)?).run().await?;

    Ok(VariantResult { raw, filtered, compressed })
}

/// Applies the filtered variants to the reference with gaps masked as N, and names
/// the result after the species.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `reference` - Staged reference the variants were called against.
/// * `variants` - Output of `call_variants`.
/// * `coverage` - Output of `coverage_analysis`.
///
/// # Returns
/// `06_consensus/<abbr>_consensus.fasta` with its composition.
pub async fn build_consensus(
    config: Arc<RunConfig>,
    reference: &Reference,
    variants: &VariantResult,
    coverage: &CoverageResult,
) -> Result<SequenceResult, PipelineError> {
    let dir = create_stage_dir(&config, CONSENSUS_DIR)?;
    let abbr = &config.species_abbr;
    let unnamed = dir.join(format!("{}_consensus.unnamed.fasta", abbr));
    let consensus = dir.join(format!("{}_consensus.fasta", abbr));

    let mut fields = vec![("-f".to_string(), Some(path_arg(&reference.path)))];
    if coverage.gaps.is_empty() {
        debug!("No gaps; consensus is built without a mask");
    } else {
        fields.push(("-m".to_string(), Some(path_arg(&coverage.gaps_bed))));
    }
    fields.push(("-o".to_string(), Some(path_arg(&unnamed))));
    let apply = BcftoolsConfig {
        subcommand: BcftoolsSubcommand::Consensus,
        subcommand_fields: fields,
        inputs: vec![path_arg(&variants.compressed)],
    };
    ProcessPipeline::new(config.tools.stage(&apply, config.threads)?).run().await?;

    let records = rename_fasta_records(&unnamed, &consensus, abbr)?;
    fs::remove_file(&unnamed)?;

    if reference.record_count() == 1 && !variants.filtered.has_indels() {
        let unmasked = unmasked_gap_positions(&records[0].seq, &coverage.gaps.intervals);
        if unmasked > 0 {
            return Err(PipelineError::InvalidData(format!(
                "{} gap position(s) are not masked in {}",
                unmasked,
                consensus.display()
            )));
        }
    }

    let composition = SequenceComposition::from_records(&records);
    info!("Consensus {}: {} bp, {} N", consensus.display(), composition.length, composition.ambiguous());
    Ok(SequenceResult { path: consensus, composition })
}

/// Maps every sample again, now against the consensus, and indexes the cohort BAM.
pub async fn remap_to_consensus(
    config: Arc<RunConfig>,
    consensus: &Path,
) -> Result<RemapResult, PipelineError> {
    let dir = create_stage_dir(&config, REMAP_DIR)?;
    let consensus_ref = Reference::load(consensus)?;
    let target = index_reference(config.clone(), &consensus_ref, &dir).await?;

    let datasets = map_samples(config.clone(), &target, &dir, Some("to_consensus")).await?;
    let merged_bam = dir.join(format!("{}_merged_to_consensus.bam", config.species_abbr));
    let (cohort, merged) =
        merge_datasets(config.clone(), &datasets, &merged_bam, target.reference.length).await?;

    let index = SamtoolsConfig::new(SamtoolsSubcommand::Index).input(path_arg(&cohort.path));
    ProcessPipeline::new(config.tools.stage(&index, config.threads)?).run().await?;

    Ok(RemapResult { target, datasets, cohort, merged })
}

/// Polishes the consensus with the remapped reads.
pub async fn polish(
    config: Arc<RunConfig>,
    genome: &Path,
    cohort: &AlignmentDataset,
) -> Result<SequenceResult, PipelineError> {
    let dir = create_stage_dir(&config, POLISH_DIR)?;
    let output = format!("{}_final", config.species_abbr);
    let paired = config.all_paired();
    if !paired {
        info!("Single-end reads present; polishing with --unpaired");
    }

    let pilon = PilonConfig {
        archive: config.polisher_archive.clone(),
        memory_options: config.polisher_options.clone(),
        genome: genome.to_path_buf(),
        bam: cohort.path.clone(),
        paired,
        output: output.clone(),
        outdir: dir.clone(),
    };
    ProcessPipeline::new(config.tools.stage(&pilon, config.threads)?).run().await?;

    let final_fasta = dir.join(format!("{}.fasta", output));
    if !final_fasta.is_file() {
        return Err(PipelineError::InvalidData(format!(
            "polisher did not produce {}",
            final_fasta.display()
        )));
    }
    let composition = SequenceComposition::from_records(&read_fasta_records(&final_fasta)?);
    info!("Final sequence {}: {} bp", final_fasta.display(), composition.length);
    Ok(SequenceResult { path: final_fasta, composition })
}

/// Deletes the downloaded read caches of accession samples.
///
/// # Returns
/// Number of cache entries removed.
pub fn cleanup_accession_cache(config: &RunConfig) -> usize {
    let accessions: Vec<&str> = config.samples.iter().filter_map(Sample::accession_id).collect();
    if accessions.is_empty() {
        return 0;
    }
    if config.args.keep_cache {
        info!("Keeping read caches (--keep-cache)");
        return 0;
    }
    let Some(cache_dir) = &config.settings.cache_dir else {
        debug!("No cache directory configured; nothing to clean");
        return 0;
    };

    let mut removed = 0;
    for accession in accessions {
        let candidate = [format!("{}.sra", accession), format!("{}.cache", accession)]
            .into_iter()
            .map(|name| cache_dir.join(name))
            .find(|path| path.exists());
        let Some(path) = candidate else {
            info!("No cached reads for {} in {}", accession, cache_dir.display());
            continue;
        };
        let result = if path.is_dir() { fs::remove_dir_all(&path) } else { fs::remove_file(&path) };
        match result {
            Ok(()) => {
                info!("Removed {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
    removed
}


/// Runs every stage in order and returns what they reported.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
///
/// # Returns
/// RunStats for the final report.
pub async fn run(config: Arc<RunConfig>) -> Result<RunStats, PipelineError> {
    let mut stats = RunStats {
        species_abbr: config.species_abbr.clone(),
        reference_length: config.reference.length,
        reference_records: config.reference.record_count(),
        ..Default::default()
    };

    stage_header("Mapping");
    let reference_dir = create_stage_dir(&config, REFERENCE_DIR)?;
    let target = index_reference(config.clone(), &config.reference, &reference_dir).await?;
    let mapping_dir = create_stage_dir(&config, MAPPING_DIR)?;
    let datasets = map_samples(config.clone(), &target, &mapping_dir, None).await?;
    stats.mapping.record_samples(&datasets);

    stage_header("Merge");
    let merged_dir = create_stage_dir(&config, MERGED_DIR)?;
    let merged_bam = merged_dir.join(format!("{}_merged.bam", config.species_abbr));
    let (cohort, merged) =
        merge_datasets(config.clone(), &datasets, &merged_bam, target.reference.length).await?;
    if merged {
        stats.mapping.merged = Some(cohort.stats);
    }

    stage_header("Coverage");
    let coverage = coverage_analysis(config.clone(), &cohort, &target.reference).await?;
    stats.coverage = Some(coverage.summary);
    stats.record_gaps(&coverage.gaps);

    stage_header("Variants");
    let variants = call_variants(config.clone(), &cohort, &target.reference).await?;
    stats.raw_variants = variants.raw.type_histogram();
    stats.filtered_variants = variants.filtered.type_histogram();

    stage_header("Consensus");
    let consensus = build_consensus(config.clone(), &target.reference, &variants, &coverage).await?;
    stats.consensus = Some(consensus.composition.clone());

    stage_header("Remap");
    let remap = remap_to_consensus(config.clone(), &consensus.path).await?;
    stats.remap.record_samples(&remap.datasets);
    if remap.merged {
        stats.remap.merged = Some(remap.cohort.stats);
    }

    stage_header("Polish");
    let final_sequence = polish(config.clone(), &remap.target.reference.path, &remap.cohort).await?;
    stats.final_sequence = Some(final_sequence.composition);

    stage_header("Cleanup");
    stats.caches_removed = cleanup_accession_cache(&config);

    Ok(stats)
}
