// src/utils/stats.rs: per-run statistics collected from stage results and the end-of-run report

use std::fmt::Write as _;

use crate::utils::bed::{CoverageSummary, GapSet};
use crate::utils::fastx::SequenceComposition;
use crate::utils::sambam::{AlignmentDataset, MappingStats};
use crate::utils::vcf::TypeHistogram;

/// Rounds to 2 decimals for reporting.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Mapping results for one generation (initial or remap).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingRound {
    pub per_sample: Vec<(String, MappingStats)>,
    /// Only set when several samples were merged.
    pub merged: Option<MappingStats>,
}

impl MappingRound {
    pub fn record_samples(&mut self, datasets: &[AlignmentDataset]) {
        for dataset in datasets {
            let name = dataset.samples.join(",");
            self.per_sample.push((name, dataset.stats));
        }
    }
}

/// Everything the run reports, filled in by the orchestrator as stages return.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub species_abbr: String,
    pub reference_length: u64,
    pub reference_records: usize,
    pub mapping: MappingRound,
    pub coverage: Option<CoverageSummary>,
    pub gap_count: usize,
    pub gap_length: u64,
    pub raw_variants: TypeHistogram,
    pub filtered_variants: TypeHistogram,
    pub consensus: Option<SequenceComposition>,
    pub remap: MappingRound,
    pub final_sequence: Option<SequenceComposition>,
    pub caches_removed: usize,
}

impl RunStats {
    pub fn record_gaps(&mut self, gaps: &GapSet) {
        self.gap_count = gaps.count();
        self.gap_length = gaps.total_length();
    }

    /// Multi-line summary block printed at the end of the run.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=============== Run summary: {} ===============", self.species_abbr);
        let _ = writeln!(
            out,
            "Reference: {} bp in {} record(s)",
            self.reference_length, self.reference_records
        );
        write_round(&mut out, "Mapping", &self.mapping);
        match &self.coverage {
            Some(c) => {
                let _ = writeln!(
                    out,
                    "Coverage depth: min {}, max {}, mean {:.2}",
                    c.min_depth, c.max_depth, c.mean_depth
                );
            }
            None => {
                let _ = writeln!(out, "Coverage depth: n/a");
            }
        }
        let _ = writeln!(out, "Gaps: {} interval(s), {} bp masked", self.gap_count, self.gap_length);
        let _ = writeln!(out, "Variants called: {} ({})", self.raw_variants.total(), self.raw_variants);
        let _ = writeln!(
            out,
            "Variants kept: {} ({})",
            self.filtered_variants.total(),
            self.filtered_variants
        );
        write_composition(&mut out, "Consensus", self.consensus.as_ref());
        write_round(&mut out, "Remap", &self.remap);
        write_composition(&mut out, "Final", self.final_sequence.as_ref());
        if self.caches_removed > 0 {
            let _ = writeln!(out, "Read caches removed: {}", self.caches_removed);
        }
        out
    }
}

fn write_round(out: &mut String, label: &str, round: &MappingRound) {
    for (name, stats) in &round.per_sample {
        let _ = writeln!(out, "{} {}: {}", label, name, stats);
    }
    if let Some(stats) = &round.merged {
        let _ = writeln!(out, "{} merged: {}", label, stats);
    }
}

fn write_composition(out: &mut String, label: &str, composition: Option<&SequenceComposition>) {
    let Some(c) = composition else {
        let _ = writeln!(out, "{} sequence: n/a", label);
        return;
    };
    let counts: Vec<String> = c.counts.iter().map(|(base, n)| format!("{}={}", base, n)).collect();
    let _ = writeln!(
        out,
        "{} sequence {}: {} bp [{}]",
        label,
        c.ids.join(","),
        c.length,
        counts.join(" ")
    );
}
