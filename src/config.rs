//! Runtime configuration for the caller.

use crate::filter::AdmissionGates;

/// Genotype-model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ploidy {
    #[default]
    Diploid,
    Haploid,
}

impl Ploidy {
    /// Map the CLI flag (0 = diploid, 1 = haploid) onto the enum.
    pub fn from_flag(flag: u8) -> Self {
        if flag == 1 {
            Ploidy::Haploid
        } else {
            Ploidy::Diploid
        }
    }
}

/// Convergence controls handed through to the genotype fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmSettings {
    /// Step size of the maximum-likelihood iteration.
    pub step: f64,
    /// Convergence epsilon.
    pub eps: f64,
    /// End condition; together with `step` it bounds the iteration count.
    pub end: f64,
}

impl EmSettings {
    /// Iteration budget implied by the end condition and step size.
    pub fn budget(&self) -> usize {
        let rounds = (self.end / self.step).ceil();
        if rounds.is_finite() && rounds >= 1.0 {
            rounds as usize
        } else {
            1
        }
    }
}

impl Default for EmSettings {
    fn default() -> Self {
        Self {
            step: 1e-3,
            eps: 1e-6,
            end: 1.0,
        }
    }
}

/// Full configuration surface of a calling run.
#[derive(Debug, Clone)]
pub struct CallerConfig {
    /// Number of per-sample input streams.
    pub sample_count: usize,
    pub ploidy: Ploidy,
    pub em: EmSettings,
    /// Maximum number of alleles considered per site (0 = unbounded).
    pub max_alleles: u32,
    /// Output significance threshold: emit rows whose statistic is below it.
    pub alpha: f64,
    /// Posterior threshold for counting a site as a SNP in the Ti/Tv pass.
    pub p_snp: f64,
    /// Per-record call cap applied after quality trimming.
    pub depth_cap: u32,
    /// Minimum base quality (phred) kept by the trim.
    pub min_base_qual: u8,
    /// Minimum mapping quality (phred) kept by the trim.
    pub min_map_qual: u8,
    /// Minimum informative (non-N) call fraction for admission.
    pub min_informative: f64,
    /// Maximum deletion call fraction for admission.
    pub max_deletion: f64,
    /// Records buffered per sample per round.
    pub round_size: usize,
    /// Print per-round progress to stderr.
    pub debug: bool,
}

impl CallerConfig {
    pub fn new(sample_count: usize) -> Self {
        Self {
            sample_count,
            ploidy: Ploidy::Diploid,
            em: EmSettings::default(),
            max_alleles: 255,
            alpha: 0.05,
            p_snp: 0.05,
            depth_cap: 255,
            min_base_qual: 13,
            min_map_qual: 0,
            min_informative: 0.8,
            max_deletion: 0.1,
            round_size: 10_000,
            debug: false,
        }
    }

    /// Set the per-round buffer size (builder pattern).
    pub fn with_round_size(mut self, round_size: usize) -> Self {
        self.round_size = round_size;
        self
    }

    /// Set the output significance threshold (builder pattern).
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the genotype-model selector (builder pattern).
    pub fn with_ploidy(mut self, ploidy: Ploidy) -> Self {
        self.ploidy = ploidy;
        self
    }

    /// Admission gates derived from the configured ratios.
    pub fn gates(&self) -> AdmissionGates {
        AdmissionGates::new(self.min_informative, self.max_deletion)
    }
}
