//! Per-locus statistical evaluation.
//!
//! The engine only depends on the [`SiteModel`] trait: a genotype fit and a
//! significance statistic, both mutating the aggregate in place. That keeps
//! alternative models swappable without touching the merge or aggregation
//! code. [`GenotypeMixtureModel`] is the shipped implementation.

use crate::config::{EmSettings, Ploidy};
use crate::record::allele_index;
use crate::store::Aggregate;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Minimum contributing samples before the outlier test is attempted.
pub const MIN_TEST_SAMPLES: usize = 2;

/// Monte-Carlo rounds drawn for the outlier test's null distribution.
pub const TEST_ROUNDS: usize = 200;

/// Consensus alphabet: the four bases followed by the IUPAC heterozygote
/// codes M=A/C, R=A/G, W=A/T, S=C/G, Y=C/T, K=G/T.
pub const CONSENSUS_LETTERS: [u8; 10] = *b"ACGTMRWSYK";

/// Bounds on the fitted per-call error rate.
const MIN_ERROR: f64 = 1e-6;
const MAX_ERROR: f64 = 0.4;

/// Starting per-call error rate, refined by the fit.
const SEQ_ERROR: f64 = 0.01;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("no usable calls at this locus")]
    NoData,

    #[error("genotype fit did not converge within {iterations} iterations")]
    NonConvergent { iterations: usize },
}

/// Fitted genotype-model outputs attached to an aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFit {
    /// Posterior of the reference model and of the best variant model.
    pub posteriors: [f64; 2],
    /// Log10 likelihoods of the candidate genotypes (ref-hom, het,
    /// alt-hom), up to the shared binomial coefficient.
    pub values: [f64; 3],
    /// Index of the consensus code in [`CONSENSUS_LETTERS`].
    pub consensus: usize,
    /// Per-sample index of the most supported allele.
    pub sample_extremes: Vec<Option<usize>>,
}

impl ModelFit {
    pub fn consensus_letter(&self) -> u8 {
        CONSENSUS_LETTERS[self.consensus]
    }
}

/// The two operations the engine needs from a statistical model.
pub trait SiteModel: Sync {
    /// Fit genotype posteriors, writing [`Aggregate::fit`].
    fn fit(&self, agg: &mut Aggregate, em: &EmSettings) -> Result<(), ModelError>;

    /// Compute the outlier statistic, writing [`Aggregate::statistic`].
    ///
    /// A locus with fewer than `min_samples` contributing samples keeps the
    /// negative "not computed" sentinel; that is not an error.
    fn significance(
        &self,
        agg: &mut Aggregate,
        min_samples: usize,
        rounds: usize,
    ) -> Result<(), ModelError>;
}

/// Genotype mixture over pooled allele counts, with a Dixon-style
/// Monte-Carlo outlier test across per-sample non-reference fractions.
#[derive(Debug, Clone)]
pub struct GenotypeMixtureModel {
    pub ploidy: Ploidy,
    /// Allele bound from configuration; below 2 the variant models are
    /// disabled, 0 means unbounded.
    pub max_alleles: u32,
}

impl GenotypeMixtureModel {
    pub fn new(ploidy: Ploidy, max_alleles: u32) -> Self {
        Self {
            ploidy,
            max_alleles,
        }
    }

    fn pooled_counts(agg: &Aggregate) -> [u64; 4] {
        let mut counts = [0u64; 4];
        for call in agg.samples.iter().flatten() {
            for i in 0..4 {
                counts[i] += call.counts[i] as u64;
            }
        }
        counts
    }
}

/// Binomial log10 likelihood without the shared coefficient term.
fn binom_log10(k: u64, n: u64, p: f64) -> f64 {
    let k = k as f64;
    let n = n as f64;
    k * p.log10() + (n - k) * (1.0 - p).log10()
}

/// Prior-weighted posteriors from log10 likelihoods.
fn posteriors(logl: &[f64; 3], priors: &[f64; 3]) -> [f64; 3] {
    let max = logl
        .iter()
        .zip(priors)
        .filter(|(_, &p)| p > 0.0)
        .map(|(&l, _)| l)
        .fold(f64::NEG_INFINITY, f64::max);
    let mut weights = [0.0f64; 3];
    let mut total = 0.0;
    for i in 0..3 {
        if priors[i] > 0.0 {
            weights[i] = priors[i] * 10f64.powf(logl[i] - max);
            total += weights[i];
        }
    }
    for w in weights.iter_mut() {
        *w /= total;
    }
    weights
}

/// Consensus index for a heterozygous ref/alt pair.
fn het_code(a: usize, b: usize) -> usize {
    match (a.min(b), a.max(b)) {
        (0, 1) => 4, // M
        (0, 2) => 5, // R
        (0, 3) => 6, // W
        (1, 2) => 7, // S
        (1, 3) => 8, // Y
        _ => 9,      // K
    }
}

impl SiteModel for GenotypeMixtureModel {
    fn fit(&self, agg: &mut Aggregate, em: &EmSettings) -> Result<(), ModelError> {
        let counts = Self::pooled_counts(agg);
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return Err(ModelError::NoData);
        }
        let ref_idx = allele_index(agg.ref_base).ok_or(ModelError::NoData)?;

        let allow_alt = self.max_alleles == 0 || self.max_alleles >= 2;
        let mut alt_idx = ref_idx;
        if allow_alt {
            for i in 0..4 {
                if i != ref_idx && (alt_idx == ref_idx || counts[i] > counts[alt_idx]) {
                    alt_idx = i;
                }
            }
        }

        let k = if alt_idx == ref_idx { 0 } else { counts[alt_idx] };
        let n = counts[ref_idx] + k;
        if n == 0 {
            return Err(ModelError::NoData);
        }
        let q = k as f64 / n as f64;

        let priors = match self.ploidy {
            Ploidy::Diploid => [1.0 / 3.0; 3],
            Ploidy::Haploid => [0.5, 0.0, 0.5],
        };

        // Fixed-point refinement of the error rate: the homozygous
        // components imply it, the het component carries none.
        let budget = em.budget();
        let mut e = SEQ_ERROR;
        let mut converged = false;
        for _ in 0..budget {
            let logl = [
                binom_log10(k, n, e),
                binom_log10(k, n, 0.5),
                binom_log10(k, n, 1.0 - e),
            ];
            let post = posteriors(&logl, &priors);
            let hom_weight = post[0] + post[2];
            let e_new = if hom_weight > 1e-12 {
                ((post[0] * q + post[2] * (1.0 - q)) / hom_weight).clamp(MIN_ERROR, MAX_ERROR)
            } else {
                e
            };
            if (e_new - e).abs() < em.eps {
                e = e_new;
                converged = true;
                break;
            }
            e = e_new;
        }
        if !converged {
            return Err(ModelError::NonConvergent { iterations: budget });
        }

        let values = [
            binom_log10(k, n, e),
            binom_log10(k, n, 0.5),
            binom_log10(k, n, 1.0 - e),
        ];
        let post = posteriors(&values, &priors);
        let p0 = post[0];
        let (p1, variant_hom) = if post[2] >= post[1] {
            (post[2], true)
        } else {
            (post[1], false)
        };

        let consensus = if alt_idx == ref_idx || p0 >= p1 {
            ref_idx
        } else if variant_hom || self.ploidy == Ploidy::Haploid {
            alt_idx
        } else {
            het_code(ref_idx, alt_idx)
        };

        let sample_extremes = agg
            .samples
            .iter()
            .map(|slot| slot.as_ref().and_then(|call| call.max_allele()))
            .collect();

        agg.fit = Some(ModelFit {
            posteriors: [p0, p1],
            values,
            consensus,
            sample_extremes,
        });
        Ok(())
    }

    fn significance(
        &self,
        agg: &mut Aggregate,
        min_samples: usize,
        rounds: usize,
    ) -> Result<(), ModelError> {
        let mut values: Vec<f64> = agg
            .samples
            .iter()
            .flatten()
            .filter(|call| !call.is_empty())
            .map(|call| call.non_ref_fraction(agg.ref_base))
            .collect();
        if values.len() < min_samples {
            return Ok(());
        }
        values.sort_by(f64::total_cmp);

        let n = values.len();
        let range = values[n - 1] - values[0];
        if range <= f64::EPSILON {
            agg.statistic = 1.0;
            return Ok(());
        }
        let q_obs = (values[n - 1] - values[n - 2]) / range;

        // Null distribution by simulation, seeded from the data so runs
        // are reproducible.
        let seed = Self::pooled_counts(agg)
            .iter()
            .fold(n as u64, |acc, &c| acc.rotate_left(16) ^ c);
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut draw = vec![0.0f64; n];
        let mut exceed = 0usize;
        for _ in 0..rounds {
            for v in draw.iter_mut() {
                *v = rng.gen::<f64>();
            }
            draw.sort_by(f64::total_cmp);
            let r = draw[n - 1] - draw[0];
            if r <= f64::EPSILON || (draw[n - 1] - draw[n - 2]) / r >= q_obs {
                exceed += 1;
            }
        }
        agg.statistic = (exceed as f64 + 1.0) / (rounds as f64 + 1.0);
        Ok(())
    }
}
