//! Coordinate-keyed aggregation of per-sample calls.
//!
//! The store lives for one batch: records check in, disqualified loci are
//! pruned, survivors are evaluated on the rayon pool, the reporter reads
//! the final state, and the store is cleared before the next round.

use crate::config::EmSettings;
use crate::model::{ModelFit, SiteModel, MIN_TEST_SAMPLES, TEST_ROUNDS};
use crate::record::SampleCall;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

/// Composite store key: chromosome label plus genomic coordinate.
///
/// Keying on the pair keeps interleaved multi-chromosome input from
/// colliding at equal coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locus {
    pub chrom: String,
    pub pos: u64,
}

impl Locus {
    pub fn new(chrom: impl Into<String>, pos: u64) -> Self {
        Self {
            chrom: chrom.into(),
            pos,
        }
    }
}

impl std::fmt::Display for Locus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.chrom, self.pos)
    }
}

/// Per-locus accumulation of up to `sample_count` records plus the fitted
/// model outputs.
#[derive(Debug, Clone)]
pub struct Aggregate {
    /// Reference base, uppercased.
    pub ref_base: u8,
    /// One slot per sample index; `None` means no data at this locus.
    pub samples: Vec<Option<SampleCall>>,
    /// Set once any contributing record passes admission.
    pub qualified: bool,
    pub fit: Option<ModelFit>,
    /// Outlier statistic; negative until computed.
    pub statistic: f64,
}

impl Aggregate {
    pub fn new(sample_count: usize, ref_base: u8) -> Self {
        Self {
            ref_base,
            samples: vec![None; sample_count],
            qualified: false,
            fit: None,
            statistic: -1.0,
        }
    }

    /// Number of samples that contributed a record at this locus.
    pub fn sample_count(&self) -> usize {
        self.samples.iter().flatten().count()
    }
}

/// Batch-scoped mapping from locus to aggregate.
pub struct AggregateStore {
    map: FxHashMap<Locus, Aggregate>,
    sample_count: usize,
}

impl AggregateStore {
    pub fn new(sample_count: usize) -> Self {
        Self {
            map: FxHashMap::default(),
            sample_count,
        }
    }

    /// Existing aggregate for `locus`, or a fresh unqualified one.
    pub fn get_or_create(&mut self, locus: Locus, ref_base: u8) -> &mut Aggregate {
        self.map
            .entry(locus)
            .or_insert_with(|| Aggregate::new(self.sample_count, ref_base))
    }

    /// Insert one sample's contribution, creating the aggregate on first
    /// touch. A later record for the same slot in the same batch
    /// overwrites the earlier one.
    pub fn insert(&mut self, locus: Locus, sample: usize, ref_base: u8, call: SampleCall) {
        let agg = self.get_or_create(locus, ref_base);
        agg.samples[sample] = Some(call);
    }

    /// Mark the aggregate at `locus` qualified. Idempotent; a locus that
    /// was never inserted is a no-op.
    pub fn enable(&mut self, locus: &Locus) {
        if let Some(agg) = self.map.get_mut(locus) {
            agg.qualified = true;
        }
    }

    /// Drop every aggregate that never qualified; returns how many were
    /// removed.
    pub fn prune_unqualified(&mut self) -> usize {
        let before = self.map.len();
        self.map.retain(|_, agg| agg.qualified);
        before - self.map.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, locus: &Locus) -> Option<&Aggregate> {
        self.map.get(locus)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Locus, &Aggregate)> {
        self.map.iter()
    }

    /// Sorted snapshot of the current keys. The reporter iterates this so
    /// row order is deterministic.
    pub fn keys(&self) -> Vec<Locus> {
        let mut keys: Vec<Locus> = self.map.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Fit and test every aggregate on the rayon pool.
    ///
    /// The key set is structurally frozen for the whole fan-out; each
    /// worker holds exclusive access to exactly one aggregate. A failed
    /// evaluation marks its aggregate unqualified instead of aborting the
    /// round.
    pub fn evaluate_parallel<M: SiteModel>(&mut self, model: &M, em: &EmSettings, debug: bool) {
        self.map.par_iter_mut().for_each(|(locus, agg)| {
            if debug {
                eprintln!("evaluating {}", locus);
            }
            let result = model
                .fit(agg, em)
                .and_then(|_| model.significance(agg, MIN_TEST_SAMPLES, TEST_ROUNDS));
            if let Err(e) = result {
                if debug {
                    eprintln!("evaluation failed at {}: {}", locus, e);
                }
                agg.qualified = false;
            }
        });
    }
}
