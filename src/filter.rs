//! Record admission gating.

use crate::record::DecodedCalls;

/// Quality-ratio gates deciding whether a record enables its aggregate.
///
/// Admission is independent of insertion: every record lands in its sample
/// slot, but only admissible records mark the locus as qualified for
/// reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionGates {
    /// Minimum informative (non-N) call fraction, inclusive.
    pub min_informative: f64,
    /// Maximum deletion call fraction, exclusive.
    pub max_deletion: f64,
}

impl AdmissionGates {
    pub fn new(min_informative: f64, max_deletion: f64) -> Self {
        Self {
            min_informative,
            max_deletion,
        }
    }

    pub fn admits(&self, calls: &DecodedCalls) -> bool {
        calls.informative_fraction() >= self.min_informative
            && calls.deletion_fraction() < self.max_deletion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PileupRecord;

    fn decoded(bases: &str) -> DecodedCalls {
        PileupRecord {
            chrom: "chr1".to_string(),
            pos: 1,
            ref_base: b'A',
            depth: bases.len() as u32,
            bases: bases.to_string(),
            base_quals: String::new(),
            map_quals: String::new(),
        }
        .decode()
    }

    #[test]
    fn test_admits_clean_record() {
        let gates = AdmissionGates::new(0.8, 0.1);
        assert!(gates.admits(&decoded(".........C")));
    }

    #[test]
    fn test_rejects_ambiguous_heavy_record() {
        let gates = AdmissionGates::new(0.8, 0.1);
        // 3 of 10 calls ambiguous: informative fraction 0.7
        assert!(!gates.admits(&decoded(".......NNN")));
    }

    #[test]
    fn test_rejects_deletion_heavy_record() {
        let gates = AdmissionGates::new(0.5, 0.1);
        assert!(!gates.admits(&decoded("........**")));
    }

    #[test]
    fn test_boundaries() {
        let gates = AdmissionGates::new(0.8, 0.2);
        // Informative bound is inclusive: exactly 0.8 passes
        assert!(gates.admits(&decoded("........NN")));
        // Deletion bound is exclusive: exactly 0.2 fails
        assert!(!gates.admits(&decoded("........**")));
    }
}
