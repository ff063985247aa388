//! Typed pileup records and per-sample call processing.
//!
//! A [`PileupRecord`] is one sample's raw pileup at one coordinate. Decoding
//! expands the base-call string into per-call classifications aligned with
//! the two quality strings; trimming and the depth cap then reduce it to the
//! allele-count summary stored in an aggregate slot.

use crate::pileup::{parse_field_u64, split_fields, Result};

/// Number of columns in a samtools `pileup -s` line.
pub const PILEUP_FIELDS: usize = 7;

/// ASCII offset of phred-encoded quality characters.
const QUAL_OFFSET: u8 = 33;

/// One sample's alignment pileup at one coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct PileupRecord {
    pub chrom: String,
    pub pos: u64,
    /// Reference base, uppercased.
    pub ref_base: u8,
    /// Depth as reported by the pileup (pre-trim).
    pub depth: u32,
    pub bases: String,
    pub base_quals: String,
    pub map_quals: String,
}

impl PileupRecord {
    /// Parse one pileup line: chrom, pos, ref, depth, bases, base quals,
    /// mapping quals. Extra columns are ignored.
    pub fn parse(line: &str, line_number: usize) -> Result<Self> {
        let fields = split_fields(line, PILEUP_FIELDS, line_number)?;
        let pos = parse_field_u64(fields[1], "position", line_number)?;
        let depth = parse_field_u64(fields[3], "depth", line_number)? as u32;
        let ref_base = fields[2].as_bytes()[0].to_ascii_uppercase();

        Ok(Self {
            chrom: fields[0].to_string(),
            pos,
            ref_base,
            depth,
            bases: fields[4].to_string(),
            base_quals: fields[5].to_string(),
            map_quals: fields[6].to_string(),
        })
    }

    /// True when the reference column is the ambiguous base. Such records
    /// never reach the store.
    pub fn ref_is_ambiguous(&self) -> bool {
        self.ref_base == b'N'
    }

    /// True when the base-quality and mapping-quality strings disagree in
    /// length. Logged by the caller; the record is still processed.
    pub fn quals_mismatched(&self) -> bool {
        self.base_quals.len() != self.map_quals.len()
    }

    /// Decode the base-call string into per-call classifications.
    pub fn decode(&self) -> DecodedCalls {
        DecodedCalls::decode(&self.bases)
    }
}

/// Classification of one decoded pileup call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `.` or `,`: matches the reference base.
    Reference,
    /// An explicit base call, uppercased.
    Substitution(u8),
    /// `N`/`n` or any unrecognized call character.
    Ambiguous,
    /// `*`.
    Deletion,
}

/// Calls recovered from a base-call string, aligned with the quality
/// strings by index.
#[derive(Debug, Clone)]
pub struct DecodedCalls {
    pub kinds: Vec<CallKind>,
    /// An indel marker whose length ran past the end of the string.
    pub malformed_marker: bool,
    ambiguous: u32,
    deletions: u32,
}

impl DecodedCalls {
    /// Scan a pileup base string. `^X` consumes the following mapping
    /// quality character, `$` is a bare marker, and `+N<seq>` / `-N<seq>`
    /// indel runs (multi-digit counts) are skipped entirely.
    fn decode(bases: &str) -> Self {
        let bytes = bases.as_bytes();
        let mut kinds = Vec::with_capacity(bytes.len());
        let mut ambiguous = 0u32;
        let mut deletions = 0u32;
        let mut malformed = false;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'^' => i += 2,
                b'$' => i += 1,
                b'+' | b'-' => {
                    let mut j = i + 1;
                    let mut len: usize = 0;
                    let mut has_digits = false;
                    while j < bytes.len() && bytes[j].is_ascii_digit() {
                        len = len * 10 + (bytes[j] - b'0') as usize;
                        has_digits = true;
                        j += 1;
                    }
                    if !has_digits || j + len > bytes.len() {
                        malformed = true;
                        i = bytes.len();
                    } else {
                        i = j + len;
                    }
                }
                b'.' | b',' => {
                    kinds.push(CallKind::Reference);
                    i += 1;
                }
                b'*' => {
                    kinds.push(CallKind::Deletion);
                    deletions += 1;
                    i += 1;
                }
                b => {
                    let up = b.to_ascii_uppercase();
                    if matches!(up, b'A' | b'C' | b'G' | b'T') {
                        kinds.push(CallKind::Substitution(up));
                    } else {
                        kinds.push(CallKind::Ambiguous);
                        ambiguous += 1;
                    }
                    i += 1;
                }
            }
        }

        Self {
            kinds,
            malformed_marker: malformed,
            ambiguous,
            deletions,
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Fraction of calls that are informative (not ambiguous).
    pub fn informative_fraction(&self) -> f64 {
        if self.kinds.is_empty() {
            0.0
        } else {
            1.0 - self.ambiguous as f64 / self.kinds.len() as f64
        }
    }

    /// Fraction of calls that are deletions.
    pub fn deletion_fraction(&self) -> f64 {
        if self.kinds.is_empty() {
            0.0
        } else {
            self.deletions as f64 / self.kinds.len() as f64
        }
    }

    /// Apply the quality trim and the depth cap, resolving reference
    /// matches to `ref_base`.
    ///
    /// Quality thresholds are phred values; a call survives when both its
    /// base and mapping quality meet them. Mismatched quality-string
    /// lengths are tolerated by processing up to the shorter one.
    pub fn to_sample_call(
        &self,
        rec: &PileupRecord,
        min_base_qual: u8,
        min_map_qual: u8,
        depth_cap: u32,
    ) -> SampleCall {
        let bq = rec.base_quals.as_bytes();
        let mq = rec.map_quals.as_bytes();
        let limit = bq.len().min(mq.len());
        let mut call = SampleCall::default();

        for (i, kind) in self.kinds.iter().enumerate().take(limit) {
            if call.depth >= depth_cap {
                break;
            }
            let base_q = bq[i].saturating_sub(QUAL_OFFSET);
            let map_q = mq[i].saturating_sub(QUAL_OFFSET);
            if base_q < min_base_qual || map_q < min_map_qual {
                continue;
            }
            let base = match kind {
                CallKind::Reference => rec.ref_base,
                CallKind::Substitution(b) => *b,
                CallKind::Ambiguous | CallKind::Deletion => continue,
            };
            if let Some(idx) = allele_index(base) {
                call.counts[idx] += 1;
                call.depth += 1;
            }
        }

        call
    }
}

/// Index of a base in the A/C/G/T allele order.
pub fn allele_index(base: u8) -> Option<usize> {
    match base {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Per-sample, post-trim allele counts stored in an aggregate slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleCall {
    /// Counts in A/C/G/T order, reference matches resolved.
    pub counts: [u32; 4],
    /// Calls surviving the trim and the cap.
    pub depth: u32,
}

impl SampleCall {
    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    /// Index of this sample's most supported allele.
    pub fn max_allele(&self) -> Option<usize> {
        if self.depth == 0 {
            return None;
        }
        let mut best = 0;
        for i in 1..4 {
            if self.counts[i] > self.counts[best] {
                best = i;
            }
        }
        Some(best)
    }

    /// Fraction of surviving calls that disagree with the reference.
    pub fn non_ref_fraction(&self, ref_base: u8) -> f64 {
        if self.depth == 0 {
            return 0.0;
        }
        let ref_count = allele_index(ref_base).map_or(0, |i| self.counts[i]);
        (self.depth - ref_count) as f64 / self.depth as f64
    }
}
