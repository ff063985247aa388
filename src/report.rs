//! Pseudo-VCF output and batch classification counters.

use crate::config::CallerConfig;
use crate::store::AggregateStore;
use std::io::{self, Write};

/// QUAL substituted when the statistic underflows the log transform.
const QUAL_SATURATION: f64 = 999.999;

/// Statistics below this are numerically indistinguishable from zero.
const STAT_FLOOR: f64 = 1e-100;

/// Batch-scoped substitution-class counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub transitions: u64,
    pub transversions: u64,
}

impl BatchCounts {
    pub fn add(&mut self, other: BatchCounts) {
        self.transitions += other.transitions;
        self.transversions += other.transversions;
    }
}

/// Write the fixed metadata block and the column header.
pub fn write_header<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "##fileformat=VCFv4.2")?;
    writeln!(out, "##fileDate={}", chrono::Local::now().format("%Y%m%d"))?;
    writeln!(out, "##source=multiGeMSV2.0")?;
    writeln!(out, "##reference=UNKNOWN")?;
    writeln!(
        out,
        "##contig=<ID=NA,length=unknown,assembly=NA,md5=NA,species=NA,taxonomy=unknown>"
    )?;
    writeln!(out, "##phasing=partial")?;
    writeln!(
        out,
        "##INFO=<ID=NA,Number=NA,Type=NA,Description=\"INFO is not applicable in this version.\">"
    )?;
    writeln!(out, "##FILTER=<ID=q10,Description=\"Quality below 10\">")?;
    writeln!(out, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO")
}

/// Emission pass: one row per qualified aggregate whose statistic is below
/// the output threshold, in sorted key order. Returns the rows written.
pub fn emit_rows<W: Write>(
    store: &AggregateStore,
    cfg: &CallerConfig,
    out: &mut W,
) -> io::Result<u64> {
    let mut itoa_buf = itoa::Buffer::new();
    let mut ryu_buf = ryu::Buffer::new();
    let mut emitted = 0u64;

    for locus in store.keys() {
        let Some(agg) = store.get(&locus) else {
            continue;
        };
        if !agg.qualified || agg.statistic >= cfg.alpha {
            continue;
        }
        let Some(fit) = &agg.fit else {
            continue;
        };

        out.write_all(locus.chrom.as_bytes())?;
        out.write_all(b"\t")?;
        out.write_all(itoa_buf.format(locus.pos).as_bytes())?;
        out.write_all(b"\tNA\t")?;
        out.write_all(&[agg.ref_base])?;
        out.write_all(b"\tNA\t")?;

        // QUAL/FILTER: defined only when a sample contributed and the
        // statistic was computed
        if agg.sample_count() >= 1 && agg.statistic >= 0.0 {
            let qual = if agg.statistic < STAT_FLOOR {
                QUAL_SATURATION
            } else {
                -10.0 * agg.statistic.ln()
            };
            out.write_all(ryu_buf.format(qual).as_bytes())?;
            out.write_all(b"\tPASS\t")?;
        } else {
            out.write_all(b"NA\tNA\t")?;
        }

        // INFO: per-sample extreme-allele summaries (1-based, NA when the
        // sample is absent) then the two posteriors
        for (i, extreme) in fit.sample_extremes.iter().enumerate() {
            match extreme {
                Some(idx) => write!(out, "{}:{},", i, idx + 1)?,
                None => write!(out, "{}:NA,", i)?,
            }
        }
        write!(out, "P0:{}", ryu_buf.format(fit.posteriors[0]))?;
        write!(out, ",P1:{}", ryu_buf.format(fit.posteriors[1]))?;

        // Trailing columns: contributing-sample count, posteriors, the raw
        // per-allele values, and the statistic itself
        write!(out, "\tSample Number: {}", agg.sample_count())?;
        for p in fit.posteriors {
            out.write_all(b"\t")?;
            out.write_all(ryu_buf.format(p).as_bytes())?;
        }
        for v in fit.values {
            out.write_all(b"\t")?;
            out.write_all(ryu_buf.format(v).as_bytes())?;
        }
        out.write_all(b"\t")?;
        out.write_all(ryu_buf.format(agg.statistic).as_bytes())?;
        out.write_all(b"\n")?;

        emitted += 1;
    }

    Ok(emitted)
}

/// Classification pass: over every aggregate, count a transition or
/// transversion when the reference-model posterior clears the SNP
/// threshold and the consensus differs from the reference base.
pub fn classify(store: &AggregateStore, p_snp: f64) -> BatchCounts {
    let mut counts = BatchCounts::default();
    for (_, agg) in store.iter() {
        let Some(fit) = &agg.fit else {
            continue;
        };
        if fit.posteriors[0] > p_snp {
            continue;
        }
        let consensus = fit.consensus_letter();
        if consensus == agg.ref_base {
            continue;
        }
        if is_transition(agg.ref_base, consensus) {
            counts.transitions += 1;
        } else if is_transversion(agg.ref_base, consensus) {
            counts.transversions += 1;
        }
    }
    counts
}

fn is_transition(a: u8, b: u8) -> bool {
    matches!(
        (a, b),
        (b'A', b'G') | (b'G', b'A') | (b'C', b'T') | (b'T', b'C')
    )
}

fn is_transversion(a: u8, b: u8) -> bool {
    let acgt = |x: u8| matches!(x, b'A' | b'C' | b'G' | b'T');
    acgt(a) && acgt(b) && a != b && !is_transition(a, b)
}
