//! Joint mode: one pre-merged pileup where every line carries all samples.
//!
//! Each line is evaluated independently, so there is no batching, no
//! watermark, and no store; a fresh aggregate is built per line, gated on
//! total coverage, fitted, and emitted in a compact tabular format.

use crate::config::CallerConfig;
use crate::model::{SiteModel, MIN_TEST_SAMPLES, TEST_ROUNDS};
use crate::pileup::{parse_u64_fast, PileupError, Result};
use crate::record::PileupRecord;
use crate::store::Aggregate;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Lower statistic bound on emission; rows at or below it are reported by
/// the streaming caller instead.
const MIN_STATISTIC: f64 = 0.1;

/// Minimum mean per-sample coverage required before a line is evaluated.
const MIN_MEAN_COVERAGE: u64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JointSummary {
    pub lines: u64,
    pub evaluated: u64,
    pub rows_emitted: u64,
}

impl fmt::Display for JointSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lines: {}, Evaluated: {}, Emitted: {}",
            self.lines, self.evaluated, self.rows_emitted
        )
    }
}

/// Single-input joint caller.
#[derive(Debug, Clone)]
pub struct JointCommand {
    pub config: CallerConfig,
}

impl JointCommand {
    pub fn new(config: CallerConfig) -> Self {
        Self { config }
    }

    pub fn run<P: AsRef<Path>, W: Write, M: SiteModel>(
        &self,
        input: P,
        model: &M,
        output: &mut W,
    ) -> Result<JointSummary> {
        let file = File::open(&input).map_err(|source| PileupError::Open {
            path: input.as_ref().display().to_string(),
            source,
        })?;
        self.run_reader(BufReader::with_capacity(256 * 1024, file), model, output)
    }

    pub fn run_reader<R: BufRead, W: Write, M: SiteModel>(
        &self,
        reader: R,
        model: &M,
        output: &mut W,
    ) -> Result<JointSummary> {
        let cfg = &self.config;
        let gates = cfg.gates();
        let mut out = BufWriter::with_capacity(8 * 1024 * 1024, output);
        let mut summary = JointSummary::default();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            summary.lines += 1;

            let mut tokens = line.split_ascii_whitespace();
            let Some(gene) = tokens.next() else { continue };
            let Some(pos_str) = tokens.next() else { continue };
            let Some(ref_str) = tokens.next() else { continue };
            let Some(pos) = parse_u64_fast(pos_str.as_bytes()) else {
                if cfg.debug {
                    eprintln!("skipping line with bad position: '{}'", pos_str);
                }
                continue;
            };
            let ref_base = ref_str.as_bytes()[0].to_ascii_uppercase();
            if ref_base == b'N' {
                continue;
            }

            let mut agg = Aggregate::new(cfg.sample_count, ref_base);
            let mut depths = vec![0u64; cfg.sample_count];
            let mut base_strings = vec!["*".to_string(); cfg.sample_count];
            let mut line_ok = true;

            for i in 0..cfg.sample_count {
                let Some(cov_str) = tokens.next() else {
                    line_ok = false;
                    break;
                };
                let Some(cov) = parse_u64_fast(cov_str.as_bytes()) else {
                    line_ok = false;
                    break;
                };
                if cov == 0 {
                    // Zero-coverage placeholder: a bases token, and a lone
                    // quality token when the bases column is "*"
                    let Some(bases) = tokens.next() else {
                        line_ok = false;
                        break;
                    };
                    if bases == "*" {
                        tokens.next();
                    }
                    continue;
                }

                let (Some(bases), Some(bq), Some(mq)) =
                    (tokens.next(), tokens.next(), tokens.next())
                else {
                    line_ok = false;
                    break;
                };
                depths[i] = cov;
                base_strings[i] = bases.to_string();
                if bq.len() != mq.len() {
                    continue;
                }

                let rec = PileupRecord {
                    chrom: gene.to_string(),
                    pos,
                    ref_base,
                    depth: cov as u32,
                    bases: bases.to_string(),
                    base_quals: bq.to_string(),
                    map_quals: mq.to_string(),
                };
                let decoded = rec.decode();
                if decoded.malformed_marker {
                    continue;
                }
                if gates.admits(&decoded) {
                    let call = decoded.to_sample_call(
                        &rec,
                        cfg.min_base_qual,
                        cfg.min_map_qual,
                        cfg.depth_cap,
                    );
                    agg.samples[i] = Some(call);
                    agg.qualified = true;
                }
            }

            if !line_ok {
                if cfg.debug {
                    eprintln!("skipping truncated line at position {}", pos);
                }
                continue;
            }

            let cov_sum: u64 = depths.iter().sum();
            let cov_num = depths.iter().filter(|&&c| c > 0).count() as u64;
            if !agg.qualified || cov_sum <= cov_num * MIN_MEAN_COVERAGE {
                continue;
            }

            summary.evaluated += 1;
            let fitted = model
                .fit(&mut agg, &cfg.em)
                .and_then(|_| model.significance(&mut agg, MIN_TEST_SAMPLES, TEST_ROUNDS));
            if let Err(e) = fitted {
                if cfg.debug {
                    eprintln!("evaluation failed at {}:{}: {}", gene, pos, e);
                }
                continue;
            }

            if agg.statistic > MIN_STATISTIC && agg.statistic < cfg.alpha {
                write_row(&mut out, gene, pos, ref_base, &depths, &base_strings)?;
                summary.rows_emitted += 1;
            }
        }

        out.flush()?;
        Ok(summary)
    }
}

/// Compact output row: gene tag, position, reference, comma-joined depths,
/// pipe-joined base strings.
fn write_row<W: Write>(
    out: &mut W,
    gene: &str,
    pos: u64,
    ref_base: u8,
    depths: &[u64],
    base_strings: &[String],
) -> Result<()> {
    write!(out, "{}\t{}\t{}\t", gene_tag(gene), pos, ref_base as char)?;
    for (i, d) in depths.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        write!(out, "{}", d)?;
    }
    out.write_all(b"\t")?;
    for (i, b) in base_strings.iter().enumerate() {
        if i > 0 {
            out.write_all(b"|")?;
        }
        out.write_all(b.as_bytes())?;
    }
    out.write_all(b"\n")?;
    Ok(())
}

/// The segment between the last two `|` separators of a pipe-delimited
/// gene identifier, or the whole identifier when it has no such pair.
fn gene_tag(gene: &str) -> &str {
    let Some(last) = gene.rfind('|') else {
        return gene;
    };
    match gene[..last].rfind('|') {
        Some(prev) => &gene[prev + 1..last],
        None => gene,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmSettings;
    use crate::model::{ModelError, ModelFit};
    use std::io::Cursor;

    /// Stamps a fixed statistic so emission decisions are deterministic.
    struct FixedModel(f64);

    impl SiteModel for FixedModel {
        fn fit(&self, agg: &mut Aggregate, _em: &EmSettings) -> std::result::Result<(), ModelError> {
            agg.fit = Some(ModelFit {
                posteriors: [0.5, 0.5],
                values: [0.0, 0.0, 0.0],
                consensus: 0,
                sample_extremes: vec![None; agg.samples.len()],
            });
            Ok(())
        }

        fn significance(
            &self,
            agg: &mut Aggregate,
            _min_samples: usize,
            _rounds: usize,
        ) -> std::result::Result<(), ModelError> {
            agg.statistic = self.0;
            Ok(())
        }
    }

    fn run(data: &str, samples: usize, model: &FixedModel) -> (JointSummary, String) {
        let cmd = JointCommand::new(CallerConfig::new(samples).with_alpha(0.9));
        let mut out = Vec::new();
        let summary = cmd
            .run_reader(Cursor::new(data.as_bytes().to_vec()), model, &mut out)
            .unwrap();
        (summary, String::from_utf8(out).unwrap())
    }

    // Two samples, both with coverage 20: passes the mean-coverage gate
    const GOOD_LINE: &str =
        "gi|123|ref|NC_1|\t500\tA\t20\tGGGGGGGGGGGGGGGGGGGG\tIIIIIIIIIIIIIIIIIIII\tIIIIIIIIIIIIIIIIIIII\t20\tGGGGGGGGGGGGGGGGGGGG\tIIIIIIIIIIIIIIIIIIII\tIIIIIIIIIIIIIIIIIIII\n";

    #[test]
    fn test_emits_in_statistic_window() {
        let (summary, out) = run(GOOD_LINE, 2, &FixedModel(0.5));
        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.rows_emitted, 1);
        assert_eq!(out, "ref\t500\tA\t20,20\tGGGGGGGGGGGGGGGGGGGG|GGGGGGGGGGGGGGGGGGGG\n");
    }

    #[test]
    fn test_statistic_outside_window_suppressed() {
        // At or below the floor, and above the threshold, nothing prints
        let (summary, out) = run(GOOD_LINE, 2, &FixedModel(0.05));
        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.rows_emitted, 0);
        assert!(out.is_empty());

        let (_, out) = run(GOOD_LINE, 2, &FixedModel(0.95));
        assert!(out.is_empty());
    }

    #[test]
    fn test_coverage_gate() {
        // Mean coverage exactly 10 per covered sample fails the strict gate
        let line = "g|a|b|\t7\tA\t10\tGGGGGGGGGG\tIIIIIIIIII\tIIIIIIIIII\t0\t*\tI\n";
        let (summary, out) = run(line, 2, &FixedModel(0.5));
        assert_eq!(summary.lines, 1);
        assert_eq!(summary.evaluated, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_ambiguous_reference_skipped() {
        let line = "g|a|b|\t7\tN\t20\tGGGGGGGGGGGGGGGGGGGG\tIIIIIIIIIIIIIIIIIIII\tIIIIIIIIIIIIIIIIIIII\t0\t*\tI\n";
        let (summary, _) = run(line, 2, &FixedModel(0.5));
        assert_eq!(summary.evaluated, 0);
    }

    #[test]
    fn test_zero_coverage_placeholder_consumed() {
        // First sample empty ("* I"), second carries the data; the token
        // walk must stay aligned for the second sample to be read
        let line = "g|a|b|\t9\tA\t0\t*\tI\t30\tGGGGGGGGGGGGGGGGGGGGGGGGGGGGGG\tIIIIIIIIIIIIIIIIIIIIIIIIIIIIII\tIIIIIIIIIIIIIIIIIIIIIIIIIIIIII\n";
        let (summary, out) = run(line, 2, &FixedModel(0.5));
        assert_eq!(summary.evaluated, 1);
        assert!(out.starts_with("b\t9\tA\t0,30\t*|G"));
    }

    #[test]
    fn test_truncated_line_skipped() {
        let line = "g|a|b|\t9\tA\t30\tGGG\n";
        let (summary, out) = run(line, 2, &FixedModel(0.5));
        assert_eq!(summary.lines, 1);
        assert_eq!(summary.evaluated, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_mismatched_quality_sample_excluded() {
        // Single sample whose quality strings disagree: never admitted, so
        // the line is not evaluated even though coverage clears the gate
        let line = "g|a|b|\t9\tA\t20\tGGGGGGGGGGGGGGGGGGGG\tIIIIIIIIIIIIIIIIIIII\tII\n";
        let (summary, _) = run(line, 1, &FixedModel(0.5));
        assert_eq!(summary.evaluated, 0);
    }

    #[test]
    fn test_gene_tag() {
        assert_eq!(gene_tag("gi|123|ref|NC_1|"), "NC_1");
        assert_eq!(gene_tag("a|b|c"), "b");
        assert_eq!(gene_tag("plain"), "plain");
        assert_eq!(gene_tag("one|two"), "one|two");
    }
}
