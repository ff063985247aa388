//! Multi-stream calling: merge coordinate-sorted per-sample pileups,
//! aggregate by locus, evaluate, and flush in bounded rounds.
//!
//! Memory is bounded per round by `round_size × sample_count` buffered
//! records plus the loci admitted in that round; raising the round size
//! trades memory for fewer, larger rounds.

use crate::config::CallerConfig;
use crate::filter::AdmissionGates;
use crate::model::SiteModel;
use crate::pileup::{PileupError, Result};
use crate::reader::SampleReader;
use crate::report::{self, BatchCounts};
use crate::store::{AggregateStore, Locus};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Checkin limit meaning "drain every buffer".
const DRAIN_ALL: u64 = u64::MAX;

/// Per-run statistics, including the substitution-class counters that
/// would otherwise vanish with each batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rounds: u64,
    pub records_admitted: u64,
    pub loci_pruned: u64,
    pub rows_emitted: u64,
    pub counts: BatchCounts,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rounds: {}, Admitted: {}, Pruned: {}, Emitted: {}, Ti: {}, Tv: {}",
            self.rounds,
            self.records_admitted,
            self.loci_pruned,
            self.rows_emitted,
            self.counts.transitions,
            self.counts.transversions
        )
    }
}

/// Read a sample-list file: one pileup path per nonempty line.
pub fn load_sample_list<P: AsRef<Path>>(path: P) -> Result<Vec<PathBuf>> {
    let content = std::fs::read_to_string(&path).map_err(|source| PileupError::Open {
        path: path.as_ref().display().to_string(),
        source,
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Streaming multi-sample caller.
#[derive(Debug, Clone)]
pub struct CallCommand {
    pub config: CallerConfig,
}

impl CallCommand {
    pub fn new(config: CallerConfig) -> Self {
        Self { config }
    }

    /// Open every sample stream and run the engine to completion.
    pub fn run<P: AsRef<Path>, W: Write, M: SiteModel>(
        &self,
        inputs: &[P],
        model: &M,
        output: &mut W,
    ) -> Result<RunSummary> {
        let mut readers = Vec::with_capacity(inputs.len());
        for (idx, path) in inputs.iter().enumerate() {
            readers.push(SampleReader::open(path, idx)?);
        }
        self.run_readers(readers, model, output)
    }

    /// Engine over already-open readers (exposed for in-memory callers).
    ///
    /// Each round: refill active readers, compute the low-watermark checkin
    /// limit, drain and admit buffered records up to it, prune loci that
    /// never qualified, evaluate survivors in parallel, report, and clear
    /// the store. The store is empty at every round boundary.
    pub fn run_readers<R: BufRead, W: Write, M: SiteModel>(
        &self,
        mut readers: Vec<SampleReader<R>>,
        model: &M,
        output: &mut W,
    ) -> Result<RunSummary> {
        let cfg = &self.config;
        let gates = cfg.gates();
        let mut out = BufWriter::with_capacity(8 * 1024 * 1024, output);
        let mut store = AggregateStore::new(readers.len());
        let mut summary = RunSummary::default();

        report::write_header(&mut out)?;

        loop {
            summary.rounds += 1;
            for reader in readers.iter_mut() {
                if reader.is_active() {
                    reader.refill(cfg.round_size)?;
                }
            }
            let any_active = readers.iter().any(SampleReader::is_active);
            let limit = checkin_limit(&readers, any_active);
            if cfg.debug {
                eprintln!("round {}: checkin limit = {}", summary.rounds, limit);
            }

            for reader in readers.iter_mut() {
                summary.records_admitted += admit_from(reader, limit, &mut store, &gates, cfg);
            }
            if cfg.debug {
                eprintln!("round {}: {} loci loaded", summary.rounds, store.len());
            }

            summary.loci_pruned += store.prune_unqualified() as u64;
            store.evaluate_parallel(model, &cfg.em, cfg.debug);

            summary.rows_emitted += report::emit_rows(&store, cfg, &mut out)?;
            summary.counts.add(report::classify(&store, cfg.p_snp));
            store.clear();

            if !any_active {
                break;
            }
        }

        out.flush()?;
        Ok(summary)
    }
}

/// Low-watermark over the readers: the minimum, across every non-empty
/// buffer, of its highest buffered coordinate. No sample contributes data
/// beyond its own high-water mark, so every coordinate at or below this
/// limit is complete. With no reader active the sentinel drains everything.
fn checkin_limit<R: BufRead>(readers: &[SampleReader<R>], any_active: bool) -> u64 {
    if !any_active {
        return DRAIN_ALL;
    }
    readers
        .iter()
        .filter_map(SampleReader::peek_back_pos)
        .min()
        .unwrap_or(DRAIN_ALL)
}

/// Drain one reader up to the limit, inserting every record into its
/// sample slot and enabling the locus for those that pass admission.
fn admit_from<R: BufRead>(
    reader: &mut SampleReader<R>,
    limit: u64,
    store: &mut AggregateStore,
    gates: &AdmissionGates,
    cfg: &CallerConfig,
) -> u64 {
    let sample = reader.sample_index();
    let mut admitted = 0u64;

    while let Some(rec) = reader.pop_front_if(limit) {
        if rec.ref_is_ambiguous() {
            continue;
        }
        if rec.quals_mismatched() {
            eprintln!(
                "Warning: quality length mismatch at {}:{} (sample {})",
                rec.chrom, rec.pos, sample
            );
        }
        let decoded = rec.decode();
        if decoded.malformed_marker {
            eprintln!(
                "Warning: malformed indel marker at {}:{} (sample {})",
                rec.chrom, rec.pos, sample
            );
        }
        let admissible = gates.admits(&decoded);
        let call = decoded.to_sample_call(&rec, cfg.min_base_qual, cfg.min_map_qual, cfg.depth_cap);

        let ref_base = rec.ref_base;
        let locus = Locus::new(rec.chrom, rec.pos);
        store.insert(locus.clone(), sample, ref_base, call);
        if admissible {
            store.enable(&locus);
        }
        admitted += 1;
    }

    admitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmSettings;
    use crate::model::{GenotypeMixtureModel, ModelError, SiteModel};
    use crate::store::Aggregate;
    use std::io::Cursor;

    fn make_reader(data: &str, idx: usize) -> SampleReader<BufReader<Cursor<Vec<u8>>>> {
        SampleReader::new(BufReader::new(Cursor::new(data.as_bytes().to_vec())), idx)
    }

    fn pile_line(chrom: &str, pos: u64) -> String {
        format!("{}\t{}\tA\t3\t...\tIII\t]]]\n", chrom, pos)
    }

    /// Always succeeds with a zero statistic so emission is deterministic.
    struct PassModel;

    impl SiteModel for PassModel {
        fn fit(&self, agg: &mut Aggregate, _em: &EmSettings) -> std::result::Result<(), ModelError> {
            agg.fit = Some(crate::model::ModelFit {
                posteriors: [1.0, 0.0],
                values: [0.0, 0.0, 0.0],
                consensus: 0,
                sample_extremes: agg
                    .samples
                    .iter()
                    .map(|s| s.as_ref().and_then(|c| c.max_allele()))
                    .collect(),
            });
            Ok(())
        }

        fn significance(
            &self,
            agg: &mut Aggregate,
            _min_samples: usize,
            _rounds: usize,
        ) -> std::result::Result<(), ModelError> {
            agg.statistic = 0.0;
            Ok(())
        }
    }

    fn data_lines(output: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(output)
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_checkin_limit_round_of_two() {
        // Sample A holds 5 ascending coordinates, sample B holds 1; with a
        // round size of 2 the limit is min(A's 2nd coordinate, B's only one)
        let a: String = [100u64, 200, 300, 400, 500]
            .iter()
            .map(|p| pile_line("chr1", *p))
            .collect();
        let b = pile_line("chr1", 250);

        let mut readers = vec![make_reader(&a, 0), make_reader(&b, 1)];
        for r in readers.iter_mut() {
            r.refill(2).unwrap();
        }
        let any_active = readers.iter().any(SampleReader::is_active);
        assert_eq!(checkin_limit(&readers, any_active), 200);
    }

    #[test]
    fn test_checkin_limit_drains_when_exhausted() {
        let mut readers = vec![make_reader(&pile_line("chr1", 100), 0)];
        readers[0].refill(10).unwrap();
        assert!(!readers[0].is_active());
        assert_eq!(checkin_limit(&readers, false), DRAIN_ALL);
    }

    #[test]
    fn test_three_samples_one_locus() {
        let readers = (0..3)
            .map(|i| make_reader(&pile_line("chr1", 100), i))
            .collect();
        let cmd = CallCommand::new(CallerConfig::new(3).with_alpha(2.0));
        let mut out = Vec::new();
        let summary = cmd.run_readers(readers, &PassModel, &mut out).unwrap();

        assert_eq!(summary.records_admitted, 3);
        let lines = data_lines(&out);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Sample Number: 3"));
        assert_eq!(summary.rows_emitted, 1);
    }

    #[test]
    fn test_ambiguous_reference_excluded() {
        let data = "chr1\t100\tN\t3\t...\tIII\t]]]\n";
        let readers = vec![make_reader(data, 0)];
        let cmd = CallCommand::new(CallerConfig::new(1).with_alpha(2.0));
        let mut out = Vec::new();
        let summary = cmd.run_readers(readers, &PassModel, &mut out).unwrap();

        assert_eq!(summary.records_admitted, 0);
        assert!(data_lines(&out).is_empty());
    }

    #[test]
    fn test_mismatched_quality_lengths_complete() {
        // Mapping-quality strings all too short: records still process
        let data = "chr1\t100\tA\t3\t...\tIII\t]\nchr1\t200\tA\t3\t...\tIII\t]\n";
        let readers = vec![make_reader(data, 0)];
        let cmd = CallCommand::new(CallerConfig::new(1).with_alpha(2.0));
        let mut out = Vec::new();
        let summary = cmd.run_readers(readers, &PassModel, &mut out).unwrap();
        assert_eq!(summary.records_admitted, 2);
    }

    #[test]
    fn test_inadmissible_records_pruned() {
        // Every call ambiguous: inserted but never enabled, then pruned
        let data = "chr1\t100\tA\t3\tNNN\tIII\t]]]\n";
        let readers = vec![make_reader(data, 0)];
        let cmd = CallCommand::new(CallerConfig::new(1).with_alpha(2.0));
        let mut out = Vec::new();
        let summary = cmd.run_readers(readers, &PassModel, &mut out).unwrap();

        assert_eq!(summary.records_admitted, 1);
        assert_eq!(summary.loci_pruned, 1);
        assert_eq!(summary.rows_emitted, 0);
    }

    #[test]
    fn test_round_size_invariance() {
        let a: String = (1..=25u64).map(|p| pile_line("chr1", p * 10)).collect();
        let b: String = (1..=7u64).map(|p| pile_line("chr1", p * 30)).collect();

        let mut outputs = Vec::new();
        for round_size in [1usize, 2, 5, 1000] {
            let readers = vec![make_reader(&a, 0), make_reader(&b, 1)];
            let cmd =
                CallCommand::new(CallerConfig::new(2).with_alpha(2.0).with_round_size(round_size));
            let mut out = Vec::new();
            let summary = cmd.run_readers(readers, &PassModel, &mut out).unwrap();
            assert_eq!(summary.records_admitted, 32);
            outputs.push(data_lines(&out));
        }
        for other in &outputs[1..] {
            assert_eq!(&outputs[0], other);
        }
    }

    #[test]
    fn test_multi_chromosome_no_collision() {
        // Equal coordinates on different chromosomes stay distinct loci
        let data = format!("{}{}", pile_line("chr1", 100), pile_line("chr2", 100));
        let readers = vec![make_reader(&data, 0)];
        let cmd = CallCommand::new(CallerConfig::new(1).with_alpha(2.0));
        let mut out = Vec::new();
        let summary = cmd.run_readers(readers, &PassModel, &mut out).unwrap();

        assert_eq!(summary.rows_emitted, 2);
        let lines = data_lines(&out);
        assert!(lines[0].starts_with("chr1\t100"));
        assert!(lines[1].starts_with("chr2\t100"));
    }

    #[test]
    fn test_real_model_end_to_end() {
        // Three samples agreeing on a homozygous A->G substitution
        let line = "chr1\t500\tA\t6\tGGGGGG\tIIIIII\t]]]]]]\n";
        let readers = (0..3).map(|i| make_reader(line, i)).collect();
        let model = GenotypeMixtureModel::new(crate::config::Ploidy::Diploid, 255);
        let cmd = CallCommand::new(CallerConfig::new(3).with_alpha(2.0));
        let mut out = Vec::new();
        let summary = cmd.run_readers(readers, &model, &mut out).unwrap();

        assert_eq!(summary.rows_emitted, 1);
        // Identical per-sample fractions: no outlier, counted as transition
        assert_eq!(summary.counts.transitions, 1);
        assert_eq!(summary.counts.transversions, 0);
    }
}
