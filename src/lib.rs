// Clippy allows for the whole crate
#![allow(clippy::too_many_arguments)]

//! Multi-sample SNP calling from coordinate-sorted pileup streams.
//!
//! One coordinate-sorted pileup file per sample is merged in bounded
//! rounds; per-locus aggregates are fitted with a genotype mixture model,
//! screened with an outlier test, and reported as pseudo-VCF rows.
//!
//! # Example
//!
//! ```rust,no_run
//! use gems_caller::commands::CallCommand;
//! use gems_caller::config::CallerConfig;
//! use gems_caller::model::GenotypeMixtureModel;
//!
//! let config = CallerConfig::new(2);
//! let model = GenotypeMixtureModel::new(config.ploidy, config.max_alleles);
//! let cmd = CallCommand::new(config);
//!
//! let mut out = std::io::stdout();
//! let summary = cmd.run(&["s1.pileup", "s2.pileup"], &model, &mut out).unwrap();
//! eprintln!("{}", summary);
//! ```

pub mod commands;
pub mod config;
pub mod filter;
pub mod model;
pub mod pileup;
pub mod reader;
pub mod record;
pub mod report;
pub mod store;

// Re-export commonly used types
pub use config::{CallerConfig, EmSettings, Ploidy};
pub use model::{GenotypeMixtureModel, SiteModel};
pub use record::{PileupRecord, SampleCall};
pub use store::{Aggregate, AggregateStore, Locus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::commands::{CallCommand, JointCommand, RunSummary};
    pub use crate::config::{CallerConfig, EmSettings, Ploidy};
    pub use crate::model::{GenotypeMixtureModel, SiteModel};
    pub use crate::store::{Aggregate, AggregateStore, Locus};
}

#[cfg(test)]
mod tests {
    use crate::commands::CallCommand;
    use crate::config::CallerConfig;
    use crate::model::GenotypeMixtureModel;
    use crate::reader::SampleReader;
    use std::io::{BufReader, Cursor};

    #[test]
    fn test_basic_workflow() {
        // Two samples sharing a deep homozygous substitution site
        let line = "chr1\t100\tA\t20\tGGGGGGGGGGGGGGGGGGGG\tIIIIIIIIIIIIIIIIIIII\tIIIIIIIIIIIIIIIIIIII\n";
        let readers = (0..2)
            .map(|i| {
                SampleReader::new(BufReader::new(Cursor::new(line.as_bytes().to_vec())), i)
            })
            .collect();

        let config = CallerConfig::new(2).with_alpha(2.0);
        let model = GenotypeMixtureModel::new(config.ploidy, config.max_alleles);
        let cmd = CallCommand::new(config);

        let mut out = Vec::new();
        let summary = cmd.run_readers(readers, &model, &mut out).unwrap();

        assert_eq!(summary.records_admitted, 2);
        assert_eq!(summary.rows_emitted, 1);

        let text = String::from_utf8(out).unwrap();
        let row = text.lines().find(|l| !l.starts_with('#')).unwrap();
        assert!(row.starts_with("chr1\t100\tNA\tA\tNA\t"));
        assert!(row.contains("Sample Number: 2"));
    }
}
