//! gems: multi-sample SNP calling from sorted pileup streams
//!
//! Usage: gems <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use gems_caller::commands::{load_sample_list, CallCommand, JointCommand};
use gems_caller::config::{CallerConfig, EmSettings, Ploidy};
use gems_caller::model::GenotypeMixtureModel;
use gems_caller::pileup::{PileupError, Result};

#[derive(Parser)]
#[command(name = "gems")]
#[command(version)]
#[command(about = "Multi-sample SNP calling from coordinate-sorted pileup files", long_about = None)]
struct Cli {
    /// Number of threads to use (default: number of CPUs)
    #[arg(long, short = 't', global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call SNPs from one coordinate-sorted pileup file per sample
    Call {
        /// File listing per-sample pileup paths, one per line
        #[arg(short = 'l', long, conflicts_with = "inputs")]
        list: Option<PathBuf>,

        /// Per-sample pileup files
        #[arg(required_unless_present = "list")]
        inputs: Vec<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Sample ploidy: 0 = diploid, 1 = haploid
        #[arg(short = 'd', long, default_value = "0")]
        ploidy: u8,

        /// Step size of the maximum-likelihood estimation
        #[arg(short = 's', long, default_value = "0.001")]
        step: f64,

        /// Convergence epsilon of the estimation
        #[arg(long, default_value = "0.000001")]
        eps: f64,

        /// End condition of the estimation
        #[arg(long, default_value = "1.0")]
        end: f64,

        /// Maximum alleles considered per site (0 = unbounded)
        #[arg(short = 'm', long, default_value = "255")]
        max_alleles: u32,

        /// Significance threshold: emit sites whose statistic is below it
        #[arg(short = 'f', long, default_value = "0.05")]
        alpha: f64,

        /// Posterior threshold for the transition/transversion tally
        #[arg(long, default_value = "0.05")]
        p_snp: f64,

        /// Per-record call cap applied after quality trimming
        #[arg(long, default_value = "255")]
        depth_cap: u32,

        /// Minimum base quality (phred) kept by the trim
        #[arg(long, default_value = "13")]
        min_base_quality: u8,

        /// Minimum mapping quality (phred) kept by the trim
        #[arg(long, default_value = "0")]
        min_map_quality: u8,

        /// Minimum informative call fraction for a record to qualify
        #[arg(long, default_value = "0.8")]
        min_informative: f64,

        /// Maximum deletion call fraction for a record to qualify
        #[arg(long, default_value = "0.1")]
        max_deletion: f64,

        /// Records buffered per sample per round
        #[arg(short = 'C', long, default_value = "10000")]
        round_size: usize,

        /// Print per-round progress to stderr
        #[arg(long)]
        debug: bool,

        /// Print run statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Call from a single pre-merged pileup carrying every sample per line
    Joint {
        /// Merged pileup file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of samples per line
        #[arg(short = 'n', long)]
        samples: usize,

        /// Sample ploidy: 0 = diploid, 1 = haploid
        #[arg(short = 'd', long, default_value = "0")]
        ploidy: u8,

        /// Step size of the maximum-likelihood estimation
        #[arg(short = 's', long, default_value = "0.001")]
        step: f64,

        /// Convergence epsilon of the estimation
        #[arg(long, default_value = "0.000001")]
        eps: f64,

        /// End condition of the estimation
        #[arg(long, default_value = "1.0")]
        end: f64,

        /// Maximum alleles considered per site (0 = unbounded)
        #[arg(short = 'm', long, default_value = "255")]
        max_alleles: u32,

        /// Significance threshold: emit sites whose statistic is below it
        #[arg(short = 'f', long, default_value = "0.05")]
        alpha: f64,

        /// Minimum base quality (phred) kept by the trim
        #[arg(long, default_value = "13")]
        min_base_quality: u8,

        /// Minimum mapping quality (phred) kept by the trim
        #[arg(long, default_value = "0")]
        min_map_quality: u8,

        /// Print skipped-line diagnostics to stderr
        #[arg(long)]
        debug: bool,

        /// Print run statistics to stderr
        #[arg(long)]
        stats: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Configure thread pool if --threads specified
    if let Some(n) = cli.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
        {
            eprintln!("Error: failed to initialize thread pool: {}", e);
            process::exit(1);
        }
    }

    let result = match cli.command {
        Commands::Call {
            list,
            inputs,
            output,
            ploidy,
            step,
            eps,
            end,
            max_alleles,
            alpha,
            p_snp,
            depth_cap,
            min_base_quality,
            min_map_quality,
            min_informative,
            max_deletion,
            round_size,
            debug,
            stats,
        } => run_call(
            list,
            inputs,
            output,
            ploidy,
            step,
            eps,
            end,
            max_alleles,
            alpha,
            p_snp,
            depth_cap,
            min_base_quality,
            min_map_quality,
            min_informative,
            max_deletion,
            round_size,
            debug,
            stats,
        ),

        Commands::Joint {
            input,
            output,
            samples,
            ploidy,
            step,
            eps,
            end,
            max_alleles,
            alpha,
            min_base_quality,
            min_map_quality,
            debug,
            stats,
        } => run_joint(
            input,
            output,
            samples,
            ploidy,
            step,
            eps,
            end,
            max_alleles,
            alpha,
            min_base_quality,
            min_map_quality,
            debug,
            stats,
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn open_output(output: &Option<PathBuf>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) => {
            let file = File::create(path).map_err(|source| PileupError::Open {
                path: path.display().to_string(),
                source,
            })?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}

fn run_call(
    list: Option<PathBuf>,
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    ploidy: u8,
    step: f64,
    eps: f64,
    end: f64,
    max_alleles: u32,
    alpha: f64,
    p_snp: f64,
    depth_cap: u32,
    min_base_quality: u8,
    min_map_quality: u8,
    min_informative: f64,
    max_deletion: f64,
    round_size: usize,
    debug: bool,
    stats: bool,
) -> Result<()> {
    let inputs = match list {
        Some(path) => load_sample_list(path)?,
        None => inputs,
    };
    if inputs.is_empty() {
        return Err(PileupError::InvalidInput(
            "no input files given".to_string(),
        ));
    }

    let mut config = CallerConfig::new(inputs.len())
        .with_round_size(round_size)
        .with_alpha(alpha)
        .with_ploidy(Ploidy::from_flag(ploidy));
    config.em = EmSettings { step, eps, end };
    config.max_alleles = max_alleles;
    config.p_snp = p_snp;
    config.depth_cap = depth_cap;
    config.min_base_qual = min_base_quality;
    config.min_map_qual = min_map_quality;
    config.min_informative = min_informative;
    config.max_deletion = max_deletion;
    config.debug = debug;

    let model = GenotypeMixtureModel::new(config.ploidy, config.max_alleles);
    let cmd = CallCommand::new(config);
    let mut out = open_output(&output)?;
    let summary = cmd.run(&inputs, &model, &mut out)?;

    if stats {
        eprintln!("Call stats: {}", summary);
    }
    if output.is_some() {
        eprintln!("finished");
    }
    Ok(())
}

fn run_joint(
    input: PathBuf,
    output: Option<PathBuf>,
    samples: usize,
    ploidy: u8,
    step: f64,
    eps: f64,
    end: f64,
    max_alleles: u32,
    alpha: f64,
    min_base_quality: u8,
    min_map_quality: u8,
    debug: bool,
    stats: bool,
) -> Result<()> {
    if samples == 0 {
        return Err(PileupError::InvalidInput(
            "sample count must be at least 1".to_string(),
        ));
    }

    let mut config = CallerConfig::new(samples)
        .with_alpha(alpha)
        .with_ploidy(Ploidy::from_flag(ploidy));
    config.em = EmSettings { step, eps, end };
    config.max_alleles = max_alleles;
    config.min_base_qual = min_base_quality;
    config.min_map_qual = min_map_quality;
    config.debug = debug;

    let model = GenotypeMixtureModel::new(config.ploidy, config.max_alleles);
    let cmd = JointCommand::new(config);
    let mut out = open_output(&output)?;
    let summary = cmd.run(&input, &model, &mut out)?;

    if stats {
        eprintln!("Joint stats: {}", summary);
    }
    if output.is_some() {
        eprintln!("finished");
    }
    Ok(())
}
