use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nanocurate::pipeline::{DEFAULT_MODEL, DEFAULT_RUN_NAME};
use nanocurate::{ExternalTools, Orchestrator, PipelineConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "nanocurate",
    about = "Consensus masking and variant curation for batches of nanopore samples"
)]
struct Cli {
    /// Reference genome FASTA (one record per segment).
    #[arg(short = 'g', long)]
    refgenome: PathBuf,
    /// Folder holding the `.fastq`/`.fastq.gz` read files.
    #[arg(short = 's', long)]
    samples: PathBuf,
    /// Metadata table (comma-separated, or tab-separated for `.tsv`).
    #[arg(short = 'i', long)]
    metadata: PathBuf,
    /// Output folder name, created inside the samples folder.
    #[arg(short = 'a', long, default_value = DEFAULT_RUN_NAME)]
    run_name: String,
    /// Consensus model.
    #[arg(short = 'm', long, default_value = DEFAULT_MODEL)]
    model: String,
    /// Depth below which consensus bases are masked and variants dropped.
    #[arg(short = 'c', long, default_value_t = 30)]
    cutoff: u32,
    /// Depth considered high coverage in the coverage series.
    #[arg(short = 'b', long, default_value_t = 200)]
    ideal_coverage: u32,
    /// Minimum mean read quality; 0 disables read filtering.
    #[arg(short = 'q', long, default_value_t = 10)]
    min_read_quality: u32,
    /// Bases trimmed from the start of each read.
    #[arg(short = 'e', long, default_value_t = 70)]
    headcrop: u32,
    /// Bases trimmed from the end of each read.
    #[arg(short = 't', long, default_value_t = 70)]
    tailcrop: u32,
    /// Minimum read length.
    #[arg(short = 'l', long, default_value_t = 50)]
    min_read_length: u32,
    /// Minimum variant frequency.
    #[arg(short = 'f', long, default_value_t = 0.8)]
    min_frequency: f64,
    /// Largest accepted indel.
    #[arg(short = 'd', long, default_value_t = 90)]
    max_indel: usize,
    /// Positions to exclude, `locus:start-end;...`, or `none`.
    #[arg(short = 'u', long, default_value = "none")]
    ignore_regions: String,
    /// Minimum number of reads for a sample to be processed.
    #[arg(short = 'n', long, default_value_t = 100)]
    min_reads: u64,
    /// Sequence-coverage percentage for a good-quality verdict.
    #[arg(short = 'p', long, default_value_t = 70.0)]
    min_seq_coverage: f64,
    /// Threads handed to the consensus generator.
    #[arg(long, default_value_t = 8)]
    threads: usize,
    /// Time limit for each external tool, in minutes.
    #[arg(long, default_value_t = 360)]
    tool_timeout_mins: u64,
    /// Keep scratch files in sample folders.
    #[arg(long)]
    keep_intermediates: bool,
    /// Log at debug level unless RUST_LOG is set.
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> PipelineConfig {
        PipelineConfig {
            run_name: self.run_name,
            model: self.model,
            coverage_cutoff: self.cutoff,
            ideal_coverage: self.ideal_coverage,
            min_read_quality: self.min_read_quality,
            head_crop: self.headcrop,
            tail_crop: self.tailcrop,
            min_read_length: self.min_read_length,
            min_frequency: self.min_frequency,
            max_indel: self.max_indel,
            min_reads: self.min_reads,
            min_sequence_coverage: self.min_seq_coverage,
            bad_regions: self.ignore_regions,
            threads: self.threads,
            tool_timeout: Duration::from_secs(self.tool_timeout_mins * 60),
            keep_intermediates: self.keep_intermediates,
            ..PipelineConfig::new(self.refgenome, self.samples, self.metadata)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.into_config();
    config.validate().context("invalid pipeline configuration")?;
    let tools = ExternalTools::from_config(&config);
    let run_dir = config.run_dir();

    let outcome = Orchestrator::new(config, tools)
        .run()
        .with_context(|| format!("pipeline run in {} aborted", run_dir.display()))?;

    if outcome.summary.failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}
