//! eggnog-batch - batched eggNOG-mapper runs

use anyhow::Result;
use clap::Parser;
use eggnog_batch::args::RunArgs;
use eggnog_batch::{run_pipeline, LocalExecutor};
use eggnog_common::logging::{init_logging, LogConfig, LogLevel};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "eggnog-batch")]
#[command(author, version, about = "Run eggNOG-mapper over a FASTA collection in batches")]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("eggnog-batch")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let config = cli.run.resolve()?;

    info!(
        input_dir = %config.input_dir.display(),
        work_root = %config.work_root.display(),
        batches = config.batches,
        workers = config.workers,
        "Starting batched annotation"
    );

    let executor = LocalExecutor::from_config(&config);
    let report = run_pipeline(&config, &executor).await?;

    if !report.is_success() {
        anyhow::bail!(
            "{} of {} jobs failed, {} batches could not run, {} units not collected",
            report.summary.failed.len(),
            report.summary.total,
            report.batch_errors.len(),
            report.collect_errors.len()
        );
    }
    Ok(())
}
