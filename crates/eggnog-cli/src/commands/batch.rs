//! `eggnog batch` command implementation
//!
//! Runs the whole batched pipeline in this process.

use super::print_summary;
use crate::error::{CliError, Result};
use colored::Colorize;
use eggnog_batch::args::RunArgs;
use eggnog_batch::{run_pipeline, LocalExecutor};

pub async fn run(args: &RunArgs) -> Result<()> {
    let config = args.resolve()?;

    println!(
        "Running {} batches of up to {} jobs under {}",
        config.batches,
        config.workers,
        config.work_root.display()
    );

    let executor = LocalExecutor::from_config(&config);
    let report = run_pipeline(&config, &executor).await?;

    println!();
    println!("{}", "Backlog:".cyan().bold());
    println!("  Discovered:        {}", report.discovered);
    println!("  Already completed: {}", report.already_completed);
    println!("  Pending:           {}", report.pending);
    println!();
    print_summary(&report.summary);

    for (batch, reason) in &report.batch_errors {
        println!("  {} batch {}: {}", "✗".red(), batch, reason);
    }
    for reason in &report.collect_errors {
        println!("  {} {}", "✗".red(), reason);
    }

    println!();
    println!("{}", "Tables:".cyan().bold());
    println!("  Units:      {}", report.collected_units);
    if report.unfinished_units > 0 {
        println!("  Unfinished: {}", report.unfinished_units);
    }
    println!("  KEGG table: {}", report.kegg_ids_out.display());
    println!("  By protein: {}", report.by_protein_out.display());

    if !report.summary.is_clean() {
        return Err(CliError::JobsFailed {
            failed: report.summary.failed.len(),
            total: report.summary.total,
        });
    }
    if !report.batch_errors.is_empty() {
        return Err(CliError::BatchesFailed(report.batch_errors.len()));
    }
    if !report.collect_errors.is_empty() {
        return Err(CliError::CollectFailed(report.collect_errors.len()));
    }
    Ok(())
}
