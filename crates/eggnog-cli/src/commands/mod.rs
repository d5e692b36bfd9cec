//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod annotate;
pub mod batch;
pub mod collect;
pub mod plan;
pub mod status;

use colored::Colorize;
use eggnog_batch::RunSummary;

/// Print job counts and every failed unit
pub(crate) fn print_summary(summary: &RunSummary) {
    println!("{}", "Summary:".cyan().bold());
    println!("  Jobs:      {}", summary.total);
    println!("  Annotated: {}", summary.done.to_string().green());
    println!("  Skipped:   {}", summary.skipped);
    if summary.is_clean() {
        println!("  Failed:    0");
        return;
    }
    println!("  Failed:    {}", summary.failed.len().to_string().red().bold());
    println!();
    println!("{}", "Failed units:".red().bold());
    for (unit, reason) in &summary.failed {
        println!("  {} {}", unit.red(), reason);
    }
}
