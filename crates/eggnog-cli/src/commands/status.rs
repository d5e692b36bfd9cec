//! `eggnog status` command implementation
//!
//! Shows how far each batch of a work root has got.

use crate::error::Result;
use colored::Colorize;
use eggnog_batch::status::scan_work_root;
use eggnog_common::error::require_dir;
use std::path::Path;

pub async fn run(work_dir: &Path, json: bool) -> Result<()> {
    let work_dir = require_dir(work_dir)?;
    let status = scan_work_root(&work_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    if status.batches.is_empty() {
        println!("No batches found in {}.", work_dir.display());
        println!("Run 'eggnog batch' to create them.");
        return Ok(());
    }

    println!("{}", "Batches:".cyan().bold());
    for batch in &status.batches {
        let pending = if batch.pending == 0 {
            "0".green()
        } else {
            batch.pending.to_string().yellow()
        };
        println!(
            "  [{}] staged {:>6}  done {:>6}  pending {:>6}",
            batch.index, batch.staged, batch.done, pending
        );
        if batch.unmarked_outputs > 0 {
            println!(
                "      {} outputs without a completion marker",
                batch.unmarked_outputs
            );
        }
    }

    println!();
    println!("{}", "Summary:".cyan().bold());
    println!("  Staged:  {}", status.staged());
    println!("  Done:    {}", status.done());
    println!("  Pending: {}", status.pending());

    Ok(())
}
