//! `eggnog plan` command implementation
//!
//! Dry run: shows which units still need annotation and where each would go.

use crate::error::{CliError, Result};
use colored::Colorize;
use eggnog_batch::args::RunArgs;
use eggnog_batch::pipeline;
use eggnog_common::error::require_dir;

const LISTED_UNITS: usize = 5;

pub async fn run(args: &RunArgs, json: bool) -> Result<()> {
    let config = args.resolve()?;
    if config.input_dir.as_os_str().is_empty() {
        return Err(CliError::config("input directory is required (--input-dir)"));
    }
    require_dir(&config.input_dir)?;

    let plan = pipeline::plan(&config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("{}", "Backlog:".cyan().bold());
    println!("  Discovered:        {}", plan.discovered);
    println!("  Already completed: {}", plan.already_completed);
    println!("  Pending:           {}", plan.pending().to_string().green());
    println!();

    println!("{}", "Batches:".cyan().bold());
    for batch in &plan.batches {
        let units = plan.units(batch.index);
        println!(
            "  {} {} units -> {}",
            format!("[{}]", batch.index).bold(),
            units.len(),
            batch.work_dir.display()
        );
        for unit in units.iter().take(LISTED_UNITS) {
            println!("      {}", unit.id);
        }
        if units.len() > LISTED_UNITS {
            println!("      ... and {} more", units.len() - LISTED_UNITS);
        }
    }

    Ok(())
}
