//! `eggnog collect` command implementation
//!
//! Writes the KEGG count table and the by-protein table for one results tree.

use crate::error::{CliError, Result};
use colored::Colorize;
use eggnog_batch::{aggregate, CollectMode};
use std::path::Path;

pub async fn run(
    results_dir: &Path,
    kegg_ids_out: &Path,
    by_protein_out: &Path,
    mode: CollectMode,
) -> Result<()> {
    let aggregation = aggregate(results_dir, mode)?;
    aggregation.write(kegg_ids_out, by_protein_out)?;

    println!("{}", "Collected:".cyan().bold());
    println!("  Units:       {}", aggregation.units);
    println!("  Proteins:    {}", aggregation.long.rows.len());
    println!("  KEGG codes:  {}", aggregation.wide.codes.len());
    println!("  No output:   {}", aggregation.missing);
    if mode == CollectMode::Completed {
        println!("  Unfinished:  {}", aggregation.unfinished);
    }
    println!("  KEGG table:  {}", kegg_ids_out.display());
    println!("  By protein:  {}", by_protein_out.display());

    if aggregation.is_clean() {
        return Ok(());
    }

    println!();
    for e in &aggregation.errors {
        println!("  {} {}", "✗".red(), e);
    }
    Err(CliError::CollectFailed(aggregation.errors.len()))
}
