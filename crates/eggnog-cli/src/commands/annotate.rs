//! `eggnog annotate` command implementation
//!
//! Runs emapper on every matching file of one directory, skipping files that
//! already have results.

use super::print_summary;
use crate::error::{CliError, Result};
use colored::Colorize;
use eggnog_batch::config::{EmapperSettings, SkipPolicy};
use eggnog_batch::dispatcher::DispatchProgress;
use eggnog_batch::executor::annotate_directory;
use eggnog_batch::progress::create_progress_bar;
use eggnog_batch::{EmapperTool, JobRunner};
use eggnog_common::error::require_dir;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AnnotateOptions {
    pub input_dir: PathBuf,
    pub file_glob: String,
    pub wdir: PathBuf,
    pub data_dir: PathBuf,
    pub workers: usize,
    pub emapper_bin: PathBuf,
    pub cpus: u32,
    pub timeout: Option<u64>,
    pub skip_policy: SkipPolicy,
}

pub async fn run(options: AnnotateOptions) -> Result<()> {
    let input_dir = require_dir(&options.input_dir)?;
    let data_dir = require_dir(&options.data_dir)?;
    if options.timeout == Some(0) {
        return Err(CliError::config("--timeout must be positive"));
    }

    let settings = EmapperSettings {
        binary: options.emapper_bin,
        cpus: options.cpus,
        ..EmapperSettings::default()
    };
    let tool = EmapperTool::new(settings, options.timeout.map(Duration::from_secs));
    let runner = JobRunner::new(Arc::new(tool), options.skip_policy);

    println!(
        "Annotating {} in {} with {} workers",
        options.file_glob.cyan(),
        input_dir.display(),
        options.workers
    );

    let progress = DispatchProgress::with_bar(create_progress_bar(0, "annotate"));
    let summary = annotate_directory(
        &runner,
        &input_dir,
        &options.file_glob,
        &options.wdir,
        &data_dir,
        options.workers,
        &progress,
    )
    .await?;

    println!();
    print_summary(&summary);

    if summary.is_clean() {
        Ok(())
    } else {
        Err(CliError::JobsFailed {
            failed: summary.failed.len(),
            total: summary.total,
        })
    }
}
