//! End-to-end batched annotation run
//!
//! 1. Load the completed registry (fatal if it cannot be read)
//! 2. Diff the inputs against it and stage the backlog into batches
//! 3. Run every batch through a [`TaskExecutor`], all batches concurrently
//! 4. After every batch resolved, aggregate the completed jobs of all
//!    working directories

use crate::aggregator::{aggregate_dirs, CollectMode};
use crate::batcher::{BatchPlan, WorkBatcher};
use crate::config::RunConfig;
use crate::dispatcher::RunSummary;
use crate::error::Result;
use crate::executor::{run_blocking, BatchReport, TaskExecutor};
use crate::registry::CompletedRegistry;
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

/// Outcome of a whole run
#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub discovered: usize,
    pub already_completed: usize,
    pub pending: usize,
    pub batches: Vec<BatchReport>,
    /// `(batch index, error)` for batches the executor could not run
    pub batch_errors: Vec<(usize, String)>,
    /// All jobs across all batches
    pub summary: RunSummary,
    /// Units present in the combined tables
    pub collected_units: usize,
    /// Outputs left out of the combined tables because their job never completed
    pub unfinished_units: usize,
    /// Unit directories that could not be collected
    pub collect_errors: Vec<String>,
    pub kegg_ids_out: PathBuf,
    pub by_protein_out: PathBuf,
    pub duration_seconds: f64,
}

impl PipelineReport {
    /// No failed job, no failed batch, nothing left uncollected
    pub fn is_success(&self) -> bool {
        self.summary.is_clean() && self.batch_errors.is_empty() && self.collect_errors.is_empty()
    }
}

/// Load the registry named by `config`, or an empty one.
pub fn load_registry(config: &RunConfig) -> Result<CompletedRegistry> {
    match config.registry_file {
        Some(ref path) => CompletedRegistry::load(path, &config.registry_column),
        None => Ok(CompletedRegistry::empty()),
    }
}

fn batcher(config: &RunConfig) -> Result<WorkBatcher> {
    WorkBatcher::new(&config.work_root, config.batches, config.stage_mode)
}

/// Compute the backlog and its batch assignment without touching the disk.
pub fn plan(config: &RunConfig) -> Result<BatchPlan> {
    let registry = load_registry(config)?;
    batcher(config)?.plan(
        &config.input_dir,
        &config.file_glob,
        &registry,
        config.key_field,
    )
}

/// Run the whole pipeline with `executor`.
pub async fn run_pipeline(config: &RunConfig, executor: &dyn TaskExecutor) -> Result<PipelineReport> {
    let start = Instant::now();
    config.validate()?;

    let registry = load_registry(config)?;
    let batcher = batcher(config)?;
    let input_dir = config.input_dir.clone();
    let file_glob = config.file_glob.clone();
    let key_field = config.key_field;
    let plan = run_blocking(move || {
        batcher.compute_batches(&input_dir, &file_glob, &registry, key_field)
    })
    .await?;

    info!(
        pending = plan.pending(),
        batches = plan.batches.len(),
        work_root = %config.work_root.display(),
        "Running batches"
    );

    let results = join_all(plan.batches.iter().map(|batch| executor.execute(batch))).await;

    let mut reports = Vec::with_capacity(results.len());
    let mut batch_errors = Vec::new();
    let mut summary = RunSummary::default();
    for (batch, result) in plan.batches.iter().zip(results) {
        match result {
            Ok(report) => {
                summary.merge(&report.summary);
                reports.push(report);
            },
            Err(e) => {
                error!(batch = batch.index, error = %e, "Batch could not be run");
                batch_errors.push((batch.index, e.to_string()));
            },
        }
    }

    let work_dirs: Vec<PathBuf> = plan.batches.iter().map(|b| b.work_dir.clone()).collect();
    let kegg_ids_out = config.kegg_ids_path();
    let by_protein_out = config.by_protein_path();
    let aggregation = {
        let kegg_ids_out = kegg_ids_out.clone();
        let by_protein_out = by_protein_out.clone();
        run_blocking(move || {
            let aggregation = aggregate_dirs(&work_dirs, CollectMode::Completed)?;
            aggregation.write(&kegg_ids_out, &by_protein_out)?;
            Ok(aggregation)
        })
        .await?
    };

    let duration = start.elapsed();
    let report = PipelineReport {
        discovered: plan.discovered,
        already_completed: plan.already_completed,
        pending: plan.pending(),
        batches: reports,
        batch_errors,
        summary,
        collected_units: aggregation.units,
        unfinished_units: aggregation.unfinished,
        collect_errors: aggregation.errors.iter().map(ToString::to_string).collect(),
        kegg_ids_out,
        by_protein_out,
        duration_seconds: duration.as_secs_f64(),
    };

    if report.is_success() {
        info!(
            jobs = report.summary.total,
            done = report.summary.done,
            skipped = report.summary.skipped,
            collected = report.collected_units,
            "Pipeline complete in {:.2}s",
            report.duration_seconds
        );
    } else {
        for (unit, reason) in &report.summary.failed {
            warn!(unit = %unit, "Failed: {}", reason);
        }
        warn!(
            jobs = report.summary.total,
            failed = report.summary.failed.len(),
            failed_batches = report.batch_errors.len(),
            uncollected = report.collect_errors.len(),
            "Pipeline finished with failures in {:.2}s",
            report.duration_seconds
        );
    }

    Ok(report)
}
