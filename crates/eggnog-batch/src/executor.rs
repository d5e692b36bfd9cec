//! Running one batch
//!
//! [`TaskExecutor`] is the seam between the pipeline and wherever a batch
//! actually runs. [`LocalExecutor`] runs it in this process with the bounded
//! dispatcher; a cluster backend would submit the batch directory to a remote
//! node and report back the same [`BatchReport`].

use crate::aggregator::{aggregate_dirs, batch_output_path, CollectMode};
use crate::batcher::Batch;
use crate::config::RunConfig;
use crate::dispatcher::{dispatch_all, DispatchProgress, JobSpec, RunSummary};
use crate::error::{BatchError, Result};
use crate::progress::{create_multi_progress, create_progress_bar};
use crate::runner::{EmapperTool, JobRunner};
use crate::unit::discover_units;
use async_trait::async_trait;
use indicatif::MultiProgress;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Run blocking file work (staging, directory scans, TSV aggregation) on
/// the blocking pool.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BatchError::Task(e.to_string()))?
}

/// Per-batch tables written after the batch's jobs resolved
#[derive(Debug, Clone, Serialize)]
pub struct CollectedTables {
    pub kegg_ids_out: PathBuf,
    pub by_protein_out: PathBuf,
    pub units: usize,
    /// Outputs left out because their job never completed
    pub unfinished: usize,
    /// Units that could not be collected
    pub errors: usize,
}

/// What happened to one batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: usize,
    pub summary: RunSummary,
    pub collected: Option<CollectedTables>,
    pub duration_seconds: f64,
}

impl BatchReport {
    fn empty(batch: usize) -> Self {
        Self {
            batch,
            summary: RunSummary::default(),
            collected: None,
            duration_seconds: 0.0,
        }
    }
}

/// Runs every unit staged in a batch directory to a terminal state
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Process `batch`. An `Err` means the batch as a whole could not be
    /// run; individual job failures are part of the report.
    async fn execute(&self, batch: &Batch) -> Result<BatchReport>;
}

/// Output names for per-batch collection
#[derive(Debug, Clone)]
struct CollectNames {
    kegg_ids: String,
    by_protein: String,
}

/// Executes batches in this process with a bounded job pool
pub struct LocalExecutor {
    runner: JobRunner,
    data_dir: PathBuf,
    file_glob: String,
    workers: usize,
    progress: MultiProgress,
    collect: Option<CollectNames>,
}

impl LocalExecutor {
    pub fn new(runner: JobRunner, data_dir: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            runner,
            data_dir: data_dir.into(),
            file_glob: crate::config::DEFAULT_FILE_GLOB.to_string(),
            workers,
            progress: create_multi_progress(false),
            collect: None,
        }
    }

    /// Executor running the configured emapper binary
    pub fn from_config(config: &RunConfig) -> Self {
        let tool = EmapperTool::new(config.emapper.clone(), config.job_timeout());
        let runner = JobRunner::new(Arc::new(tool), config.skip_policy);
        let mut executor = Self::new(runner, &config.data_dir, config.workers)
            .with_file_glob(&config.file_glob)
            .with_progress(create_multi_progress(config.show_progress));
        if config.collect_batches {
            executor = executor.collect_into(
                &config.kegg_ids_out.to_string_lossy(),
                &config.by_protein_out.to_string_lossy(),
            );
        }
        executor
    }

    pub fn with_file_glob(mut self, pattern: &str) -> Self {
        self.file_glob = pattern.to_string();
        self
    }

    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Write `<work dir>-<name>` tables after each batch. Only the file name
    /// part of each argument is used.
    pub fn collect_into(mut self, kegg_ids: &str, by_protein: &str) -> Self {
        let file_name = |name: &str| {
            Path::new(name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.to_string())
        };
        self.collect = Some(CollectNames {
            kegg_ids: file_name(kegg_ids),
            by_protein: file_name(by_protein),
        });
        self
    }

    async fn collect(batch: &Batch, names: &CollectNames) -> Result<CollectedTables> {
        let work_dir = batch.work_dir.clone();
        let kegg_ids_out = batch_output_path(&work_dir, &names.kegg_ids);
        let by_protein_out = batch_output_path(&work_dir, &names.by_protein);

        run_blocking(move || {
            let aggregation = aggregate_dirs(&[work_dir], CollectMode::Completed)?;
            aggregation.write(&kegg_ids_out, &by_protein_out)?;
            Ok(CollectedTables {
                kegg_ids_out,
                by_protein_out,
                units: aggregation.units,
                unfinished: aggregation.unfinished,
                errors: aggregation.errors.len(),
            })
        })
        .await
    }
}

#[async_trait]
impl TaskExecutor for LocalExecutor {
    async fn execute(&self, batch: &Batch) -> Result<BatchReport> {
        let start = Instant::now();
        let batch_dir = batch.batch_dir.clone();
        let pattern = self.file_glob.clone();
        let units = run_blocking(move || discover_units(&batch_dir, &pattern)).await?;

        if units.is_empty() {
            info!(batch = batch.index, "Batch is empty, nothing to run");
            return Ok(BatchReport::empty(batch.index));
        }

        info!(
            batch = batch.index,
            units = units.len(),
            workers = self.workers,
            "Starting batch"
        );

        let bar = self.progress.add(create_progress_bar(
            units.len() as u64,
            &format!("batch {}", batch.index),
        ));
        let progress = DispatchProgress::with_bar(bar);

        let jobs = units
            .into_iter()
            .map(|unit| JobSpec {
                unit,
                batch_work_dir: batch.work_dir.clone(),
                data_dir: self.data_dir.clone(),
            })
            .collect();
        let outcomes = dispatch_all(&self.runner, jobs, self.workers, &progress).await;
        let summary = RunSummary::from_outcomes(&outcomes);

        let collected = match self.collect {
            Some(ref names) => Some(Self::collect(batch, names).await?),
            None => None,
        };

        let duration = start.elapsed();
        if summary.is_clean() {
            info!(
                batch = batch.index,
                done = summary.done,
                skipped = summary.skipped,
                "Batch complete in {:.2}s",
                duration.as_secs_f64()
            );
        } else {
            warn!(
                batch = batch.index,
                done = summary.done,
                skipped = summary.skipped,
                failed = summary.failed.len(),
                "Batch finished with failures in {:.2}s",
                duration.as_secs_f64()
            );
        }

        Ok(BatchReport {
            batch: batch.index,
            summary,
            collected,
            duration_seconds: duration.as_secs_f64(),
        })
    }
}

/// Annotate every matching file of `input_dir` into `work_dir`, without
/// batching.
pub async fn annotate_directory(
    runner: &JobRunner,
    input_dir: &Path,
    pattern: &str,
    work_dir: &Path,
    data_dir: &Path,
    workers: usize,
    progress: &DispatchProgress,
) -> Result<RunSummary> {
    let units = discover_units(input_dir, pattern)?;
    std::fs::create_dir_all(work_dir).map_err(|e| BatchError::io(work_dir, e))?;

    let jobs = units
        .into_iter()
        .map(|unit| JobSpec {
            unit,
            batch_work_dir: work_dir.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
        })
        .collect();
    let outcomes = dispatch_all(runner, jobs, workers, progress).await;
    Ok(RunSummary::from_outcomes(&outcomes))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::SkipPolicy;
    use crate::error::JobError;
    use crate::runner::{output_file_name, AnnotationTool, ToolInvocation};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StubTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AnnotationTool for StubTool {
        async fn annotate(&self, invocation: &ToolInvocation) -> std::result::Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let content = format!(
                "##\n##\n##\n##\n#query\teggNOG_OGs\tCOG_category\tDescription\tGOs\tEC\tKEGG_ko\tKEGG_Pathway\tKEGG_Module\tKEGG_Reaction\tPFAMs\n{}_p1\t-\tS\t-\t-\t-\tko:K00001\t-\t-\t-\t-\n",
                invocation.output_name
            );
            tokio::fs::write(
                invocation.output_dir.join(output_file_name(&invocation.output_name)),
                content,
            )
            .await
            .unwrap();
            Ok(())
        }

        fn name(&self) -> String {
            "stub".to_string()
        }
    }

    fn batch(root: &Path) -> Batch {
        Batch {
            index: 0,
            batch_dir: root.join("batch-dir-0"),
            work_dir: root.join("emapper-wdir-0"),
        }
    }

    fn executor(tool: Arc<StubTool>, data_dir: &Path) -> LocalExecutor {
        LocalExecutor::new(JobRunner::new(tool, SkipPolicy::MarkerOrOutput), data_dir, 2)
    }

    #[tokio::test]
    async fn test_empty_batch_is_skipped() {
        let temp = TempDir::new().unwrap();
        let batch = batch(temp.path());
        std::fs::create_dir_all(&batch.batch_dir).unwrap();

        let tool = Arc::new(StubTool { calls: AtomicUsize::new(0) });
        let report = executor(tool.clone(), temp.path()).execute(&batch).await.unwrap();

        assert_eq!(report.summary.total, 0);
        assert!(report.collected.is_none());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_runs_and_collects() {
        let temp = TempDir::new().unwrap();
        let batch = batch(temp.path());
        std::fs::create_dir_all(&batch.batch_dir).unwrap();
        for id in ["g1", "g2", "g3"] {
            std::fs::write(batch.batch_dir.join(format!("{}.faa", id)), ">p\nM\n").unwrap();
        }

        let tool = Arc::new(StubTool { calls: AtomicUsize::new(0) });
        let executor = executor(tool.clone(), temp.path()).collect_into(
            "eggnog-annotations-kegg-ids.tsv",
            "out/eggnog-annotations.by-protein.tsv",
        );

        let report = executor.execute(&batch).await.unwrap();
        assert_eq!(report.summary.done, 3);
        assert!(report.summary.is_clean());

        let collected = report.collected.unwrap();
        assert_eq!(collected.units, 3);
        assert_eq!(
            collected.by_protein_out,
            temp.path().join("emapper-wdir-0-eggnog-annotations.by-protein.tsv")
        );
        let wide = std::fs::read_to_string(collected.kegg_ids_out).unwrap();
        assert!(wide.starts_with("id\tK00001\n"));

        // second pass only skips
        let report = executor.execute(&batch).await.unwrap();
        assert_eq!(report.summary.skipped, 3);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_job_does_not_stop_siblings() {
        use crate::config::EmapperSettings;
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let batch = batch(temp.path());
        std::fs::create_dir_all(&batch.batch_dir).unwrap();
        for id in ["g1", "g2", "slow"] {
            std::fs::write(batch.batch_dir.join(format!("{}.faa", id)), ">p\nM\n").unwrap();
        }

        let script = temp.path().join("emapper.py");
        std::fs::write(
            &script,
            r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    --output_dir) out_dir="$2"; shift ;;
    --output) name="$2"; shift ;;
  esac
  shift
done
[ "$name" = slow ] && sleep 30
echo '#query' > "$out_dir/$name.emapper.annotations"
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = RunConfig {
            data_dir: temp.path().to_path_buf(),
            workers: 3,
            job_timeout_secs: Some(1),
            emapper: EmapperSettings {
                binary: script,
                ..EmapperSettings::default()
            },
            collect_batches: false,
            show_progress: false,
            ..RunConfig::default()
        };

        let report = LocalExecutor::from_config(&config).execute(&batch).await.unwrap();

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.done, 2);
        assert_eq!(report.summary.failed.len(), 1);
        let (unit, reason) = &report.summary.failed[0];
        assert_eq!(unit, "slow");
        assert!(reason.contains("timed out after 1s"), "{}", reason);
        assert!(batch.work_dir.join("g1/done").is_file());
        assert!(!batch.work_dir.join("slow/done").exists());
    }

    #[tokio::test]
    async fn test_annotate_directory() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(input.join("a.faa"), ">p\nM\n").unwrap();
        std::fs::write(input.join("notes.txt"), "x").unwrap();

        let tool = Arc::new(StubTool { calls: AtomicUsize::new(0) });
        let runner = JobRunner::new(tool, SkipPolicy::MarkerOrOutput);
        let summary = annotate_directory(
            &runner,
            &input,
            "*.faa",
            &temp.path().join("wdir"),
            temp.path(),
            4,
            &DispatchProgress::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 1);
        assert!(temp.path().join("wdir/a/done").is_file());
    }
}
