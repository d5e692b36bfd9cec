//! Bounded-concurrency dispatch of annotation jobs
//!
//! Every submitted job runs to a terminal state. A failing job is recorded
//! against its unit and never cancels its siblings; the caller gets one
//! [`JobOutcome`] per job, in submission order, once all of them resolved.

use crate::config::MAX_CONCURRENCY;
use crate::error::JobError;
use crate::runner::{JobRunner, JobState};
use crate::unit::InputUnit;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, info};

/// One job to dispatch
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub unit: InputUnit,
    pub batch_work_dir: PathBuf,
    pub data_dir: PathBuf,
}

/// Result of one dispatched job
#[derive(Debug)]
pub struct JobOutcome {
    pub unit: InputUnit,
    pub result: Result<JobState, JobError>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Advisory completed/total counter, optionally mirrored to a progress bar
#[derive(Default)]
pub struct DispatchProgress {
    completed: AtomicUsize,
    total: AtomicUsize,
    bar: Option<ProgressBar>,
}

impl DispatchProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bar(bar: ProgressBar) -> Self {
        Self {
            bar: Some(bar),
            ..Self::default()
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    fn start(&self, total: usize) {
        self.total.fetch_add(total, Ordering::Relaxed);
        if let Some(ref bar) = self.bar {
            bar.set_length(self.total() as u64);
        }
    }

    fn record(&self) {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(ref bar) = self.bar {
            bar.inc(1);
        }
        debug!(completed = done, total = self.total(), "Job finished");
    }

    fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish();
        }
    }
}

/// Clamp a requested pool size to `1..=MAX_CONCURRENCY`
pub fn effective_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_CONCURRENCY)
}

/// Run all `jobs` with at most `max_concurrency` in flight and wait for every one.
pub async fn dispatch_all(
    runner: &JobRunner,
    jobs: Vec<JobSpec>,
    max_concurrency: usize,
    progress: &DispatchProgress,
) -> Vec<JobOutcome> {
    let concurrency = effective_concurrency(max_concurrency);
    let total = jobs.len();
    progress.start(total);

    info!(jobs = total, concurrency, "Dispatching annotation jobs");

    let mut outcomes: Vec<(usize, JobOutcome)> = stream::iter(jobs.into_iter().enumerate())
        .map(|(index, spec)| {
            let runner = runner.clone();
            async move {
                let unit = spec.unit.clone();
                // Each job runs on its own task so a panic stays with that job.
                let handle = tokio::spawn(async move {
                    runner
                        .run(&spec.unit, &spec.batch_work_dir, &spec.data_dir)
                        .await
                });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(join_error) => Err(JobError::Join(join_error.to_string())),
                };

                if let Err(ref e) = result {
                    error!(unit = %unit.id, error = %e, "Annotation job failed");
                }
                progress.record();

                (index, JobOutcome { unit, result })
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    progress.finish();
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

/// Counts and failures over a set of outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub done: usize,
    pub skipped: usize,
    /// `(unit id, error message)` for each failed job
    pub failed: Vec<(String, String)>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[JobOutcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.result {
                Ok(JobState::Done) => summary.done += 1,
                Ok(JobState::Skipped) => summary.skipped += 1,
                Err(ref e) => summary.failed.push((outcome.unit.id.clone(), e.to_string())),
            }
        }
        summary
    }

    pub fn succeeded(&self) -> usize {
        self.done + self.skipped
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fold another summary into this one
    pub fn merge(&mut self, other: &RunSummary) {
        self.total += other.total;
        self.done += other.done;
        self.skipped += other.skipped;
        self.failed.extend(other.failed.iter().cloned());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::SkipPolicy;
    use crate::runner::{output_file_name, AnnotationTool, ToolInvocation, DONE_MARKER};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fails for one unit id, tracks peak concurrency
    struct FlakyTool {
        fail_for: &'static str,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FlakyTool {
        fn new(fail_for: &'static str) -> Self {
            Self {
                fail_for,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AnnotationTool for FlakyTool {
        async fn annotate(&self, invocation: &ToolInvocation) -> Result<(), JobError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if invocation.output_name == self.fail_for {
                return Err(JobError::NonZeroExit {
                    program: "stub".to_string(),
                    status: "exit status: 3".to_string(),
                    stderr_tail: "boom".to_string(),
                });
            }
            let out = invocation
                .output_dir
                .join(output_file_name(&invocation.output_name));
            tokio::fs::write(out, "#query\n").await.unwrap();
            Ok(())
        }

        fn name(&self) -> String {
            "stub".to_string()
        }
    }

    fn jobs(temp: &TempDir, count: usize) -> Vec<JobSpec> {
        (1..=count)
            .map(|i| {
                let path = temp.path().join(format!("job{}.faa", i));
                std::fs::write(&path, ">p\nM\n").unwrap();
                JobSpec {
                    unit: InputUnit::from_path(path).unwrap(),
                    batch_work_dir: temp.path().join("wdir"),
                    data_dir: temp.path().to_path_buf(),
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let temp = TempDir::new().unwrap();
        let runner = JobRunner::new(Arc::new(FlakyTool::new("job3")), SkipPolicy::MarkerOrOutput);
        let progress = DispatchProgress::new();

        let outcomes = dispatch_all(&runner, jobs(&temp, 5), 2, &progress).await;

        assert_eq!(outcomes.len(), 5);
        let ids: Vec<&str> = outcomes.iter().map(|o| o.unit.id.as_str()).collect();
        assert_eq!(ids, vec!["job1", "job2", "job3", "job4", "job5"]);
        for outcome in &outcomes {
            assert_eq!(outcome.is_success(), outcome.unit.id != "job3");
        }
        assert_eq!(progress.completed(), 5);
        assert_eq!(progress.total(), 5);

        // each unit ends with exactly one of: marker, recorded failure
        for outcome in &outcomes {
            let marker = temp.path().join("wdir").join(&outcome.unit.id).join(DONE_MARKER);
            assert_ne!(marker.exists(), outcome.result.is_err());
        }

        let summary = RunSummary::from_outcomes(&outcomes);
        assert_eq!(summary.done, 4);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "job3");
        assert!(summary.failed[0].1.contains("boom"));
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_is_respected() {
        let temp = TempDir::new().unwrap();
        let tool = Arc::new(FlakyTool::new("none"));
        let runner = JobRunner::new(tool.clone(), SkipPolicy::MarkerOrOutput);

        let outcomes = dispatch_all(&runner, jobs(&temp, 8), 3, &DispatchProgress::new()).await;

        assert!(outcomes.iter().all(JobOutcome::is_success));
        assert!(tool.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_empty_dispatch() {
        let runner = JobRunner::new(Arc::new(FlakyTool::new("none")), SkipPolicy::MarkerOrOutput);
        let outcomes = dispatch_all(&runner, Vec::new(), 4, &DispatchProgress::new()).await;
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_effective_concurrency() {
        assert_eq!(effective_concurrency(0), 1);
        assert_eq!(effective_concurrency(25), 25);
        assert_eq!(effective_concurrency(10_000), MAX_CONCURRENCY);
    }

    #[test]
    fn test_summary_merge() {
        let mut a = RunSummary {
            total: 3,
            done: 1,
            skipped: 1,
            failed: vec![("x".to_string(), "err".to_string())],
        };
        let b = RunSummary {
            total: 2,
            done: 2,
            ..RunSummary::default()
        };
        a.merge(&b);
        assert_eq!(a.total, 5);
        assert_eq!(a.succeeded(), 4);
        assert!(!a.is_clean());
    }
}
