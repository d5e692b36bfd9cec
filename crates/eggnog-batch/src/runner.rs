//! Skip-aware execution of one annotation job
//!
//! Each job owns the directory `<batch work dir>/<unit id>`. A job that already
//! finished is recognised by its `done` marker (and, depending on
//! [`SkipPolicy`], by its fully named output file) and is not run again. An
//! output accepted without a marker is adopted: the marker is written then,
//! so collection, which only reads marked outputs, picks it up. The marker is
//! written with a temp-file-then-rename so a reader never sees a half-written
//! marker.

use crate::config::{EmapperSettings, SkipPolicy};
use crate::error::JobError;
use crate::unit::InputUnit;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Name of the completion marker inside a job directory
pub const DONE_MARKER: &str = "done";

/// Suffix of the per-unit annotation table written by emapper
pub const OUTPUT_SUFFIX: &str = ".emapper.annotations";

const MARKER_CONTENT: &[u8] = b"done\n";
const STDERR_TAIL_LINES: usize = 20;

/// `<unit id>.emapper.annotations`
pub fn output_file_name(unit_id: &str) -> String {
    format!("{}{}", unit_id, OUTPUT_SUFFIX)
}

/// Everything the external tool needs for one input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub input: PathBuf,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_name: String,
}

/// The external annotation program
#[async_trait]
pub trait AnnotationTool: Send + Sync {
    /// Run to completion. `Ok` means the process exited with status 0.
    async fn annotate(&self, invocation: &ToolInvocation) -> Result<(), JobError>;

    /// Name used in logs and error messages
    fn name(&self) -> String;
}

/// Runs `emapper.py` as a child process
#[derive(Debug, Clone)]
pub struct EmapperTool {
    settings: EmapperSettings,
    timeout: Option<Duration>,
}

impl EmapperTool {
    pub fn new(settings: EmapperSettings, timeout: Option<Duration>) -> Self {
        Self { settings, timeout }
    }
}

#[async_trait]
impl AnnotationTool for EmapperTool {
    async fn annotate(&self, invocation: &ToolInvocation) -> Result<(), JobError> {
        let program = self.name();
        let mut command = Command::new(&self.settings.binary);
        command
            .args(self.settings.args(
                &invocation.input,
                &invocation.data_dir,
                &invocation.output_dir,
                &invocation.output_name,
            ))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %program, ?command, "Spawning annotation process");
        let child = command.spawn().map_err(|source| JobError::Spawn {
            program: program.clone(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| JobError::Timeout {
                    program: program.clone(),
                    limit,
                })?,
            None => wait.await,
        }
        .map_err(|e| JobError::io(&invocation.output_dir, e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(JobError::NonZeroExit {
                program,
                status: output.status.to_string(),
                stderr_tail: stderr_tail(&output.stderr),
            })
        }
    }

    fn name(&self) -> String {
        self.settings.program_name()
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

/// Terminal state of a job that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// The tool ran and the marker was written
    Done,
    /// Already complete before this run
    Skipped,
}

/// On-disk layout of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub unit: InputUnit,
    pub work_dir: PathBuf,
    pub output_file: PathBuf,
    pub marker: PathBuf,
}

impl JobRecord {
    pub fn new(unit: InputUnit, batch_work_dir: &Path) -> Self {
        let work_dir = batch_work_dir.join(&unit.id);
        let output_file = work_dir.join(output_file_name(&unit.id));
        let marker = work_dir.join(DONE_MARKER);
        Self {
            unit,
            work_dir,
            output_file,
            marker,
        }
    }

    pub fn has_marker(&self) -> bool {
        self.marker.is_file()
    }

    pub fn is_complete(&self, policy: SkipPolicy) -> bool {
        match policy {
            SkipPolicy::MarkerOnly => self.has_marker(),
            SkipPolicy::MarkerOrOutput => self.has_marker() || self.output_file.is_file(),
        }
    }

    pub fn invocation(&self, data_dir: &Path) -> ToolInvocation {
        ToolInvocation {
            input: self.unit.path.clone(),
            data_dir: data_dir.to_path_buf(),
            output_dir: self.work_dir.clone(),
            output_name: self.unit.id.clone(),
        }
    }
}

/// Write the completion marker atomically.
pub async fn write_marker(marker: &Path) -> Result<(), JobError> {
    let tmp = marker.with_extension("tmp");
    tokio::fs::write(&tmp, MARKER_CONTENT)
        .await
        .map_err(|e| JobError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, marker)
        .await
        .map_err(|e| JobError::io(marker, e))
}

/// Runs jobs through an [`AnnotationTool`], skipping finished ones
#[derive(Clone)]
pub struct JobRunner {
    tool: Arc<dyn AnnotationTool>,
    skip_policy: SkipPolicy,
}

impl JobRunner {
    pub fn new(tool: Arc<dyn AnnotationTool>, skip_policy: SkipPolicy) -> Self {
        Self { tool, skip_policy }
    }

    pub fn skip_policy(&self) -> SkipPolicy {
        self.skip_policy
    }

    /// Annotate `unit` inside `batch_work_dir`, unless it is already complete.
    #[instrument(skip_all, fields(unit = %unit.id))]
    pub async fn run(
        &self,
        unit: &InputUnit,
        batch_work_dir: &Path,
        data_dir: &Path,
    ) -> Result<JobState, JobError> {
        let record = JobRecord::new(unit.clone(), batch_work_dir);
        tokio::fs::create_dir_all(&record.work_dir)
            .await
            .map_err(|e| JobError::io(&record.work_dir, e))?;

        if record.is_complete(self.skip_policy) {
            if !record.has_marker() {
                info!(output = %record.output_file.display(), "Adopting existing output");
                write_marker(&record.marker).await?;
            }
            debug!(dir = %record.work_dir.display(), "Already annotated, skipping");
            return Ok(JobState::Skipped);
        }

        if record.output_file.exists() {
            warn!(
                output = %record.output_file.display(),
                "Output present without completion marker, re-running"
            );
        }

        info!(input = %unit.path.display(), "Annotating");
        self.tool.annotate(&record.invocation(data_dir)).await?;

        if !record.output_file.is_file() {
            return Err(JobError::MissingOutput {
                program: self.tool.name(),
                path: record.output_file,
            });
        }

        write_marker(&record.marker).await?;
        info!("Annotation complete");
        Ok(JobState::Done)
    }
}
