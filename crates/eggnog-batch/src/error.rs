//! Error types for batching, job execution and aggregation
//!
//! Three levels of failure are kept apart:
//!
//! - [`BatchError`] aborts a run (unreadable registry, bad configuration,
//!   staging failures, output tables that cannot be written).
//! - [`JobError`] belongs to a single input unit and never stops its siblings.
//! - [`AggregateError`] belongs to a single unit directory during collection.

use eggnog_common::EggnogError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for run-level operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Fatal, run-level errors
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Common(#[from] EggnogError),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The completed-work registry cannot be used to compute the backlog
    #[error("Cannot read completed registry {}: {reason}", path.display())]
    Registry { path: PathBuf, reason: String },

    #[error("Invalid file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A task executor could not run a batch at all
    #[error("Batch {batch} could not be executed: {reason}")]
    Executor { batch: usize, reason: String },

    /// Blocking file work moved off the runtime did not finish
    #[error("Background task failed: {0}")]
    Task(String),
}

impl BatchError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn registry(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::Registry {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Failure of one annotation job
#[derive(Error, Debug)]
pub enum JobError {
    #[error("failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr_tail}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr_tail: String,
    },

    #[error("{program} timed out after {limit:?}")]
    Timeout { program: String, limit: Duration },

    #[error("{program} reported success but {} was not written", path.display())]
    MissingOutput { program: String, path: PathBuf },

    #[error("job task did not complete: {0}")]
    Join(String),
}

impl JobError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Problem with one unit directory while collecting results
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("expected one annotation file in {}, found {count}", dir.display())]
    AmbiguousOutput { dir: PathBuf, count: usize },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed annotation table {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_messages_name_the_program() {
        let err = JobError::NonZeroExit {
            program: "emapper.py".to_string(),
            status: "exit status: 2".to_string(),
            stderr_tail: "diamond: database not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("emapper.py"));
        assert!(msg.contains("database not found"));

        let err = JobError::Timeout {
            program: "emapper.py".to_string(),
            limit: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "emapper.py timed out after 30s");

        let err = JobError::Timeout {
            program: "emapper.py".to_string(),
            limit: Duration::from_millis(300),
        };
        assert_eq!(err.to_string(), "emapper.py timed out after 300ms");
    }

    #[test]
    fn test_ambiguous_output_message() {
        let err = AggregateError::AmbiguousOutput {
            dir: PathBuf::from("wdir/GCA_1"),
            count: 2,
        };
        assert!(err.to_string().contains("found 2"));
    }
}
