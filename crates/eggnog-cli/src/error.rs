//! Error types for the eggnog CLI
//!
//! User-facing errors with a hint at how to fix the problem.

use eggnog_batch::BatchError;
use eggnog_common::EggnogError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// A directory given on the command line does not exist
    #[error("Directory not found: '{0}'. Check the path, or create it before running.")]
    DirectoryNotFound(String),

    /// Required file is missing
    #[error("File not found: '{0}'. Verify the file path exists and you have read permissions.")]
    FileNotFound(String),

    /// The completed-work registry cannot be read
    #[error("{0}. Pass a tab-delimited table with the expected column (see --registry-column).")]
    Registry(String),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your flags, EGGNOG_* environment variables or config file.")]
    Config(String),

    /// Some annotation jobs failed
    #[error("{failed} of {total} annotation jobs failed. Re-run the same command to retry only the failed units.")]
    JobsFailed { failed: usize, total: usize },

    /// Some batches could not be run at all
    #[error("{0} batches could not be executed. Check the log for the cause, then re-run the same command.")]
    BatchesFailed(usize),

    /// Some units could not be collected
    #[error("{0} unit directories could not be collected. Remove the stray output files and collect again.")]
    CollectFailed(usize),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed
    #[error("Failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Any other pipeline failure
    #[error(transparent)]
    Batch(BatchError),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<EggnogError> for CliError {
    fn from(err: EggnogError) -> Self {
        match err {
            EggnogError::DirectoryNotFound(path) => Self::DirectoryNotFound(path.display().to_string()),
            EggnogError::FileNotFound(path) => Self::FileNotFound(path.display().to_string()),
            EggnogError::Config(msg) => Self::Config(msg),
            EggnogError::Io(e) => Self::Io(e),
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<BatchError> for CliError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Common(common) => common.into(),
            BatchError::Config(msg) => Self::Config(msg),
            err @ BatchError::Pattern { .. } => Self::Config(err.to_string()),
            err @ BatchError::Registry { .. } => Self::Registry(err.to_string()),
            other => Self::Batch(other),
        }
    }
}
