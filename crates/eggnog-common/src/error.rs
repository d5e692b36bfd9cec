//! Error types shared by the eggnog-batch crates

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, EggnogError>;

/// Errors that are not specific to one stage of the pipeline
#[derive(Error, Debug)]
pub enum EggnogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl EggnogError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

/// Fail with [`EggnogError::DirectoryNotFound`] unless `path` is an existing directory.
pub fn require_dir(path: impl Into<PathBuf>) -> Result<PathBuf> {
    let path = path.into();
    if path.is_dir() {
        Ok(path)
    } else {
        Err(EggnogError::DirectoryNotFound(path))
    }
}

/// Fail with [`EggnogError::FileNotFound`] unless `path` is an existing file.
pub fn require_file(path: impl Into<PathBuf>) -> Result<PathBuf> {
    let path = path.into();
    if path.is_file() {
        Ok(path)
    } else {
        Err(EggnogError::FileNotFound(path))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_require_dir() {
        let temp = TempDir::new().unwrap();
        assert!(require_dir(temp.path()).is_ok());

        let missing = temp.path().join("missing");
        let err = require_dir(&missing).unwrap_err();
        assert!(matches!(err, EggnogError::DirectoryNotFound(p) if p == missing));
    }

    #[test]
    fn test_require_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("registry.tsv");
        std::fs::write(&file, "File ID\n").unwrap();

        assert!(require_file(&file).is_ok());
        assert!(require_file(temp.path()).is_err());
    }
}
