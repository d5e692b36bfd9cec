//! Input units: one protein FASTA file per genome

use crate::error::{BatchError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One genome or sample to annotate
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InputUnit {
    /// File stem, e.g. `GCA_000001405` for `GCA_000001405.faa`
    pub id: String,
    pub path: PathBuf,
}

impl InputUnit {
    /// Build a unit from a file path. Returns `None` for paths without a
    /// usable UTF-8 file stem.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let id = path.file_stem()?.to_str()?.to_string();
        if id.is_empty() {
            return None;
        }
        Some(Self { id, path })
    }

    /// Key compared against the completed-work registry.
    ///
    /// With `Some(n)` this is the `n`th `_`-separated field of the id, so
    /// `bacdive_GCA_0001` with `n = 1` yields `GCA`. A missing field falls back
    /// to the whole id.
    pub fn comparison_key(&self, field: Option<usize>) -> &str {
        field
            .and_then(|n| self.id.split('_').nth(n))
            .filter(|key| !key.is_empty())
            .unwrap_or(&self.id)
    }

    /// File name of the unit's source file
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.id)
    }
}

/// List the files in `dir` whose names match `pattern`, sorted by id.
///
/// Only the top level of `dir` is scanned. Symlinks to files count as files.
pub fn discover_units(dir: &Path, pattern: &str) -> Result<Vec<InputUnit>> {
    let matcher = glob::Pattern::new(pattern).map_err(|source| BatchError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut units = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| BatchError::io(dir, e))? {
        let entry = entry.map_err(|e| BatchError::io(dir, e))?;
        let path = entry.path();
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            tracing::warn!(path = %path.display(), "Skipping file with non UTF-8 name");
            continue;
        };
        if !matcher.matches(name) || !path.is_file() {
            continue;
        }
        if let Some(unit) = InputUnit::from_path(path) {
            units.push(unit);
        }
    }

    units.sort();
    Ok(units)
}
