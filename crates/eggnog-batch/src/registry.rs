//! Completed-work registry
//!
//! A read-only snapshot of identifiers that an earlier run already annotated,
//! loaded from one column of a tab-delimited table. Usually this is the
//! by-protein table of a previous run, whose `File ID` column holds unit ids.

use crate::error::{BatchError, Result};
use crate::unit::InputUnit;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct CompletedRegistry {
    ids: HashSet<String>,
}

impl CompletedRegistry {
    /// A registry with nothing completed
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Read the unique values of `column` from a tab-delimited file.
    ///
    /// Any problem (unreadable file, missing column, ragged rows) is an error:
    /// without a trustworthy registry the backlog cannot be computed.
    pub fn load(path: &Path, column: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .from_path(path)
            .map_err(|e| BatchError::registry(path, e.to_string()))?;

        let headers = reader
            .headers()
            .map_err(|e| BatchError::registry(path, e.to_string()))?;
        let index = headers
            .iter()
            .position(|h| h.trim() == column)
            .ok_or_else(|| BatchError::registry(path, format!("no column named '{}'", column)))?;

        let mut ids = HashSet::new();
        for (line, record) in reader.records().enumerate() {
            let record = record
                .map_err(|e| BatchError::registry(path, format!("row {}: {}", line + 1, e)))?;
            if let Some(id) = record.get(index).map(str::trim).filter(|id| !id.is_empty()) {
                ids.insert(id.to_string());
            }
        }

        tracing::info!(
            path = %path.display(),
            column,
            completed = ids.len(),
            "Loaded completed registry"
        );
        Ok(Self { ids })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Units whose comparison key is not in the registry, in input order.
    pub fn pending(&self, units: Vec<InputUnit>, key_field: Option<usize>) -> Vec<InputUnit> {
        units
            .into_iter()
            .filter(|unit| !self.contains(unit.comparison_key(key_field)))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn units(ids: &[&str]) -> Vec<InputUnit> {
        ids.iter()
            .map(|id| InputUnit::from_path(format!("/in/{}.faa", id)).unwrap())
            .collect()
    }

    #[test]
    fn test_pending_excludes_completed() {
        let registry = CompletedRegistry::from_ids(["A", "B"]);
        let pending = registry.pending(units(&["A", "B", "C", "D"]), None);
        let ids: Vec<&str> = pending.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["C", "D"]);
    }

    #[test]
    fn test_pending_with_key_field() {
        let registry = CompletedRegistry::from_ids(["GCA_1"]);
        let pending = registry.pending(units(&["x_GCA_1", "x_GCA_2"]), Some(1));
        // field 1 of both ids is "GCA", which is not in the registry
        assert_eq!(pending.len(), 2);

        let registry = CompletedRegistry::from_ids(["GCA"]);
        assert!(registry.pending(units(&["x_GCA_1"]), Some(1)).is_empty());
    }

    #[test]
    fn test_load_reads_unique_ids() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("merged.tsv");
        std::fs::write(
            &path,
            "File ID\tProtein ID\tDescription\nA\tp1\t\"quoted\" text\nA\tp2\t-\nB\tp1\t-\n",
        )
        .unwrap();

        let registry = CompletedRegistry::load(&path, "File ID").unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("A"));
        assert!(registry.contains("B"));
        assert!(!registry.contains("p1"));
    }

    #[test]
    fn test_load_missing_column_is_fatal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("merged.tsv");
        std::fs::write(&path, "id\tvalue\nA\t1\n").unwrap();

        let err = CompletedRegistry::load(&path, "File ID").unwrap_err();
        assert!(matches!(err, BatchError::Registry { .. }));
        assert!(err.to_string().contains("File ID"));
    }

    #[test]
    fn test_load_ragged_rows_are_fatal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("merged.tsv");
        std::fs::write(&path, "File ID\tProtein ID\nA\tp1\nB\n").unwrap();

        assert!(CompletedRegistry::load(&path, "File ID").is_err());
    }

    #[test]
    fn test_load_missing_file_is_fatal() {
        let temp = TempDir::new().unwrap();
        let err = CompletedRegistry::load(&temp.path().join("missing.tsv"), "File ID");
        assert!(matches!(err, Err(BatchError::Registry { .. })));
    }
}
