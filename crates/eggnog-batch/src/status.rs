//! Progress of an existing work root, read from disk

use crate::batcher::{BATCH_DIR_PREFIX, WORK_DIR_PREFIX};
use crate::error::{BatchError, Result};
use crate::runner::JobRecord;
use crate::unit::InputUnit;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchStatus {
    pub index: usize,
    /// Input files in the batch directory
    pub staged: usize,
    /// Staged units with a completion marker
    pub done: usize,
    /// Staged units with an output file but no marker
    pub unmarked_outputs: usize,
    /// Staged units without a marker
    pub pending: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkStatus {
    pub work_root: PathBuf,
    pub batches: Vec<BatchStatus>,
}

impl WorkStatus {
    pub fn staged(&self) -> usize {
        self.batches.iter().map(|b| b.staged).sum()
    }

    pub fn done(&self) -> usize {
        self.batches.iter().map(|b| b.done).sum()
    }

    pub fn pending(&self) -> usize {
        self.batches.iter().map(|b| b.pending).sum()
    }
}

/// Inspect every `batch-dir-<i>` under `work_root` and its working directory.
pub fn scan_work_root(work_root: &Path) -> Result<WorkStatus> {
    let mut indices = Vec::new();
    for entry in std::fs::read_dir(work_root).map_err(|e| BatchError::io(work_root, e))? {
        let entry = entry.map_err(|e| BatchError::io(work_root, e))?;
        let name = entry.file_name();
        let index = name
            .to_str()
            .and_then(|n| n.strip_prefix(BATCH_DIR_PREFIX))
            .and_then(|i| i.parse::<usize>().ok());
        if let Some(index) = index.filter(|_| entry.path().is_dir()) {
            indices.push(index);
        }
    }
    indices.sort_unstable();

    let batches = indices
        .into_iter()
        .map(|index| scan_batch(work_root, index))
        .collect::<Result<Vec<_>>>()?;

    Ok(WorkStatus {
        work_root: work_root.to_path_buf(),
        batches,
    })
}

fn scan_batch(work_root: &Path, index: usize) -> Result<BatchStatus> {
    let batch_dir = work_root.join(format!("{}{}", BATCH_DIR_PREFIX, index));
    let work_dir = work_root.join(format!("{}{}", WORK_DIR_PREFIX, index));

    let mut status = BatchStatus {
        index,
        staged: 0,
        done: 0,
        unmarked_outputs: 0,
        pending: 0,
    };

    for entry in std::fs::read_dir(&batch_dir).map_err(|e| BatchError::io(&batch_dir, e))? {
        let path = entry.map_err(|e| BatchError::io(&batch_dir, e))?.path();
        let Some(unit) = InputUnit::from_path(&path).filter(|_| path.is_file()) else {
            continue;
        };
        status.staged += 1;

        let record = JobRecord::new(unit, &work_dir);
        if record.has_marker() {
            status.done += 1;
        } else {
            status.pending += 1;
            if record.output_file.is_file() {
                status.unmarked_outputs += 1;
            }
        }
    }

    Ok(status)
}
