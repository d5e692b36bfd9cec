//! Backlog computation and round-robin batching
//!
//! The batcher owns a fixed number of batches for the whole run. Batch `i`
//! has a scratch directory `batch-dir-i` holding its staged input files and a
//! working directory `emapper-wdir-i` where its jobs write their output. Both
//! exist for every batch, however small the backlog is.
//!
//! Assignment is sticky across runs over the same work root: a unit that an
//! earlier run staged or annotated in batch `i` stays in batch `i`, so its
//! completion marker is found again. Only units never seen before are dealt
//! out, each to the batch holding the fewest units. On a fresh work root that
//! is plain round-robin.

use crate::config::StageMode;
use crate::error::{BatchError, Result};
use crate::registry::CompletedRegistry;
use crate::runner::{output_file_name, DONE_MARKER};
use crate::unit::{discover_units, InputUnit};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const BATCH_DIR_PREFIX: &str = "batch-dir-";
pub const WORK_DIR_PREFIX: &str = "emapper-wdir-";

/// One partition of the backlog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub index: usize,
    /// Staged input files
    pub batch_dir: PathBuf,
    /// Per-unit job directories
    pub work_dir: PathBuf,
}

/// Round-robin assignment of `pending` to `n_batches` batches: unit `i` goes
/// to batch `i % n_batches`.
///
/// Every batch index in `0..n_batches` is present in the result, possibly with
/// no units. `n_batches` must be at least 1.
pub fn assign_pending(pending: &[InputUnit], n_batches: usize) -> BTreeMap<usize, Vec<InputUnit>> {
    assign_resumed(pending, n_batches, &HashMap::new())
}

/// Assignment that keeps units in the batch an earlier run put them in.
///
/// `previous` maps unit ids to batch indices; entries outside `0..n_batches`
/// are ignored. The remaining units go, in order, to the batch with the
/// fewest units, lowest index first.
pub fn assign_resumed(
    pending: &[InputUnit],
    n_batches: usize,
    previous: &HashMap<String, usize>,
) -> BTreeMap<usize, Vec<InputUnit>> {
    let mut assignments: BTreeMap<usize, Vec<InputUnit>> =
        (0..n_batches).map(|i| (i, Vec::new())).collect();

    let mut fresh = Vec::new();
    for unit in pending {
        match previous.get(&unit.id).filter(|&&index| index < n_batches) {
            Some(&index) => assignments.entry(index).or_default().push(unit.clone()),
            None => fresh.push(unit),
        }
    }

    for unit in fresh {
        let target = assignments
            .iter()
            .min_by_key(|(index, units)| (units.len(), **index))
            .map(|(index, _)| *index)
            .unwrap_or(0);
        assignments.entry(target).or_default().push(unit.clone());
    }
    assignments
}

/// Result of diffing the input directory against the registry
#[derive(Debug, Clone, Serialize)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    pub assignments: BTreeMap<usize, Vec<InputUnit>>,
    /// Units found in the input directory
    pub discovered: usize,
    /// Units dropped because the registry lists them
    pub already_completed: usize,
}

impl BatchPlan {
    pub fn pending(&self) -> usize {
        self.assignments.values().map(Vec::len).sum()
    }

    /// Units assigned to batch `index`
    pub fn units(&self, index: usize) -> &[InputUnit] {
        self.assignments.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Partitions pending work into a fixed set of batch directories
#[derive(Debug, Clone)]
pub struct WorkBatcher {
    work_root: PathBuf,
    n_batches: usize,
    stage_mode: StageMode,
}

impl WorkBatcher {
    pub fn new(work_root: impl Into<PathBuf>, n_batches: usize, stage_mode: StageMode) -> Result<Self> {
        if n_batches == 0 {
            return Err(BatchError::config("number of batches must be at least 1"));
        }
        Ok(Self {
            work_root: work_root.into(),
            n_batches,
            stage_mode,
        })
    }

    pub fn n_batches(&self) -> usize {
        self.n_batches
    }

    pub fn batch(&self, index: usize) -> Batch {
        Batch {
            index,
            batch_dir: self.work_root.join(format!("{}{}", BATCH_DIR_PREFIX, index)),
            work_dir: self.work_root.join(format!("{}{}", WORK_DIR_PREFIX, index)),
        }
    }

    /// All `(batch dir, work dir)` pairs, in index order
    pub fn batches(&self) -> Vec<Batch> {
        (0..self.n_batches).map(|i| self.batch(i)).collect()
    }

    /// Compute the backlog and its assignment without touching the filesystem.
    pub fn plan(
        &self,
        input_dir: &Path,
        pattern: &str,
        registry: &CompletedRegistry,
        key_field: Option<usize>,
    ) -> Result<BatchPlan> {
        let units = discover_units(input_dir, pattern)?;
        let discovered = units.len();
        let pending = registry.pending(units, key_field);
        let previous = self.previous_assignments(pattern)?;
        let resumed = pending.iter().filter(|u| previous.contains_key(&u.id)).count();

        info!(
            discovered,
            completed = discovered - pending.len(),
            pending = pending.len(),
            resumed,
            batches = self.n_batches,
            "Computed annotation backlog"
        );

        Ok(BatchPlan {
            batches: self.batches(),
            assignments: assign_resumed(&pending, self.n_batches, &previous),
            discovered,
            already_completed: discovered - pending.len(),
        })
    }

    /// Batch each unit was placed in by an earlier run over this work root.
    ///
    /// A job directory holding a marker or output wins over a staged file,
    /// which wins over a bare job directory. Lower batch indices win ties.
    pub fn previous_assignments(&self, pattern: &str) -> Result<HashMap<String, usize>> {
        let mut previous = HashMap::new();
        if !self.work_root.is_dir() {
            return Ok(previous);
        }

        let batches = self.batches();
        let mut job_dirs: Vec<(usize, String, bool)> = Vec::new();
        for batch in &batches {
            if !batch.work_dir.is_dir() {
                continue;
            }
            let entries =
                std::fs::read_dir(&batch.work_dir).map_err(|e| BatchError::io(&batch.work_dir, e))?;
            for entry in entries {
                let path = entry.map_err(|e| BatchError::io(&batch.work_dir, e))?.path();
                let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                    continue;
                };
                if path.is_dir() {
                    let finished =
                        path.join(DONE_MARKER).is_file() || path.join(output_file_name(&id)).is_file();
                    job_dirs.push((batch.index, id, finished));
                }
            }
        }
        job_dirs.sort();

        for (index, id, _) in job_dirs.iter().filter(|(_, _, finished)| *finished) {
            previous.entry(id.clone()).or_insert(*index);
        }
        for batch in batches.iter().filter(|b| b.batch_dir.is_dir()) {
            for unit in discover_units(&batch.batch_dir, pattern)? {
                previous.entry(unit.id).or_insert(batch.index);
            }
        }
        for (index, id, _) in job_dirs {
            previous.entry(id).or_insert(index);
        }

        debug!(units = previous.len(), "Found earlier batch assignments");
        Ok(previous)
    }

    /// Compute the backlog, create every batch's directories and stage each
    /// pending unit into its batch directory.
    pub fn compute_batches(
        &self,
        input_dir: &Path,
        pattern: &str,
        registry: &CompletedRegistry,
        key_field: Option<usize>,
    ) -> Result<BatchPlan> {
        let plan = self.plan(input_dir, pattern, registry, key_field)?;
        self.create_dirs()?;

        for batch in &plan.batches {
            self.remove_stale(batch, plan.units(batch.index), pattern)?;
            for unit in plan.units(batch.index) {
                self.stage(unit, &batch.batch_dir)?;
            }
            debug!(
                batch = batch.index,
                units = plan.units(batch.index).len(),
                "Staged batch"
            );
        }

        Ok(plan)
    }

    /// Create both directories of every batch
    pub fn create_dirs(&self) -> Result<Vec<Batch>> {
        let batches = self.batches();
        for batch in &batches {
            for dir in [&batch.batch_dir, &batch.work_dir] {
                std::fs::create_dir_all(dir).map_err(|e| BatchError::io(dir, e))?;
            }
        }
        Ok(batches)
    }

    /// Remove staged files of units no longer assigned to `batch`: listed in
    /// the registry since, gone from the input directory, or kept elsewhere.
    fn remove_stale(&self, batch: &Batch, assigned: &[InputUnit], pattern: &str) -> Result<usize> {
        let keep: HashSet<&str> = assigned.iter().map(|u| u.id.as_str()).collect();
        let mut removed = 0;
        for staged in discover_units(&batch.batch_dir, pattern)? {
            if keep.contains(staged.id.as_str()) {
                continue;
            }
            std::fs::remove_file(&staged.path).map_err(|e| BatchError::io(&staged.path, e))?;
            removed += 1;
        }
        if removed > 0 {
            info!(batch = batch.index, removed, "Removed stale staged inputs");
        }
        Ok(removed)
    }

    fn stage(&self, unit: &InputUnit, batch_dir: &Path) -> Result<PathBuf> {
        let target = batch_dir.join(unit.file_name());
        match self.stage_mode {
            StageMode::Copy => {
                std::fs::copy(&unit.path, &target).map_err(|e| BatchError::io(&unit.path, e))?;
            },
            StageMode::Symlink => {
                if target.symlink_metadata().is_ok() {
                    std::fs::remove_file(&target).map_err(|e| BatchError::io(&target, e))?;
                }
                let source = std::fs::canonicalize(&unit.path)
                    .map_err(|e| BatchError::io(&unit.path, e))?;
                symlink(&source, &target).map_err(|e| BatchError::io(&target, e))?;
            },
        }
        Ok(target)
    }
}

#[cfg(unix)]
fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(not(unix))]
fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(source, target).map(|_| ())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn write_inputs(dir: &Path, ids: &[String]) {
        std::fs::create_dir_all(dir).unwrap();
        for id in ids {
            std::fs::write(dir.join(format!("{}.faa", id)), format!(">{}\nMKV\n", id)).unwrap();
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("GCA_{:03}", i)).collect()
    }

    #[test]
    fn test_assignment_is_balanced_and_exact() {
        let units: Vec<InputUnit> = ids(12)
            .iter()
            .map(|id| InputUnit::from_path(format!("/in/{}.faa", id)).unwrap())
            .collect();

        let assignments = assign_pending(&units, 5);

        assert_eq!(assignments.len(), 5);
        for batch_units in assignments.values() {
            assert!(batch_units.len() == 2 || batch_units.len() == 3);
        }

        let assigned: Vec<&InputUnit> = assignments.values().flatten().collect();
        assert_eq!(assigned.len(), units.len());
        let unique: HashSet<&str> = assigned.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(unique.len(), units.len());
    }

    #[test]
    fn test_round_robin_order() {
        let units: Vec<InputUnit> = ids(6)
            .iter()
            .map(|id| InputUnit::from_path(format!("/in/{}.faa", id)).unwrap())
            .collect();
        let assignments = assign_pending(&units, 3);

        for (i, unit) in units.iter().enumerate() {
            assert!(assignments[&(i % 3)].contains(unit));
        }
    }

    #[test]
    fn test_resumed_assignment_keeps_earlier_batches() {
        let units: Vec<InputUnit> = ["A", "B", "C", "D"]
            .iter()
            .map(|id| InputUnit::from_path(format!("/in/{}.faa", id)).unwrap())
            .collect();
        let previous = HashMap::from([
            ("B".to_string(), 0),
            ("D".to_string(), 1),
            ("C".to_string(), 7),
        ]);

        let assignments = assign_resumed(&units, 2, &previous);
        let ids_of = |i: usize| assignments[&i].iter().map(|u| u.id.as_str()).collect::<Vec<_>>();

        // A and C are new (C's batch is out of range) and fill the lighter batches
        assert_eq!(ids_of(0), vec!["B", "A"]);
        assert_eq!(ids_of(1), vec!["D", "C"]);
    }

    #[test]
    fn test_more_batches_than_units() {
        let units = vec![InputUnit::from_path("/in/only.faa").unwrap()];
        let assignments = assign_pending(&units, 4);
        assert_eq!(assignments.len(), 4);
        assert_eq!(assignments[&0].len(), 1);
        assert!(assignments[&3].is_empty());
    }

    #[test]
    fn test_zero_batches_rejected() {
        assert!(WorkBatcher::new("/tmp/w", 0, StageMode::Copy).is_err());
    }

    #[test]
    fn test_plan_filters_backlog() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        write_inputs(&input, &["A".into(), "B".into(), "C".into(), "D".into()]);

        let batcher = WorkBatcher::new(temp.path().join("w"), 2, StageMode::Copy).unwrap();
        let registry = CompletedRegistry::from_ids(["A", "B"]);
        let plan = batcher.plan(&input, "*.faa", &registry, None).unwrap();

        let pending: HashSet<&str> = plan
            .assignments
            .values()
            .flatten()
            .map(|u| u.id.as_str())
            .collect();
        assert_eq!(pending, HashSet::from(["C", "D"]));
        assert_eq!(plan.discovered, 4);
        assert_eq!(plan.already_completed, 2);
        assert!(!temp.path().join("w").exists());
    }

    #[test]
    fn test_compute_batches_creates_all_dirs_and_stages() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        write_inputs(&input, &ids(3));

        let work_root = temp.path().join("w");
        let batcher = WorkBatcher::new(&work_root, 5, StageMode::Copy).unwrap();
        let plan = batcher
            .compute_batches(&input, "*.faa", &CompletedRegistry::empty(), None)
            .unwrap();

        assert_eq!(plan.batches.len(), 5);
        for batch in &plan.batches {
            assert!(batch.batch_dir.is_dir());
            assert!(batch.work_dir.is_dir());
        }
        assert!(work_root.join("batch-dir-0").join("GCA_000.faa").is_file());
        assert!(work_root.join("batch-dir-2").join("GCA_002.faa").is_file());
        assert_eq!(std::fs::read_dir(work_root.join("batch-dir-4")).unwrap().count(), 0);
        assert_eq!(plan.pending(), 3);
    }

    #[test]
    fn test_new_input_does_not_move_finished_units() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        write_inputs(&input, &["B".into(), "D".into()]);

        let work_root = temp.path().join("w");
        let batcher = WorkBatcher::new(&work_root, 2, StageMode::Copy).unwrap();
        batcher
            .compute_batches(&input, "*.faa", &CompletedRegistry::empty(), None)
            .unwrap();
        // B finished in batch 0
        let job_dir = work_root.join("emapper-wdir-0/B");
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(job_dir.join(DONE_MARKER), "done\n").unwrap();

        write_inputs(&input, &["A".into()]);
        let plan = batcher
            .compute_batches(&input, "*.faa", &CompletedRegistry::empty(), None)
            .unwrap();

        assert!(plan.units(0).iter().any(|u| u.id == "B"));
        assert!(plan.units(1).iter().any(|u| u.id == "D"));
        assert_eq!(plan.pending(), 3);
        assert!(work_root.join("batch-dir-0/B.faa").is_file());
        assert!(!work_root.join("batch-dir-1/B.faa").exists());
    }

    #[test]
    fn test_registry_listed_units_are_unstaged() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        write_inputs(&input, &["A".into(), "B".into()]);

        let work_root = temp.path().join("w");
        let batcher = WorkBatcher::new(&work_root, 1, StageMode::Copy).unwrap();
        batcher
            .compute_batches(&input, "*.faa", &CompletedRegistry::empty(), None)
            .unwrap();
        assert!(work_root.join("batch-dir-0/A.faa").is_file());

        let plan = batcher
            .compute_batches(&input, "*.faa", &CompletedRegistry::from_ids(["A"]), None)
            .unwrap();

        assert_eq!(plan.pending(), 1);
        assert!(!work_root.join("batch-dir-0/A.faa").exists());
        assert!(work_root.join("batch-dir-0/B.faa").is_file());
    }

    #[test]
    fn test_previous_assignments_prefers_finished_job() {
        let temp = TempDir::new().unwrap();
        let work_root = temp.path().join("w");
        let batcher = WorkBatcher::new(&work_root, 2, StageMode::Copy).unwrap();
        batcher.create_dirs().unwrap();

        std::fs::write(work_root.join("batch-dir-0/X.faa"), ">p\nM\n").unwrap();
        std::fs::create_dir_all(work_root.join("emapper-wdir-1/X")).unwrap();
        std::fs::write(work_root.join("emapper-wdir-1/X/X.emapper.annotations"), "").unwrap();
        std::fs::create_dir_all(work_root.join("emapper-wdir-0/Y")).unwrap();

        let previous = batcher.previous_assignments("*.faa").unwrap();
        assert_eq!(previous["X"], 1);
        assert_eq!(previous["Y"], 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_staging() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        write_inputs(&input, &ids(1));

        let batcher = WorkBatcher::new(temp.path().join("w"), 1, StageMode::Symlink).unwrap();
        for _ in 0..2 {
            batcher
                .compute_batches(&input, "*.faa", &CompletedRegistry::empty(), None)
                .unwrap();
        }

        let staged = temp.path().join("w/batch-dir-0/GCA_000.faa");
        assert!(staged.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(staged).unwrap(), ">GCA_000\nMKV\n");
    }
}
