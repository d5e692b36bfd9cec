//! Run configuration
//!
//! A [`RunConfig`] carries every path and tunable for one invocation. It is
//! built once (defaults, then an optional TOML file, then `EGGNOG_*`
//! environment variables, then command-line flags) and passed by reference to
//! the batching, dispatch and aggregation entry points.

use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

// ============================================================================
// Defaults
// ============================================================================

/// Upper bound on parallel jobs in one pool.
pub const MAX_CONCURRENCY: usize = 256;

/// Default number of batches (one per node in a cluster allocation).
pub const DEFAULT_BATCHES: usize = 5;

/// Default number of concurrent jobs inside one batch.
pub const DEFAULT_WORKERS: usize = 16;

/// Default `--cpu` hint handed to each emapper process.
pub const DEFAULT_TOOL_CPUS: u32 = 8;

pub const DEFAULT_FILE_GLOB: &str = "*.faa";
pub const DEFAULT_REGISTRY_COLUMN: &str = "File ID";
pub const DEFAULT_EMAPPER_BIN: &str = "emapper.py";
pub const DEFAULT_KEGG_IDS_OUT: &str = "eggnog-annotations-kegg-ids.tsv";
pub const DEFAULT_BY_PROTEIN_OUT: &str = "eggnog-annotations.by-protein.tsv";

/// What counts as "already annotated" when deciding whether to skip a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SkipPolicy {
    /// The `done` marker or the fully named output file
    #[default]
    MarkerOrOutput,
    /// Only the `done` marker
    MarkerOnly,
}

impl std::str::FromStr for SkipPolicy {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "marker-or-output" | "any" => Ok(SkipPolicy::MarkerOrOutput),
            "marker-only" | "marker" => Ok(SkipPolicy::MarkerOnly),
            _ => Err(BatchError::config(format!("Invalid skip policy: {}", s))),
        }
    }
}

/// How input files are placed into batch directories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StageMode {
    #[default]
    Copy,
    Symlink,
}

/// Fixed argument set for the external annotation binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmapperSettings {
    /// Program to execute
    pub binary: PathBuf,
    /// `--cpu`
    pub cpus: u32,
    /// `--override`
    pub override_existing: bool,
    /// `--itype`
    pub input_type: String,
    /// `-m`
    pub method: String,
    /// `--evalue`
    pub evalue: f64,
    /// `--query_cover`
    pub query_cover: u32,
    /// `--subject_cover`
    pub subject_cover: u32,
    /// `--sensmode`
    pub sensitivity: String,
}

impl Default for EmapperSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_EMAPPER_BIN),
            cpus: DEFAULT_TOOL_CPUS,
            override_existing: true,
            input_type: "proteins".to_string(),
            method: "diamond".to_string(),
            evalue: 0.001,
            query_cover: 80,
            subject_cover: 80,
            sensitivity: "mid-sensitive".to_string(),
        }
    }
}

impl EmapperSettings {
    /// Build the argument list for one input file.
    pub fn args(
        &self,
        input: &Path,
        data_dir: &Path,
        output_dir: &Path,
        output_name: &str,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--cpu".into(), self.cpus.to_string().into()];
        if self.override_existing {
            args.push("--override".into());
        }
        args.extend([
            "-i".into(),
            input.as_os_str().to_owned(),
            "--itype".into(),
            self.input_type.clone().into(),
            "-m".into(),
            self.method.clone().into(),
            "--evalue".into(),
            self.evalue.to_string().into(),
            "--query_cover".into(),
            self.query_cover.to_string().into(),
            "--subject_cover".into(),
            self.subject_cover.to_string().into(),
            "--sensmode".into(),
            self.sensitivity.clone().into(),
            "--data_dir".into(),
            data_dir.as_os_str().to_owned(),
            "--output_dir".into(),
            output_dir.as_os_str().to_owned(),
            "--output".into(),
            output_name.into(),
        ]);
        args
    }

    /// Program name used in log lines and error messages
    pub fn program_name(&self) -> String {
        self.binary
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.binary.display().to_string())
    }
}

/// Configuration for one batched annotation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Directory holding the protein FASTA files
    pub input_dir: PathBuf,

    /// Glob matched against file names in `input_dir`
    pub file_glob: String,

    /// Tab-delimited table of units that were annotated by an earlier run
    pub registry_file: Option<PathBuf>,

    /// Column of `registry_file` holding the completed identifiers
    pub registry_column: String,

    /// `_`-separated field of the file stem compared against the registry.
    /// `None` compares the whole stem.
    pub key_field: Option<usize>,

    /// Root for batch and working directories
    pub work_root: PathBuf,

    /// eggnog-mapper data directory (`--data_dir`)
    pub data_dir: PathBuf,

    /// Number of batches, fixed for the run
    pub batches: usize,

    /// Concurrent jobs inside each batch
    pub workers: usize,

    pub emapper: EmapperSettings,

    pub skip_policy: SkipPolicy,

    pub stage_mode: StageMode,

    /// Hard limit for a single emapper process, in seconds
    pub job_timeout_secs: Option<u64>,

    /// Write per-batch tables next to each working directory
    pub collect_batches: bool,

    /// Combined KEGG count table; relative paths resolve against `work_root`
    pub kegg_ids_out: PathBuf,

    /// Combined per-protein table; relative paths resolve against `work_root`
    pub by_protein_out: PathBuf,

    /// Render progress bars
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            file_glob: DEFAULT_FILE_GLOB.to_string(),
            registry_file: None,
            registry_column: DEFAULT_REGISTRY_COLUMN.to_string(),
            key_field: None,
            work_root: PathBuf::from("wdir"),
            data_dir: PathBuf::new(),
            batches: DEFAULT_BATCHES,
            workers: DEFAULT_WORKERS,
            emapper: EmapperSettings::default(),
            skip_policy: SkipPolicy::default(),
            stage_mode: StageMode::default(),
            job_timeout_secs: None,
            collect_batches: true,
            kegg_ids_out: PathBuf::from(DEFAULT_KEGG_IDS_OUT),
            by_protein_out: PathBuf::from(DEFAULT_BY_PROTEIN_OUT),
            show_progress: true,
        }
    }
}

impl RunConfig {
    /// Load a TOML file; missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| BatchError::io(path, e))?;
        toml::from_str(&text)
            .map_err(|e| BatchError::config(format!("{}: {}", path.display(), e)))
    }

    /// Defaults, or the given file, with `EGGNOG_*` overrides applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.merge_env()
    }

    /// Override fields from environment variables
    ///
    /// - `EGGNOG_INPUT_DIR`, `EGGNOG_FILE_GLOB`, `EGGNOG_WORK_DIR`, `EGGNOG_DATA_DIR`
    /// - `EGGNOG_REGISTRY`, `EGGNOG_REGISTRY_COLUMN`, `EGGNOG_KEY_FIELD`
    /// - `EGGNOG_BATCHES`, `EGGNOG_WORKERS`, `EGGNOG_JOB_TIMEOUT`
    /// - `EMAPPER_BIN`, `EMAPPER_CPUS`
    pub fn merge_env(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("EGGNOG_INPUT_DIR") {
            self.input_dir = PathBuf::from(dir);
        }
        if let Ok(glob) = std::env::var("EGGNOG_FILE_GLOB") {
            self.file_glob = glob;
        }
        if let Ok(dir) = std::env::var("EGGNOG_WORK_DIR") {
            self.work_root = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("EGGNOG_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(file) = std::env::var("EGGNOG_REGISTRY") {
            self.registry_file = Some(PathBuf::from(file));
        }
        if let Ok(column) = std::env::var("EGGNOG_REGISTRY_COLUMN") {
            self.registry_column = column;
        }
        if let Some(field) = env_number("EGGNOG_KEY_FIELD")? {
            self.key_field = Some(field);
        }
        if let Some(batches) = env_number("EGGNOG_BATCHES")? {
            self.batches = batches;
        }
        if let Some(workers) = env_number("EGGNOG_WORKERS")? {
            self.workers = workers;
        }
        if let Some(secs) = env_number("EGGNOG_JOB_TIMEOUT")? {
            self.job_timeout_secs = Some(secs);
        }
        if let Ok(bin) = std::env::var("EMAPPER_BIN") {
            self.emapper.binary = PathBuf::from(bin);
        }
        if let Some(cpus) = env_number("EMAPPER_CPUS")? {
            self.emapper.cpus = cpus;
        }
        Ok(self)
    }

    /// Check mandatory directories and numeric ranges before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.input_dir.as_os_str().is_empty() {
            return Err(BatchError::config("input directory is required"));
        }
        eggnog_common::error::require_dir(&self.input_dir)?;

        if self.data_dir.as_os_str().is_empty() {
            return Err(BatchError::config("emapper data directory is required"));
        }
        eggnog_common::error::require_dir(&self.data_dir)?;

        if let Some(ref registry) = self.registry_file {
            eggnog_common::error::require_file(registry)?;
        }

        if self.batches == 0 {
            return Err(BatchError::config("number of batches must be at least 1"));
        }
        if !(1..=MAX_CONCURRENCY).contains(&self.workers) {
            return Err(BatchError::config(format!(
                "workers must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.workers
            )));
        }
        if self.job_timeout_secs == Some(0) {
            return Err(BatchError::config("job timeout must be positive"));
        }

        glob::Pattern::new(&self.file_glob).map_err(|source| BatchError::Pattern {
            pattern: self.file_glob.clone(),
            source,
        })?;

        Ok(())
    }

    /// Per-job timeout as a `Duration`
    pub fn job_timeout(&self) -> Option<std::time::Duration> {
        self.job_timeout_secs.map(std::time::Duration::from_secs)
    }

    /// Where the combined KEGG count table is written
    pub fn kegg_ids_path(&self) -> PathBuf {
        self.resolve_output(&self.kegg_ids_out)
    }

    /// Where the combined per-protein table is written
    pub fn by_protein_path(&self) -> PathBuf {
        self.resolve_output(&self.by_protein_out)
    }

    fn resolve_output(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_root.join(path)
        }
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BatchError::config(format!("{} is not a valid number: {}", name, value))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_config(temp: &TempDir) -> RunConfig {
        let input = temp.path().join("genomes");
        let data = temp.path().join("eggnog-data");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&data).unwrap();
        RunConfig {
            input_dir: input,
            data_dir: data,
            work_root: temp.path().join("wdir"),
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_emapper_args_match_fixed_invocation() {
        let settings = EmapperSettings::default();
        let args = settings.args(
            Path::new("batch-dir-0/GCA_1.faa"),
            Path::new("/data/eggnog"),
            Path::new("emapper-wdir-0/GCA_1"),
            "GCA_1",
        );
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "--cpu", "8", "--override", "-i", "batch-dir-0/GCA_1.faa", "--itype", "proteins",
                "-m", "diamond", "--evalue", "0.001", "--query_cover", "80", "--subject_cover",
                "80", "--sensmode", "mid-sensitive", "--data_dir", "/data/eggnog",
                "--output_dir", "emapper-wdir-0/GCA_1", "--output", "GCA_1",
            ]
        );
    }

    #[test]
    fn test_validate_accepts_defaults_with_directories() {
        let temp = TempDir::new().unwrap();
        assert!(valid_config(&temp).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_directories() {
        let temp = TempDir::new().unwrap();

        let mut config = valid_config(&temp);
        config.input_dir = temp.path().join("nope");
        assert!(config.validate().is_err());

        let mut config = valid_config(&temp);
        config.data_dir = PathBuf::new();
        assert!(matches!(config.validate(), Err(BatchError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range_numbers() {
        let temp = TempDir::new().unwrap();

        let mut config = valid_config(&temp);
        config.batches = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config(&temp);
        config.workers = MAX_CONCURRENCY + 1;
        assert!(config.validate().is_err());

        let mut config = valid_config(&temp);
        config.file_glob = "[*.faa".to_string();
        assert!(matches!(config.validate(), Err(BatchError::Pattern { .. })));
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.toml");
        std::fs::write(
            &path,
            r#"
input_dir = "/scratch/genomes"
data_dir = "/scratch/eggnog"
batches = 3
skip_policy = "marker-only"
stage_mode = "symlink"

[emapper]
cpus = 32
"#,
        )
        .unwrap();

        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(config.input_dir, PathBuf::from("/scratch/genomes"));
        assert_eq!(config.batches, 3);
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.skip_policy, SkipPolicy::MarkerOnly);
        assert_eq!(config.stage_mode, StageMode::Symlink);
        assert_eq!(config.emapper.cpus, 32);
        assert_eq!(config.emapper.method, "diamond");
    }

    #[test]
    fn test_output_paths_resolve_against_work_root() {
        let config = RunConfig {
            work_root: PathBuf::from("/runs/r1"),
            by_protein_out: PathBuf::from("/results/by-protein.tsv"),
            ..RunConfig::default()
        };
        assert_eq!(
            config.kegg_ids_path(),
            PathBuf::from("/runs/r1").join(DEFAULT_KEGG_IDS_OUT)
        );
        assert_eq!(config.by_protein_path(), PathBuf::from("/results/by-protein.tsv"));
    }

    #[test]
    fn test_skip_policy_from_str() {
        assert_eq!("marker-only".parse::<SkipPolicy>().unwrap(), SkipPolicy::MarkerOnly);
        assert_eq!("ANY".parse::<SkipPolicy>().unwrap(), SkipPolicy::MarkerOrOutput);
        assert!("never".parse::<SkipPolicy>().is_err());
    }
}
