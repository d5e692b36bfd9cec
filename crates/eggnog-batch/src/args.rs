//! Command-line options for a batched run, shared by `eggnog-batch` and
//! `eggnog batch`

use crate::config::{RunConfig, SkipPolicy, StageMode, MAX_CONCURRENCY};
use crate::error::Result;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// TOML configuration file; flags override its values
    #[arg(short, long, env = "EGGNOG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory containing the protein FASTA files
    #[arg(short, long)]
    pub input_dir: Option<PathBuf>,

    /// Glob matched against input file names
    #[arg(short, long)]
    pub file_glob: Option<String>,

    /// Table of already annotated units (e.g. a previous by-protein output)
    #[arg(short, long)]
    pub registry: Option<PathBuf>,

    /// Column of the registry holding unit identifiers
    #[arg(long)]
    pub registry_column: Option<String>,

    /// Compare only this `_`-separated field of each file stem with the registry
    #[arg(long)]
    pub key_field: Option<usize>,

    /// Root for batch and working directories
    #[arg(short, long)]
    pub work_dir: Option<PathBuf>,

    /// eggnog-mapper data directory
    #[arg(short = 'e', long)]
    pub data_dir: Option<PathBuf>,

    /// Number of batches
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub batches: Option<u32>,

    /// Concurrent jobs per batch
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u32).range(1..=MAX_CONCURRENCY as i64))]
    pub workers: Option<u32>,

    /// Path to emapper.py
    #[arg(long)]
    pub emapper_bin: Option<PathBuf>,

    /// CPUs handed to each emapper process
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Kill a job after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Symlink inputs into batch directories instead of copying
    #[arg(long)]
    pub symlink: bool,

    /// When to treat a job as already done: marker-or-output, marker-only
    #[arg(long)]
    pub skip_policy: Option<SkipPolicy>,

    /// Combined KEGG count table
    #[arg(long)]
    pub kegg_ids_out: Option<PathBuf>,

    /// Combined per-protein table
    #[arg(long)]
    pub by_protein_out: Option<PathBuf>,

    /// Do not write per-batch tables
    #[arg(long)]
    pub no_batch_tables: bool,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,
}

impl RunArgs {
    /// Defaults, config file and environment, then these flags on top.
    pub fn resolve(&self) -> Result<RunConfig> {
        let config = RunConfig::load(self.config.as_deref())?;
        Ok(self.apply(config))
    }

    /// Overwrite every field of `config` given on the command line.
    pub fn apply(&self, mut config: RunConfig) -> RunConfig {
        if let Some(ref dir) = self.input_dir {
            config.input_dir = dir.clone();
        }
        if let Some(ref glob) = self.file_glob {
            config.file_glob = glob.clone();
        }
        if let Some(ref registry) = self.registry {
            config.registry_file = Some(registry.clone());
        }
        if let Some(ref column) = self.registry_column {
            config.registry_column = column.clone();
        }
        if self.key_field.is_some() {
            config.key_field = self.key_field;
        }
        if let Some(ref dir) = self.work_dir {
            config.work_root = dir.clone();
        }
        if let Some(ref dir) = self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(batches) = self.batches {
            config.batches = batches as usize;
        }
        if let Some(workers) = self.workers {
            config.workers = workers as usize;
        }
        if let Some(ref bin) = self.emapper_bin {
            config.emapper.binary = bin.clone();
        }
        if let Some(cpus) = self.cpus {
            config.emapper.cpus = cpus;
        }
        if self.timeout.is_some() {
            config.job_timeout_secs = self.timeout;
        }
        if self.symlink {
            config.stage_mode = StageMode::Symlink;
        }
        if let Some(policy) = self.skip_policy {
            config.skip_policy = policy;
        }
        if let Some(ref path) = self.kegg_ids_out {
            config.kegg_ids_out = path.clone();
        }
        if let Some(ref path) = self.by_protein_out {
            config.by_protein_out = path.clone();
        }
        if self.no_batch_tables {
            config.collect_batches = false;
        }
        if self.no_progress {
            config.show_progress = false;
        }
        config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_flags_override_config() {
        let cli = TestCli::try_parse_from([
            "test",
            "-i",
            "/data/faa",
            "-e",
            "/db/eggnog",
            "--batches",
            "3",
            "-n",
            "12",
            "--symlink",
            "--skip-policy",
            "marker-only",
            "--timeout",
            "3600",
        ])
        .unwrap();

        let config = cli.run.apply(RunConfig::default());
        assert_eq!(config.input_dir, PathBuf::from("/data/faa"));
        assert_eq!(config.data_dir, PathBuf::from("/db/eggnog"));
        assert_eq!(config.batches, 3);
        assert_eq!(config.workers, 12);
        assert_eq!(config.stage_mode, StageMode::Symlink);
        assert_eq!(config.skip_policy, SkipPolicy::MarkerOnly);
        assert_eq!(config.job_timeout_secs, Some(3600));
        assert!(config.collect_batches);
    }

    #[test]
    fn test_unset_flags_keep_config() {
        let cli = TestCli::try_parse_from(["test"]).unwrap();
        let base = RunConfig {
            batches: 9,
            ..RunConfig::default()
        };
        let config = cli.run.apply(base);
        assert_eq!(config.batches, 9);
        assert_eq!(config.stage_mode, StageMode::Copy);
    }

    #[test]
    fn test_workers_out_of_range() {
        assert!(TestCli::try_parse_from(["test", "-n", "0"]).is_err());
        assert!(TestCli::try_parse_from(["test", "-n", "257"]).is_err());
    }
}
