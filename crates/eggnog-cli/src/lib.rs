//! eggnog CLI Library
//!
//! Command-line interface for annotating protein FASTA collections with
//! eggNOG-mapper and collecting the results.
//!
//! # Overview
//!
//! - **Annotation**: run emapper over one directory with a bounded pool (`eggnog annotate`)
//! - **Collection**: fold a results tree into the KEGG and by-protein tables (`eggnog collect`)
//! - **Batched runs**: backlog, batching, execution and collection in one go (`eggnog batch`)
//! - **Dry runs**: show the backlog and batch assignment (`eggnog plan`)
//! - **Status**: per-batch progress of a work root (`eggnog status`)

pub mod commands;
pub mod error;

// Re-export commonly used types
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use eggnog_batch::args::RunArgs;
use eggnog_batch::config::{
    SkipPolicy, DEFAULT_BY_PROTEIN_OUT, DEFAULT_EMAPPER_BIN, DEFAULT_FILE_GLOB,
    DEFAULT_KEGG_IDS_OUT, DEFAULT_TOOL_CPUS, MAX_CONCURRENCY,
};
use std::path::PathBuf;

/// eggnog - batched eggNOG-mapper annotation
#[derive(Parser, Debug)]
#[command(name = "eggnog")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the command reference as markdown and exit
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Annotate every matching FASTA file of a directory
    Annotate {
        /// Path to input directory
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Input file glob
        #[arg(short, long, default_value = DEFAULT_FILE_GLOB)]
        file_glob: String,

        /// Working directory; one subdirectory per input file
        #[arg(short, long)]
        wdir: PathBuf,

        /// Path to eggnog-mapper-data directory
        #[arg(short = 'e', long)]
        emapper_data: PathBuf,

        /// Number of concurrent emapper processes
        #[arg(short, long, default_value_t = 25, value_parser = clap::value_parser!(u32).range(1..=MAX_CONCURRENCY as i64))]
        n_workers: u32,

        /// Path to emapper.py
        #[arg(long, env = "EMAPPER_BIN", default_value = DEFAULT_EMAPPER_BIN)]
        emapper_bin: PathBuf,

        /// CPUs handed to each emapper process
        #[arg(long, default_value_t = DEFAULT_TOOL_CPUS)]
        cpus: u32,

        /// Kill a job after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// When to treat a job as already done: marker-or-output, marker-only
        #[arg(long, default_value = "marker-or-output")]
        skip_policy: SkipPolicy,
    },

    /// Write the KEGG count and by-protein tables for a results directory
    Collect {
        /// Path to the annotate results directory
        #[arg(short = 'e', long)]
        emapper_results_dir: PathBuf,

        /// KEGG ids output file name
        #[arg(short, long, default_value = DEFAULT_KEGG_IDS_OUT)]
        kegg_ids_out: PathBuf,

        /// By-protein annotation file name
        #[arg(short, long, default_value = DEFAULT_BY_PROTEIN_OUT)]
        by_protein_out: PathBuf,

        /// Only collect units whose job wrote a completion marker
        #[arg(long)]
        completed_only: bool,
    },

    /// Run the full batched pipeline
    Batch {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Show the backlog and batch assignment without running anything
    Plan {
        #[command(flatten)]
        run: RunArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show per-batch progress of a work root
    Status {
        /// Root holding batch-dir-* and emapper-wdir-*
        #[arg(short, long)]
        work_dir: PathBuf,

        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
}
