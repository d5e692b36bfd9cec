//! eggnog-batch
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Batched eggNOG-mapper annotation of protein FASTA collections, and
//! collection of the per-genome results into two tables.
//!
//! - [`runner`]: skip-aware execution of one emapper job
//! - [`dispatcher`]: bounded-concurrency fan-out of jobs
//! - [`registry`] and [`batcher`]: backlog computation and round-robin batching
//! - [`aggregator`]: wide KEGG count table and long by-protein table
//! - [`executor`] and [`pipeline`]: running batches and the whole run
//!
//! # Example
//!
//! ```no_run
//! use eggnog_batch::{run_pipeline, LocalExecutor, RunConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::load(Some(Path::new("eggnog.toml")))?;
//!     let executor = LocalExecutor::from_config(&config);
//!     let report = run_pipeline(&config, &executor).await?;
//!     println!("{} jobs, {} failed", report.summary.total, report.summary.failed.len());
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod args;
pub mod batcher;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod status;
pub mod unit;

// Re-export commonly used types
pub use aggregator::{aggregate, fold_tables, Aggregation, CollectMode};
pub use batcher::{Batch, BatchPlan, WorkBatcher};
pub use config::RunConfig;
pub use dispatcher::{dispatch_all, JobOutcome, RunSummary};
pub use error::{AggregateError, BatchError, JobError, Result};
pub use executor::{LocalExecutor, TaskExecutor};
pub use pipeline::{run_pipeline, PipelineReport};
pub use runner::{AnnotationTool, EmapperTool, JobRunner, JobState};
pub use unit::InputUnit;
