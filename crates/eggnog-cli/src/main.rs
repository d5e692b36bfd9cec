//! eggnog CLI - Main entry point

use clap::Parser;
use eggnog_cli::commands::annotate::AnnotateOptions;
use eggnog_batch::CollectMode;
use eggnog_cli::{Cli, Commands};
use eggnog_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let cli = Cli::parse();

    // Handle markdown help generation
    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    let Some(ref command) = cli.command else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    };

    // Verbose mode logs debug to the console; otherwise only warnings
    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    let defaults = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("eggnog")
        .build();

    // Environment variables take precedence
    let log_config = defaults.clone().merge_env().unwrap_or(defaults);

    // Logging is optional for the CLI
    let _guard = init_logging(&log_config).ok().flatten();

    if let Err(e) = execute_command(command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(command: &Commands) -> eggnog_cli::Result<()> {
    match command {
        Commands::Annotate {
            input_dir,
            file_glob,
            wdir,
            emapper_data,
            n_workers,
            emapper_bin,
            cpus,
            timeout,
            skip_policy,
        } => {
            eggnog_cli::commands::annotate::run(AnnotateOptions {
                input_dir: input_dir.clone(),
                file_glob: file_glob.clone(),
                wdir: wdir.clone(),
                data_dir: emapper_data.clone(),
                workers: *n_workers as usize,
                emapper_bin: emapper_bin.clone(),
                cpus: *cpus,
                timeout: *timeout,
                skip_policy: *skip_policy,
            })
            .await
        },

        Commands::Collect {
            emapper_results_dir,
            kegg_ids_out,
            by_protein_out,
            completed_only,
        } => {
            let mode = if *completed_only {
                CollectMode::Completed
            } else {
                CollectMode::AnyOutput
            };
            eggnog_cli::commands::collect::run(emapper_results_dir, kegg_ids_out, by_protein_out, mode)
                .await
        },

        Commands::Batch { run } => eggnog_cli::commands::batch::run(run).await,

        Commands::Plan { run, json } => eggnog_cli::commands::plan::run(run, *json).await,

        Commands::Status { work_dir, json } => {
            eggnog_cli::commands::status::run(work_dir, *json).await
        },
    }
}
