//! Binary entry point for mnemos.
//!
//! This binary provides the CLI interface for importing conversation
//! exports into construct memory.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use clap::{Parser, Subcommand};
use mnemos::config::MnemosConfig;
use mnemos::io::SourceFormat;
use mnemos::observability::{self, InitOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Mnemos - resumable conversation import into construct memory.
#[derive(Parser)]
#[command(name = "mnemos")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics on the configured port while running.
    #[arg(long, global = true)]
    metrics_expose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Import a conversation export.
    Import {
        /// File to import.
        file: PathBuf,

        /// Construct whose memory is populated.
        #[arg(long)]
        construct: String,

        /// Source name recorded on every record (default: file name).
        #[arg(short, long)]
        source: Option<String>,

        /// Start over instead of resuming from the checkpoint.
        #[arg(long)]
        no_resume: bool,

        /// Skip the per-batch store count.
        #[arg(long)]
        no_verify: bool,

        /// Messages per batch.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Embedding worker threads.
        #[arg(long)]
        workers: Option<usize>,

        /// Source format: tree or transcript (default: detect).
        #[arg(short, long)]
        format: Option<SourceFormat>,
    },

    /// Show the checkpoint of one import.
    Status {
        /// Imported file.
        file: PathBuf,

        /// Construct the file was imported into.
        #[arg(long)]
        construct: String,
    },

    /// List checkpoints, or clear one.
    Checkpoints {
        /// File whose checkpoint to clear.
        #[arg(long, requires = "construct")]
        clear: Option<PathBuf>,

        /// Construct of the checkpoint to clear.
        #[arg(long, requires = "clear")]
        construct: Option<String>,
    },

    /// Print the detected format of a file.
    Detect {
        /// File to inspect.
        file: PathBuf,
    },
}

/// Main entry point.
fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init_from_config(
        &config,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: cli.metrics_expose,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: MnemosConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::Import {
            file,
            construct,
            source,
            no_resume,
            no_verify,
            batch_size,
            workers,
            format,
        } => commands::cmd_import(
            config,
            commands::ImportArgs {
                file,
                construct,
                source,
                resume: !no_resume,
                verify: !no_verify,
                batch_size,
                workers,
                format,
            },
        ),

        Commands::Status { file, construct } => commands::cmd_status(&config, &file, &construct),

        Commands::Checkpoints { clear, construct } => match (clear, construct) {
            (Some(file), Some(construct)) => commands::cmd_clear_checkpoint(&config, &file, &construct),
            _ => commands::cmd_list_checkpoints(&config),
        },

        Commands::Detect { file } => commands::cmd_detect(&file),
    }
}

/// Loads configuration.
fn load_config(path: Option<&Path>) -> Result<MnemosConfig, Box<dyn std::error::Error>> {
    let mut config = if let Some(config_path) = path {
        MnemosConfig::load_from_file(config_path)?
    } else if let Some(config_path) = std::env::var_os("MNEMOS_CONFIG_PATH").filter(|p| !p.is_empty()) {
        MnemosConfig::load_from_file(Path::new(&config_path))?
    } else {
        MnemosConfig::load_default()?
    };
    config.apply_env()?;
    Ok(config)
}
