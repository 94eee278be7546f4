// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The `grimoire` binary: batch ingestion driver and job inspection tools.

mod commands;
mod format;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gri_core::Environment;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "grimoire", version, about = "Deterministic ingestion core for TTRPG rulebook RAG")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest one or more source documents.
    Ingest {
        /// Source document paths.
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Target environment.
        #[arg(long, value_parser = parse_environment, default_value = "dev")]
        env: Environment,

        /// Ignore Gate 0 state and run the full pipeline.
        #[arg(long)]
        force_full: bool,

        /// Disable section-level delta re-processing.
        #[arg(long)]
        no_delta: bool,

        /// Print JSON results instead of pretty output.
        #[arg(long)]
        json: bool,
    },

    /// Inspect job directories.
    Jobs {
        #[command(subcommand)]
        command: JobsCommands,
    },

    /// Audit log tools.
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },

    /// Remove orphaned .tmp files left by interrupted jobs.
    Sweep {
        /// Target environment.
        #[arg(long, value_parser = parse_environment, default_value = "dev")]
        env: Environment,
    },
}

#[derive(Subcommand, Debug)]
enum JobsCommands {
    /// List job directories and their final status.
    List {
        /// Target environment.
        #[arg(long, value_parser = parse_environment, default_value = "dev")]
        env: Environment,

        /// Restrict to one source id.
        #[arg(long)]
        source: Option<String>,

        /// Print JSON instead of pretty output.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommands {
    /// Verify the hash chain of a job's audit log.
    Verify {
        /// Job directory containing audit.ndjson.
        #[arg(long)]
        job_dir: PathBuf,
    },
}

fn parse_environment(s: &str) -> Result<Environment, String> {
    Environment::parse(s).ok_or_else(|| format!("unknown environment '{s}' (dev|test|prod)"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let outcome = run(cli).await;
    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(commands::EXIT_PREFLIGHT)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = commands::load_validated_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Ingest {
            sources,
            env,
            force_full,
            no_delta,
            json,
        } => commands::ingest(config, sources, env, force_full, no_delta, json).await,
        Commands::Jobs {
            command: JobsCommands::List { env, source, json },
        } => commands::jobs_list(config, env, source.as_deref(), json),
        Commands::Audit {
            command: AuditCommands::Verify { job_dir },
        } => commands::audit_verify(&job_dir),
        Commands::Sweep { env } => commands::sweep(config, env),
    }
}
