//! Keel CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Configuration error
//! - 4: Dependency graph error

use std::process::ExitCode;

use clap::Parser;
use keel_config::ConfigError;
use keel_constructs::ConstructError;
use keel_core::CoreError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const CONFIG_ERROR: u8 = 3;
    pub const GRAPH_ERROR: u8 = 4;
}

const DEFAULT_FILTER: &str = "keel=info,warn";
const VERBOSE_FILTER: &str = "keel=debug,info";

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let registry = tracing_subscriber::registry().with(filter);
    let log_result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let global = cli.global();
    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(&global, args).await,
        Commands::Config(args) => commands::config::execute(&global, args).await,
        Commands::Synth(args) => commands::synth::execute(&global, args).await,
        Commands::Graph(args) => commands::graph::execute(&global, args).await,
        Commands::Outputs(args) => commands::outputs::execute(&global, args).await,
        Commands::Deploy(args) => commands::deploy::execute(&global, args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(core) = cause.downcast_ref::<CoreError>() {
            return match core {
                CoreError::Config(_) | CoreError::UnknownDatabase(_) => ExitCodes::CONFIG_ERROR,
                CoreError::Construct(construct) => construct_exit_code(construct),
                CoreError::DependencyCycle(_)
                | CoreError::UnknownStack(_)
                | CoreError::DuplicateStack(_)
                | CoreError::UndeclaredDependency { .. }
                | CoreError::UnknownImport { .. }
                | CoreError::CrossStageReference { .. }
                | CoreError::DuplicateExport(_)
                | CoreError::DuplicateStage(_) => ExitCodes::GRAPH_ERROR,
                _ => ExitCodes::GENERAL_ERROR,
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ExitCodes::CONFIG_ERROR;
        }
        if let Some(construct) = cause.downcast_ref::<ConstructError>() {
            return construct_exit_code(construct);
        }
    }

    let msg = e.to_string().to_lowercase();
    if msg.contains("argument") || msg.contains("not found") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}

fn construct_exit_code(e: &ConstructError) -> u8 {
    match e {
        ConstructError::MissingWorkload | ConstructError::InvalidImageReference(_) => {
            ExitCodes::INVALID_ARGS
        }
        _ => ExitCodes::CONFIG_ERROR,
    }
}
