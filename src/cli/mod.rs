//! Command-line interface.

pub mod commands;
pub mod context;
pub mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::domain::models::config::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::LoggerImpl;
use crate::services::AbortHandle;
use commands::converge::ConvergeArgs;
use commands::mutate::MutateArgs;
use commands::report::ReportArgs;
use commands::run::RunArgs;
use context::AppContext;

#[derive(Parser, Debug)]
#[command(name = "tdad")]
#[command(about = "Test-driven artifact development: convergence and evaluation engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .tdad/
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Revise the artifact until the visible suite passes or the budget runs out
    Converge(ConvergeArgs),
    /// Measure how well the visible suite detects authored mutants
    Mutate(MutateArgs),
    /// Run every pipeline stage and append a run record
    Run(RunArgs),
    /// Aggregate recorded runs per specification version
    Report(ReportArgs),
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Load configuration, install logging and Ctrl-C handling, then dispatch.
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let _logger = LoggerImpl::init(&config.logging)?;

    let (handle, signal) = AbortHandle::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.abort();
        }
    });

    let ctx = AppContext::new(config, signal);
    match cli.command {
        Commands::Converge(args) => commands::converge::execute(args, &ctx, cli.json).await,
        Commands::Mutate(args) => commands::mutate::execute(args, &ctx, cli.json).await,
        Commands::Run(args) => commands::run::execute(args, &ctx, cli.json).await,
        Commands::Report(args) => commands::report::execute(args, &ctx, cli.json).await,
    }
}

/// Print `err` with its context chain and exit non-zero.
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    if json {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "error": err.to_string(),
            "caused_by": chain,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1);
}
