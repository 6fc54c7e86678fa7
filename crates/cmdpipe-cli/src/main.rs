//! cmdpipe
//!
//! Runs one shell command, streams its stdout and stderr to ours and exits
//! with its exit code.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use cmdpipe_cli::{Cli, run};
use cmdpipe_core::config::load_config;
use cmdpipe_core::tracing_init::{default_filter, init_tracing, with_bootstrap_tracing};

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let project_dir = match cli.project_dir {
        Some(ref dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let config = with_bootstrap_tracing(|| load_config(Some(&project_dir)))?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(&default_filter(level), cli.log_json || config.logging.json);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting cmdpipe");
    debug!(project_dir = %project_dir.display(), "Configuration loaded");

    let code = run(&cli, &config, &mut io::stdout().lock(), &mut io::stderr())?;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
