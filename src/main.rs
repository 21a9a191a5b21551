//! # opkit - scenario runner
//!
//! Entry point for the `opkit` binary.
//!
//! ## Commands
//!
//! 1. **run** - Load settings, register the sample controller against an
//!    in-memory cluster and drive a page through create, update and delete
//! 2. **check-config** - Parse a settings file and list the controllers it
//!    configures
//!
//! ## Error Handling
//!
//! Failures surface as `anyhow` errors with context and a non-zero exit code.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use opkit::cli::{Cli, Commands};
use opkit::sample::run_scenario;
use opkit_operator::OperatorConfig;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Commands::Run {
            config,
            namespace,
            json,
        } => run(config.as_deref(), &namespace, json).await,
        Commands::CheckConfig { path } => check_config(&path),
    }
}

/// Initialize tracing subscriber with environment filter.
///
/// An explicit `--log-level` wins over `RUST_LOG`; the fallback is `info`.
fn init_tracing(level: Option<&str>) {
    let filter = level
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>) -> Result<OperatorConfig> {
    path.map_or_else(
        || Ok(OperatorConfig::default()),
        |path| {
            OperatorConfig::from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))
        },
    )
}

async fn run(config: Option<&Path>, namespace: &str, json: bool) -> Result<()> {
    let start_time = Instant::now();
    let config = load_config(config)?;
    info!(namespace, controllers = config.controllers.len(), "opkit starting");

    let records = run_scenario(config, namespace)
        .await
        .context("Scenario failed")?;

    for record in &records {
        if json {
            let line = serde_json::to_string(record).context("Failed to encode dispatch record")?;
            println!("{line}");
        } else {
            println!("{:<12} {:<14} {:?}", record.key, format!("{:?}", record.trigger), record.outcome);
        }
    }

    info!(
        dispatches = records.len(),
        "Scenario finished in {:?}",
        start_time.elapsed()
    );
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    if config.controllers.is_empty() {
        println!("{}: no controllers configured", path.display());
        return Ok(());
    }
    for (name, props) in &config.controllers {
        let summary = serde_json::to_string(props).context("Failed to encode controller settings")?;
        println!("{name}: {summary}");
    }
    Ok(())
}
