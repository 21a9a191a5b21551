//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// opkit - reconciliation control loop for cluster resource operators
#[derive(Parser, Debug)]
#[command(name = "opkit")]
#[command(version)]
#[command(about = "Run resource controllers against an in-memory cluster")]
#[command(
    long_about = "opkit registers controllers, feeds them resource change notifications and reports every dispatch outcome. The bundled scenario drives a sample WebPage controller through create, update and delete."
)]
pub struct Cli {
    /// Log filter, e.g. `info` or `opkit_reconciler=debug` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sample WebPage scenario
    Run {
        /// Operator settings file (.toml, .yaml or .yml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Namespace the in-memory client is bound to
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Print dispatch records as JSON lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Validate an operator settings file
    CheckConfig {
        /// Settings file (.toml, .yaml or .yml)
        path: PathBuf,
    },
}
