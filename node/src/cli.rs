//! # CLI Interface
//!
//! Command-line arguments for `certa-node`, using `clap` derive. Three
//! subcommands: `run`, `check-identity` and `version`.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Certa ledger gateway.
///
/// Holds the operator's ledger connection, caches per-user connections,
/// and exposes health and Prometheus metrics over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "certa-node",
    about = "Certa ledger gateway",
    version,
    propagate_version = true
)]
pub struct CertaNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the ledger and serve health and metrics until stopped.
    Run(RunArgs),
    /// Load the operator credentials and check that the key matches the
    /// certificate, without connecting.
    CheckIdentity(CheckIdentityArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (TOML).
    #[arg(long, short = 'c', env = "CERTA_CONFIG", default_value = "certa.toml")]
    pub config: PathBuf,

    /// Address for the health and metrics listener. Overrides `[server].listen`.
    #[arg(long, env = "CERTA_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log format: `pretty` or `json`. Overrides `[logging].format`.
    #[arg(long, env = "CERTA_LOG_FORMAT")]
    pub log_format: Option<String>,
}

/// Arguments for the `check-identity` subcommand.
#[derive(Parser, Debug)]
pub struct CheckIdentityArgs {
    /// Path to the node configuration file (TOML).
    #[arg(long, short = 'c', env = "CERTA_CONFIG", default_value = "certa.toml")]
    pub config: PathBuf,
}
