//! Command-line interface definitions for sandbox-portal.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Expose services running inside network-isolated sandboxes.
///
/// sandbox-portal serves the port exposure API and forwards HTTP and
/// WebSocket traffic into sandboxes over reverse tunnels, on path-based
/// routes and on dedicated ports.
#[derive(Parser, Debug, Default)]
#[command(name = "sandbox-portal")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (defaults to `serve`).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to additional config file.
    ///
    /// Merged on top of system and user configs. Unlike those, this file
    /// must exist.
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Address of the API and path-based proxy listener.
    #[arg(long = "listen", value_name = "ADDR", global = true)]
    pub listen: Option<String>,

    /// Public base URL used when building exposure URLs.
    #[arg(long = "base-url", value_name = "URL", global = true)]
    pub base_url: Option<String>,

    /// Subdomain label enabling `p{port}-{session}.{label}.{host}` URLs.
    #[arg(long = "dev-subdomain", value_name = "LABEL", global = true)]
    pub dev_subdomain: Option<String>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for sandbox-portal.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the service until interrupted.
    Serve,

    /// Print the effective merged configuration and exit.
    #[command(name = "check-config")]
    CheckConfig,
}

impl Cli {
    /// The subcommand to run, `serve` when none was given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}
