//! The `leaf` command: a thin layer wiring arguments to the engine,
//! workspace, and releng operations.
//!
//! Exit codes: 0 on success, 2 for expected failures (bad input,
//! resolution failures, cancellation), 1 for internal errors.

mod commands;

use clap::{Parser, Subcommand};
use leaf_core::constants::envvars;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "leaf", version, about = "Leaf package manager")]
struct Cli {
    /// Show step output and debug details.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Use the given workspace instead of searching from the current
    /// directory.
    #[arg(long, short, global = true, env = envvars::WORKSPACE)]
    workspace: Option<PathBuf>,

    /// Never prompt.
    #[arg(long, global = true, env = envvars::NON_INTERACTIVE)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show or update the user configuration.
    Config {
        /// Point the package store at this folder.
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Manage remote repositories.
    Remote {
        #[command(subcommand)]
        command: commands::RemoteCommand,
    },
    /// Refresh all remote indexes now.
    Refresh,
    /// Search the catalogue.
    Search {
        /// Substring matched against names, descriptions, and tags.
        query: Option<String>,
    },
    /// Install packages into the store.
    Install {
        /// Package identifiers (unversioned names resolve to latest).
        packages: Vec<String>,
        /// Keep a failed package folder for inspection.
        #[arg(long)]
        keep_on_error: bool,
    },
    /// Uninstall packages no longer needed.
    Uninstall {
        /// Package identifiers.
        packages: Vec<String>,
    },
    /// Re-run the sync steps of installed packages.
    Sync {
        /// Package identifiers.
        packages: Vec<String>,
    },
    /// Print environment variables.
    Env {
        #[command(flatten)]
        args: commands::EnvArgs,
    },
    /// Inspect and toggle features.
    Feature {
        #[command(subcommand)]
        command: commands::FeatureCommand,
    },
    /// Initialize a workspace in the current directory.
    Init,
    /// Manage workspace profiles.
    Profile {
        #[command(subcommand)]
        command: commands::ProfileCommand,
    },
    /// Build packages and repository indexes.
    Releng {
        #[command(subcommand)]
        command: commands::RelengCommand,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing the current operation");
            signal_token.cancel();
        }
    });

    match commands::run(cli, token).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.display_with_hints());
            if err.is_expected() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if std::env::var(envvars::DEBUG).is_ok() || verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
