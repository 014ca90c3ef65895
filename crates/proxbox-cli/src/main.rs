//! Proxbox CLI
//!
//! Runs broker operations against the configured key and rule files and
//! prints the result as JSON. Failures print an error body and exit
//! non-zero.

use clap::{Parser, Subcommand};
use proxbox_core::{ErrorBody, ProxboxError};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(name = "proxbox")]
#[command(about = "Proxbox - cluster registration broker for an SSH tunnel gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = "proxbox.toml")]
    config: PathBuf,

    /// Use the default route's gateway as the backend host
    #[arg(long, global = true)]
    detect_gateway: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a public key and print the new lease
    Register {
        /// Public key file, or `-` for stdin
        #[arg(short, long)]
        pubkey: PathBuf,
    },

    /// Verify a signed identity and print its lease
    Authenticate {
        /// Identity assigned at registration
        identity: String,

        /// File holding the raw signature bytes
        #[arg(short, long)]
        signature: PathBuf,
    },

    /// List every complete lease
    Leases,

    /// Report key entries and leases missing their counterpart
    Audit,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    match commands::run(&cli).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => match err.downcast_ref::<ProxboxError>() {
            Some(broker_err) => {
                let body = serde_json::to_string(&ErrorBody::from(broker_err))
                    .unwrap_or_else(|_| broker_err.to_string());
                println!("{body}");
                tracing::debug!(status = broker_err.status_code(), "Command failed");
                ExitCode::from(if broker_err.is_client_error() { 2 } else { 1 })
            }
            None => {
                eprintln!("Error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}
