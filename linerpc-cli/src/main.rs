//! linerpc-cli - Command-line interface for linerpc
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use linerpc_client::{Client, ConnectionConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "linerpc-cli")]
#[command(about = "Command-line interface for the linerpc server")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8080", env = "LINERPC_SERVER")]
    server: SocketAddr,

    /// Give up on a call after this many seconds (default: wait forever)
    #[arg(short, long)]
    timeout: Option<f64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Call a remote function
    Call {
        /// Function name
        func: String,

        /// Positional arguments, each parsed as JSON (bare words become strings)
        args: Vec<String>,

        /// Keyword arguments as a JSON object (or @file.json to read from file)
        #[arg(short, long)]
        kwargs: Option<String>,
    },

    /// Send a raw request line
    Send {
        /// The line to send, normally a JSON object
        line: String,
    },

    /// Send a message to a server running in echo mode
    Echo {
        /// Message to send
        message: String,
    },

    /// Run the scripted concurrency demo against the built-in functions
    Demo,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ConnectionConfig::new(cli.server);
    if let Some(secs) = cli.timeout {
        let timeout = Duration::try_from_secs_f64(secs)
            .map_err(|e| format!("invalid --timeout {}: {}", secs, e))?;
        config = config.with_request_timeout(timeout);
    }
    let client = Client::with_config(config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client).await?;
        }
        Some(cmd) => match commands::execute(&client, cmd).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
