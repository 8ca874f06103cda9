//! bftledger command line.
//!
//! # Quick Start
//!
//! ```bash
//! # Write key pairs for every process in membership.toml
//! bftledger keygen
//!
//! # Start the four replicas (one terminal each)
//! bftledger node 1
//!
//! # Move funds from client 5 to client 6
//! bftledger transfer 5 6 500
//! bftledger balance 5
//! ```

mod commands;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Byzantine fault tolerant replicated ledger.
#[derive(Parser)]
#[command(name = "bftledger")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding bftledger.toml and the membership file.
    #[arg(short, long, global = true, default_value = ".")]
    project: String,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate key pairs for every process in the membership.
    Keygen {
        /// Replace key pairs that already exist.
        #[arg(long)]
        force: bool,
    },

    /// Run a replica until Ctrl+C.
    Node {
        /// Node id from the membership file.
        id: u32,
    },

    /// Transfer funds from a client's account.
    Transfer {
        /// Client id issuing the transfer.
        client: u32,

        /// Process id owning the destination account.
        destination: u32,

        /// Amount to move, excluding the fee.
        amount: i64,

        /// Give up after this many seconds.
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },

    /// Read an account balance through consensus.
    Balance {
        /// Client id issuing the query.
        client: u32,

        /// Process id owning the account (defaults to the client's own).
        account: Option<u32>,

        /// Give up after this many seconds.
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },

    /// Show the merged configuration.
    Config {
        /// Output format (text, toml, json).
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    style::set_no_color(cli.no_color);

    match cli.command {
        Commands::Keygen { force } => commands::keygen::run(&cli.project, force),
        Commands::Node { id } => commands::node::run(&cli.project, id),
        Commands::Transfer {
            client,
            destination,
            amount,
            timeout,
        } => commands::client::transfer(&cli.project, client, destination, amount, timeout),
        Commands::Balance {
            client,
            account,
            timeout,
        } => commands::client::balance(&cli.project, client, account, timeout),
        Commands::Config { format } => commands::config::show(&cli.project, &format),
    }
}
