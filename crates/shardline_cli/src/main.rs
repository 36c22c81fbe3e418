//! Shardline CLI
//!
//! Diagnostic tools for the shardline transaction access protocol.
//!
//! # Commands
//!
//! - `negotiate` - Pick the ABI version two peers would agree on
//! - `decode` - Decode a hex-encoded frame
//! - `demo` - Run a commit/read/purge exchange against an in-memory shard

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Shardline protocol diagnostics.
#[derive(Parser)]
#[command(name = "shardline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Negotiate an ABI version between two supported sets
    Negotiate {
        /// Versions supported locally, as comma-separated wire values
        #[arg(short, long, value_delimiter = ',', required = true)]
        local: Vec<u16>,

        /// Versions supported by the peer, as comma-separated wire values
        #[arg(short, long, value_delimiter = ',', required = true)]
        remote: Vec<u16>,
    },

    /// Decode a hex-encoded frame
    Decode {
        /// Frame bytes in hex
        frame: String,

        /// Output format (json, text)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Commit, read and purge through a frontend against an in-memory shard
    Demo {
        /// Hand requests over in process instead of encoding them
        #[arg(short, long)]
        local: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Negotiate { local, remote } => commands::negotiate::run(&local, &remote)?,
        Commands::Decode { frame, format } => commands::decode::run(&frame, &format)?,
        Commands::Demo { local, format } => commands::demo::run(local, &format)?,
        Commands::Version => {
            println!("Shardline CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Native ABI version {}", shardline_access::AbiVersion::current());
        }
    }

    Ok(())
}
