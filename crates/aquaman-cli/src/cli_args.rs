use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "aquaman", about = "Credential-injecting reverse proxy with a hash-chained audit log", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the proxy listener using the given TOML config file.
    Serve {
        #[arg(long, env = "AQUAMAN_CONFIG")]
        config: PathBuf,
    },
    /// Walk an audit log directory and report whether the hash chain holds.
    Verify {
        #[arg(long)]
        log_dir: PathBuf,
    },
}
