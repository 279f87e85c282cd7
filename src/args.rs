use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// modhost - modular application host
#[derive(Parser, Debug)]
#[command(name = "modhost", version)]
#[command(about = "Boot feature modules over a shared service container and serve their routes")]
pub struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand; `serve` when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Boot every module and serve HTTP
    Serve {
        /// Override the configured listen address
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Boot and print the bound routes
    Routes,
    /// Boot and print module status
    Modules,
    /// Boot and print registered services
    Services,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve { bind: None })
    }
}
