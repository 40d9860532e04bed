//! loft installer library

pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod poll;
pub mod probe;
pub mod prompt;
pub mod validate;
pub mod version;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

use crate::version::BuildInfo;

/// loft - install and connect to loft on any Kubernetes cluster
#[derive(Parser, Debug)]
#[command(name = "loft")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install loft, or connect to an existing installation
    Start(commands::start::StartArgs),
    /// Wake up a sleeping space
    Wakeup(commands::wakeup::WakeupArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Start(args) => commands::start::run(args, &BuildInfo::current()).await,
            Commands::Wakeup(args) => commands::wakeup::run(args).await,
        }
    }
}
