//! loft CLI
//!
//! Installs loft into a Kubernetes cluster and connects the operator to it.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loft_cli::Cli;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    if let Err(e) = cli.run().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
