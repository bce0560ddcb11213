use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use strato_node::config::Config;
use strato_node::Node;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,engine=debug,automation=debug,oracle=debug,gasbank=debug,\
                                  feed=debug,executor=debug";

#[derive(Debug, Parser)]
#[command(name = "strato", about = "Multi-tenant blockchain service orchestration runtime")]
struct Args {
    /// Path to a TOML configuration file. Defaults boot an ephemeral
    /// in-memory dev node.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let launched = Node::build(config).await?.launch().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!(target: "strato", "Interrupt received; shutting down.");
        }
        _ = launched.stopped() => {
            info!(target: "strato", "A critical task ended; shutting down.");
        }
    }

    launched.stop().await?;
    Ok(())
}

fn init_logging() -> Result<()> {
    // RUST_LOG wins over the built-in default filter.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
