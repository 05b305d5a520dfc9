use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use superfan_rpc::{routes, AppConfig, AppState};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "superfan-rpc")]
#[command(about = "Superfan HTTP API server", long_about = None)]
struct Args {
    /// Configuration file (defaults to ./superfan.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep all data in memory instead of the database
    #[arg(long)]
    memory: bool,

    /// Override `server.bind`
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    for problem in config.problems() {
        error!("config: {}", problem);
    }
    let addr = match args.bind {
        Some(addr) => addr,
        None => config
            .server
            .bind
            .parse()
            .with_context(|| format!("server.bind {:?}", config.server.bind))?,
    };

    let state = AppState::from_config(&config, args.memory)?;
    info!(%addr, environment = %config.environment, "Superfan RPC listening");
    warp::serve(routes(state)).run(addr).await;
    Ok(())
}
