use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use superfan_cli::{derive_cart_key, print_json};
use superfan_rpc::{AppConfig, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "superfan-cli")]
#[command(about = "Superfan operator tools", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./superfan.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fail every active campaign past its deadline and issue refunds
    FailExpired {
        /// Evaluate deadlines as of this RFC 3339 instant instead of now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Re-apply side effects of purchases left in `partial`
    ReconcilePartial,

    /// Print the idempotency key a cart checkout would use
    DeriveKey {
        #[arg(long, default_value = "cart_checkout")]
        scope: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        club: String,
        #[arg(long)]
        campaign: String,
        /// Cart items as JSON, e.g. '[{"tier_id":"gold","quantity":2}]'
        #[arg(long)]
        items: String,
    },

    /// Load the configuration and report problems
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::DeriveKey {
            scope,
            user,
            club,
            campaign,
            items,
        } => {
            let key = derive_cart_key(&scope, &user, &club, &campaign, &items)?;
            println!("{}", key);
        }
        Commands::CheckConfig => {
            let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
            let problems = config.problems();
            info!(environment = %config.environment, bind = %config.server.bind, "configuration loaded");
            for problem in &problems {
                warn!("{}", problem);
            }
            if !problems.is_empty() {
                bail!("{} configuration problem(s)", problems.len());
            }
            println!("configuration ok");
        }
        Commands::FailExpired { now } => {
            let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
            let state = AppState::from_config(&config, false)?;
            let now = now.unwrap_or_else(Utc::now);
            info!(%now, "failing expired campaigns");
            let sweep = state.reconciler.fail_expired_campaigns(now).await?;
            print_json(&sweep)?;
            if !sweep.errors.is_empty() {
                bail!("{} campaign(s) could not be processed", sweep.errors.len());
            }
        }
        Commands::ReconcilePartial => {
            let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
            let state = AppState::from_config(&config, false)?;
            let report = state.reconciler.reconcile_partial().await?;
            print_json(&report)?;
        }
    }
    Ok(())
}
