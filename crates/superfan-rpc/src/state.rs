use crate::config::AppConfig;
use anyhow::{Context, Result};
use std::sync::Arc;
use superfan_auth::{AdminPolicy, Environment, JwtVerifier, TokenVerifier};
use superfan_economics::Reconciler;
use superfan_payments::{EvmTransferVerifier, MetalClient, StripeClient, WebhookVerifier};
use superfan_store::{MemoryStore, RestStore, Store};
use tracing::{info, warn};

/// Everything a request handler may touch
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub store: Arc<dyn Store>,
    pub tokens: Arc<dyn TokenVerifier>,
    pub webhooks: Arc<WebhookVerifier>,
    pub admin: AdminPolicy,
    pub environment: Environment,
}

impl AppState {
    /// Wire the real clients. `memory` swaps the database for an
    /// in-process store.
    pub fn from_config(config: &AppConfig, memory: bool) -> Result<Self> {
        let store: Arc<dyn Store> = if memory {
            warn!("using in-memory store; nothing will be persisted");
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(RestStore::new(&config.database).context("database client")?)
        };
        let checkout = StripeClient::new(config.stripe.clone()).context("stripe client")?;
        let transfers = EvmTransferVerifier::new(&config.usdc).context("usdc verifier")?;
        let presales = MetalClient::new(&config.metal).context("metal client")?;

        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(checkout),
            Arc::new(transfers),
            Arc::new(presales),
            config.reconciler_config(),
        );
        info!(environment = %config.environment, memory, "application state ready");
        Ok(AppState {
            reconciler: Arc::new(reconciler),
            store,
            tokens: Arc::new(JwtVerifier::new(&config.auth.jwt_secret)),
            webhooks: Arc::new(WebhookVerifier::new(
                config.stripe.webhook_secret.clone(),
                config.stripe.webhook_tolerance_secs,
            )),
            admin: AdminPolicy::new(config.environment, config.auth.skip_admin_check),
            environment: config.environment,
        })
    }
}
