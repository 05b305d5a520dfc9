//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `SUPERFAN__SECTION__KEY` environment variables.

use config::{Config, ConfigError, Environment as EnvSource, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use superfan_auth::Environment;
use superfan_economics::{ReconcilerConfig, RewardsConfig};
use superfan_payments::{MetalConfig, StripeConfig, UsdcConfig};
use superfan_store::RestStoreConfig;

pub const DEFAULT_CONFIG_FILE: &str = "superfan.toml";
pub const ENV_PREFIX: &str = "SUPERFAN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Development convenience; has no effect in production
    pub skip_admin_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: RestStoreConfig,
    pub stripe: StripeConfig,
    pub usdc: UsdcConfig,
    pub metal: MetalConfig,
    pub auth: AuthConfig,
    pub rewards: RewardsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            environment: Environment::Development,
            server: ServerConfig {
                bind: "127.0.0.1:8080".to_string(),
            },
            database: RestStoreConfig {
                rest_url: "http://127.0.0.1:54321/rest/v1".to_string(),
                service_key: String::new(),
                timeout_secs: 10,
            },
            stripe: StripeConfig {
                secret_key: String::new(),
                webhook_secret: String::new(),
                api_base: "https://api.stripe.com/v1".to_string(),
                success_url: "http://localhost:3000/checkout/success?session_id={CHECKOUT_SESSION_ID}".to_string(),
                cancel_url: "http://localhost:3000/checkout/cancel".to_string(),
                currency: "usd".to_string(),
                webhook_tolerance_secs: 300,
                timeout_secs: 20,
            },
            usdc: UsdcConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                token_contract: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".to_string(),
                receiving_wallet: "0x0000000000000000000000000000000000000000".to_string(),
                decimals: 6,
                rpc_timeout_secs: 10,
            },
            metal: MetalConfig {
                api_base: "https://api.metal.build".to_string(),
                api_key: String::new(),
                timeout_secs: 15,
                amount_tolerance: 1e-6,
            },
            auth: AuthConfig {
                jwt_secret: String::new(),
                skip_admin_check: false,
            },
            rewards: RewardsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration. An explicit `path` must exist; the default file
    /// is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(
                EnvSource::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            rewards: self.rewards.clone(),
            metal_amount_tolerance: self.metal.amount_tolerance,
            presale_token_decimals: self.usdc.decimals,
        }
    }

    /// Problems that would make the server misbehave. Empty means usable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut require = |value: &str, key: &str| {
            if value.trim().is_empty() {
                problems.push(format!("{} is not set", key));
            }
        };
        require(&self.auth.jwt_secret, "auth.jwt_secret");
        require(&self.stripe.secret_key, "stripe.secret_key");
        require(&self.stripe.webhook_secret, "stripe.webhook_secret");
        require(&self.database.service_key, "database.service_key");
        require(&self.metal.api_key, "metal.api_key");

        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            problems.push(format!("server.bind {:?} is not a socket address", self.server.bind));
        }
        if self.usdc.decimals < 2 {
            problems.push("usdc.decimals must be at least 2".to_string());
        }
        if self.stripe.webhook_tolerance_secs <= 0 {
            problems.push("stripe.webhook_tolerance_secs must be positive".to_string());
        }
        if self.rewards.credit_price_cents == 0 {
            problems.push("rewards.credit_price_cents must be positive".to_string());
        }
        if self.environment.is_production() && self.auth.skip_admin_check {
            problems.push("auth.skip_admin_check is ignored in production".to_string());
        }
        problems
    }
}
