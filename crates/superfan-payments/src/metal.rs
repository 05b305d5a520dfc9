/// METAL PRESALES
///
/// Metal runs token presales for campaigns and keeps a transaction history
/// per holder. A Metal item purchase is verified by finding the buyer's
/// transaction in that history. Metal reports amounts as dollar floats.

use crate::error::{PaymentError, Rejection, VerificationError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const STATUS_COMPLETED: &str = "completed";
const STATUS_PENDING: &str = "pending";

/// Presale prices are kept in USDC minor units; Metal wants dollars
const USDC_MINOR_PER_DOLLAR: f64 = 1_000_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalConfig {
    pub api_base: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub amount_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderTransaction {
    pub transaction_hash: String,
    pub amount: f64,
    pub status: String,
    #[serde(default)]
    pub token_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HolderHistory {
    Wrapped { transactions: Vec<HolderTransaction> },
    Bare(Vec<HolderTransaction>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresaleSpec {
    pub name: String,
    pub token_address: String,
    /// USDC minor units per whole token
    pub price_per_token: u64,
    #[serde(default)]
    pub total_supply: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presale {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait PresaleProvider: Send + Sync {
    async fn holder_transactions(&self, holder: &str) -> Result<Vec<HolderTransaction>, PaymentError>;

    async fn find_holder_transaction(&self, holder: &str, tx_hash: &str) -> Result<Option<HolderTransaction>, PaymentError> {
        let history = self.holder_transactions(holder).await?;
        Ok(history
            .into_iter()
            .find(|tx| tx.transaction_hash.eq_ignore_ascii_case(tx_hash)))
    }

    async fn create_presale(&self, spec: &PresaleSpec) -> Result<Presale, PaymentError>;

    async fn resolve_presale(&self, presale_id: &str) -> Result<(), PaymentError>;
}

/// Accept a holder transaction only if it completed, in `expected_token`
/// when one is given, for the expected amount
pub fn verify_holder_transaction(
    tx: Option<&HolderTransaction>,
    expected_token: Option<&str>,
    expected_amount: f64,
    tolerance: f64,
) -> Result<(), VerificationError> {
    let tx = tx.ok_or_else(|| VerificationError::Pending("transaction not in holder history yet".into()))?;
    match tx.status.as_str() {
        STATUS_COMPLETED => {}
        STATUS_PENDING => {
            return Err(VerificationError::Pending(format!(
                "transaction {} still pending",
                tx.transaction_hash
            )))
        }
        other => return Err(Rejection::UnexpectedStatus(other.to_string()).into()),
    }
    if let Some(expected) = expected_token {
        let actual = tx.token_address.as_deref().unwrap_or_default();
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(Rejection::WrongTokenContract {
                expected: expected.to_ascii_lowercase(),
                actual: actual.to_ascii_lowercase(),
            }
            .into());
        }
    }
    if !tx.amount.is_finite() || (tx.amount - expected_amount).abs() > tolerance {
        return Err(Rejection::AmountMismatch {
            expected: expected_amount.to_string(),
            actual: tx.amount.to_string(),
        }
        .into());
    }
    Ok(())
}

pub struct MetalClient {
    client: Client,
    base: String,
    api_key: String,
}

impl MetalClient {
    pub fn new(config: &MetalConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(MetalClient {
            client,
            base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// `{base}/holder/{holder}/transactions` with `holder` escaped as one segment
    fn holder_url(&self, holder: &str) -> Result<Url, PaymentError> {
        let mut url = Url::parse(&self.base)
            .map_err(|e| PaymentError::InvalidRequest(format!("metal api_base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| PaymentError::InvalidRequest("metal api_base cannot hold a path".into()))?
            .pop_if_empty()
            .extend(["holder", holder, "transactions"]);
        Ok(url)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("x-api-key", &self.api_key)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, PaymentError> {
        let response = self.authed(builder).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(PaymentError::Provider {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl PresaleProvider for MetalClient {
    async fn holder_transactions(&self, holder: &str) -> Result<Vec<HolderTransaction>, PaymentError> {
        debug!(holder, "fetching holder history");
        let response = self
            .send(self.client.get(self.holder_url(holder)?))
            .await?;
        let history: HolderHistory = response.json().await?;
        Ok(match history {
            HolderHistory::Wrapped { transactions } => transactions,
            HolderHistory::Bare(transactions) => transactions,
        })
    }

    async fn create_presale(&self, spec: &PresaleSpec) -> Result<Presale, PaymentError> {
        let body = json!({
            "name": spec.name,
            "tokenAddress": spec.token_address,
            "price": spec.price_per_token as f64 / USDC_MINOR_PER_DOLLAR,
            "supply": spec.total_supply,
        });
        let response = self
            .send(self.client.post(format!("{}/presales", self.base)).json(&body))
            .await?;
        let presale: Presale = response.json().await?;
        info!(presale_id = %presale.id, token = %spec.token_address, "presale created");
        Ok(presale)
    }

    async fn resolve_presale(&self, presale_id: &str) -> Result<(), PaymentError> {
        self.send(
            self.client
                .post(format!("{}/presales/{}/resolve", self.base, presale_id)),
        )
        .await?;
        info!(presale_id, "presale resolved");
        Ok(())
    }
}
