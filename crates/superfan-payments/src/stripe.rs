/// STRIPE CHECKOUT
///
/// Minimal client for the three Stripe calls the flows need: create a
/// checkout session, read one back, refund a payment intent. Every write
/// carries an `Idempotency-Key` so a retried request returns the original
/// object instead of charging twice.

use crate::error::PaymentError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use superfan_core::IdempotencyKey;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub success_url: String,
    pub cancel_url: String,
    pub currency: String,
    pub webhook_tolerance_secs: i64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub unit_amount_cents: u64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub line_items: Vec<LineItem>,
    /// Our user id; comes back on the session and its webhook
    pub client_reference_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutRequest {
    pub fn total_cents(&self) -> u64 {
        self.line_items
            .iter()
            .map(|l| l.unit_amount_cents * l.quantity as u64)
            .sum()
    }
}

/// The fields of a Stripe checkout session the flows rely on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`
    pub payment_status: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub amount: Option<i64>,
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
        key: &IdempotencyKey,
    ) -> Result<CheckoutSession, PaymentError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, PaymentError>;

    async fn create_refund(
        &self,
        payment_intent: &str,
        amount_cents: u64,
        key: &IdempotencyKey,
    ) -> Result<Refund, PaymentError>;
}

pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(StripeClient { client, config })
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Form fields of a one-off payment checkout session
    pub fn session_form(&self, request: &CheckoutRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.config.success_url.clone()),
            ("cancel_url".to_string(), self.config.cancel_url.clone()),
            (
                "client_reference_id".to_string(),
                request.client_reference_id.clone(),
            ),
        ];
        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
            form.push((
                format!("{}[price_data][currency]", prefix),
                self.config.currency.clone(),
            ));
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount_cents.to_string(),
            ));
            form.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
        }
        for (k, v) in &request.metadata {
            form.push((format!("metadata[{}]", k), v.clone()));
        }
        form
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, PaymentError> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| PaymentError::Decode(e.to_string()));
        }
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(body);
        warn!(status = status.as_u16(), %message, "stripe request failed");
        Err(PaymentError::Provider {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CheckoutProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
        key: &IdempotencyKey,
    ) -> Result<CheckoutSession, PaymentError> {
        if request.line_items.is_empty() {
            return Err(PaymentError::InvalidRequest("checkout has no line items".into()));
        }
        debug!(idempotency_key = %key, total = request.total_cents(), "creating checkout session");
        let response = self
            .client
            .post(self.url("checkout/sessions"))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", key.as_str())
            .form(&self.session_form(request))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, PaymentError> {
        let response = self
            .client
            .get(self.url(&format!("checkout/sessions/{}", session_id)))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn create_refund(
        &self,
        payment_intent: &str,
        amount_cents: u64,
        key: &IdempotencyKey,
    ) -> Result<Refund, PaymentError> {
        let response = self
            .client
            .post(self.url("refunds"))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", key.as_str())
            .form(&[
                ("payment_intent", payment_intent.to_string()),
                ("amount", amount_cents.to_string()),
            ])
            .send()
            .await?;
        Self::parse(response).await
    }
}
