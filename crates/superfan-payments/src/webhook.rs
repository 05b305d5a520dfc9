/// STRIPE WEBHOOK SIGNATURES
///
/// `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]` where each `v1` is
/// HMAC-SHA256 over `"{t}.{payload}"` keyed with the endpoint secret.
/// Several `v1` entries appear while a secret is being rolled; any match
/// accepts. Events older than the tolerance are refused as replays.

use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Future timestamps beyond this are clock skew, not in-flight delivery
const MAX_FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Missing timestamp in signature header")]
    MissingTimestamp,
    #[error("Missing v1 signature in signature header")]
    MissingSignature,
    #[error("Signature does not match payload")]
    SignatureMismatch,
    #[error("Timestamp {timestamp} outside tolerance of {tolerance}s")]
    TimestampOutOfTolerance { timestamp: i64, tolerance: i64 },
    #[error("Webhook secret unusable as HMAC key")]
    InvalidSecret,
    #[error("Malformed event payload: {0}")]
    Payload(String),
}

/// Envelope of a Stripe event; `data.object` stays raw until the type is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub object: Value,
}

impl StripeEvent {
    pub fn is_checkout_completed(&self) -> bool {
        self.event_type == "checkout.session.completed"
            || self.event_type == "checkout.session.async_payment_succeeded"
    }
}

pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        WebhookVerifier {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Hex signature Stripe would send for `payload` at `timestamp`
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> Result<String, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WebhookError::InvalidSecret)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn verify(&self, payload: &[u8], header: &str, now_unix: i64) -> Result<StripeEvent, WebhookError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
                Some(("v1", v)) => signatures.push(v.to_string()),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(WebhookError::MissingTimestamp)?;
        if signatures.is_empty() {
            return Err(WebhookError::MissingSignature);
        }

        let age = now_unix - timestamp;
        if age > self.tolerance_secs || age < -MAX_FUTURE_SKEW_SECS {
            return Err(WebhookError::TimestampOutOfTolerance {
                timestamp,
                tolerance: self.tolerance_secs,
            });
        }

        let expected = self.sign(timestamp, payload)?;
        let matched = signatures
            .iter()
            .any(|sig| constant_time_eq(sig.as_bytes(), expected.as_bytes()));
        if !matched {
            return Err(WebhookError::SignatureMismatch);
        }

        serde_json::from_slice(payload).map_err(|e| WebhookError::Payload(e.to_string()))
    }
}
