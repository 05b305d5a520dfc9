//! In-process stand-ins for Stripe, the chain and Metal

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use superfan_core::{CampaignAggregate, CampaignStatus, IdempotencyKey, MetalItem, Tier};
use superfan_economics::{Reconciler, ReconcilerConfig};
use superfan_payments::{
    CheckoutProvider, CheckoutRequest, CheckoutSession, HolderTransaction, PaymentError, Presale,
    PresaleProvider, PresaleSpec, Refund, Rejection, TransferVerifier, TxHash, VerificationError,
    VerifiedTransfer,
};
use superfan_store::MemoryStore;

/// Checkout sessions keyed like Stripe: same idempotency key, same session
#[derive(Default)]
pub struct FakeCheckout {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    by_key: Mutex<HashMap<String, String>>,
    refunds: Mutex<HashMap<String, Refund>>,
    pub fail_refunds: Mutex<bool>,
}

impl FakeCheckout {
    pub fn sessions_created(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn refunds_issued(&self) -> usize {
        self.refunds.lock().len()
    }

    /// Customer finishes paying on the hosted page
    pub fn pay(&self, session_id: &str) -> CheckoutSession {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(session_id).expect("unknown session");
        session.payment_status = "paid".to_string();
        session.status = Some("complete".to_string());
        session.clone()
    }
}

#[async_trait]
impl CheckoutProvider for FakeCheckout {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
        key: &IdempotencyKey,
    ) -> Result<CheckoutSession, PaymentError> {
        let mut by_key = self.by_key.lock();
        let mut sessions = self.sessions.lock();
        if let Some(id) = by_key.get(key.as_str()) {
            return Ok(sessions[id].clone());
        }
        let n = sessions.len() + 1;
        let session = CheckoutSession {
            id: format!("cs_test_{}", n),
            url: Some(format!("https://checkout.stripe.test/{}", n)),
            amount_total: Some(request.total_cents() as i64),
            currency: Some("usd".to_string()),
            payment_status: "unpaid".to_string(),
            status: Some("open".to_string()),
            payment_intent: Some(format!("pi_{}", n)),
            client_reference_id: Some(request.client_reference_id.clone()),
            metadata: request.metadata.clone(),
        };
        by_key.insert(key.to_string(), session.id.clone());
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, PaymentError> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or(PaymentError::Provider {
                status: 404,
                message: "No such checkout session".to_string(),
            })
    }

    async fn create_refund(
        &self,
        payment_intent: &str,
        amount_cents: u64,
        key: &IdempotencyKey,
    ) -> Result<Refund, PaymentError> {
        if *self.fail_refunds.lock() {
            return Err(PaymentError::Provider {
                status: 500,
                message: "refund unavailable".to_string(),
            });
        }
        let mut refunds = self.refunds.lock();
        let n = refunds.len() + 1;
        let refund = refunds.entry(key.to_string()).or_insert_with(|| Refund {
            id: format!("re_{}_{}", payment_intent, n),
            status: "succeeded".to_string(),
            amount: Some(amount_cents as i64),
        });
        Ok(refund.clone())
    }
}

/// On-chain transfers: hash -> cents actually sent
#[derive(Default)]
pub struct FakeChain {
    transfers: Mutex<HashMap<String, u64>>,
    pub calls: AtomicUsize,
}

impl FakeChain {
    pub fn mine(&self, hash: &str, cents: u64) {
        self.transfers.lock().insert(hash.to_ascii_lowercase(), cents);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferVerifier for FakeChain {
    async fn verify_transfer(&self, hash: &TxHash, amount_cents: u64) -> Result<VerifiedTransfer, VerificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sent = self
            .transfers
            .lock()
            .get(hash.as_str())
            .copied()
            .ok_or_else(|| VerificationError::Pending(format!("no receipt for {}", hash)))?;
        if sent != amount_cents {
            return Err(Rejection::AmountMismatch {
                expected: (amount_cents as u128 * 10_000).to_string(),
                actual: (sent as u128 * 10_000).to_string(),
            }
            .into());
        }
        Ok(VerifiedTransfer {
            tx_hash: hash.to_string(),
            payer: Some("0x2222222222222222222222222222222222222222".to_string()),
            amount_units: amount_cents as u128 * 10_000,
            block_number: Some("0x10".to_string()),
        })
    }
}

#[derive(Default)]
pub struct FakeMetal {
    history: Mutex<HashMap<String, Vec<HolderTransaction>>>,
    pub created: Mutex<Vec<String>>,
    pub resolved: Mutex<Vec<String>>,
    pub fail_create: Mutex<bool>,
    pub fail_resolve: Mutex<bool>,
}

impl FakeMetal {
    pub fn record(&self, holder: &str, hash: &str, amount: f64, status: &str) {
        self.push(holder, hash, amount, status, None);
    }

    /// A holder transaction paid in `token`
    pub fn record_in(&self, token: &str, holder: &str, hash: &str, amount: f64) {
        self.push(holder, hash, amount, "completed", Some(token.to_string()));
    }

    fn push(&self, holder: &str, hash: &str, amount: f64, status: &str, token: Option<String>) {
        self.history
            .lock()
            .entry(holder.to_string())
            .or_default()
            .push(HolderTransaction {
                transaction_hash: hash.to_string(),
                amount,
                status: status.to_string(),
                token_address: token,
            });
    }
}

#[async_trait]
impl PresaleProvider for FakeMetal {
    async fn holder_transactions(&self, holder: &str) -> Result<Vec<HolderTransaction>, PaymentError> {
        Ok(self.history.lock().get(holder).cloned().unwrap_or_default())
    }

    async fn create_presale(&self, _spec: &PresaleSpec) -> Result<Presale, PaymentError> {
        if *self.fail_create.lock() {
            return Err(PaymentError::Timeout);
        }
        let mut created = self.created.lock();
        let id = format!("presale-{}", created.len() + 1);
        created.push(id.clone());
        Ok(Presale {
            id,
            status: Some("active".to_string()),
        })
    }

    async fn resolve_presale(&self, presale_id: &str) -> Result<(), PaymentError> {
        if *self.fail_resolve.lock() {
            return Err(PaymentError::Network("connection reset".to_string()));
        }
        self.resolved.lock().push(presale_id.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub checkout: Arc<FakeCheckout>,
    pub chain: Arc<FakeChain>,
    pub metal: Arc<FakeMetal>,
    pub reconciler: Arc<Reconciler>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let checkout = Arc::new(FakeCheckout::default());
    let chain = Arc::new(FakeChain::default());
    let metal = Arc::new(FakeMetal::default());
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        checkout.clone(),
        chain.clone(),
        metal.clone(),
        ReconcilerConfig::default(),
    ));
    Harness {
        store,
        checkout,
        chain,
        metal,
        reconciler,
    }
}

pub fn campaign(id: &str, goal_cents: i64) -> CampaignAggregate {
    CampaignAggregate {
        id: id.into(),
        club_id: "club".into(),
        status: CampaignStatus::Active,
        goal_funding_cents: goal_cents,
        current_funding_cents: 0,
        tickets_sold: 0,
        deadline: Some(Utc::now() + Duration::days(30)),
        presale_id: None,
        presale_price_per_token: None,
        presale_token_supply: None,
    }
}

pub fn tier(id: &str, campaign: &str, price_cents: u64) -> Tier {
    Tier {
        id: id.to_string(),
        campaign_id: campaign.into(),
        name: format!("Tier {}", id),
        price_cents,
        discounted_price_cents: None,
        remaining: None,
    }
}

pub fn metal_item(id: &str, campaign: Option<&str>, price_cents: u64) -> MetalItem {
    MetalItem {
        id: id.to_string(),
        club_id: "club".into(),
        campaign_id: campaign.map(Into::into),
        name: format!("Item {}", id),
        price_cents,
        token_address: None,
    }
}

/// Presale token used by the Metal fixtures
pub const PRESALE_TOKEN: &str = "0x9999999999999999999999999999999999999999";

/// Item of a presale campaign, paid in `PRESALE_TOKEN`
pub fn presale_item(id: &str, campaign: &str, price_cents: u64) -> MetalItem {
    MetalItem {
        token_address: Some(PRESALE_TOKEN.to_string()),
        ..metal_item(id, Some(campaign), price_cents)
    }
}

/// A well-formed hash unique per `n`
pub fn tx_hash(n: u64) -> String {
    format!("0x{:064x}", n)
}
