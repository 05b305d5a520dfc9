/// RECONCILER
///
/// One engine for every payment flow. Each flow follows the same shape:
/// price on the server, derive or accept an idempotency key, verify the
/// external payment, persist through the unique constraint, then apply
/// side effects exactly once. Side effects run only for the caller that
/// created the row (or won the `pending -> completed` transition), which
/// is what makes retries and duplicate webhooks harmless.

use crate::error::EconomicsError;
use crate::persist::persist_purchase;
use crate::progress::{ProgressAggregator, ProgressOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use superfan_core::{
    canonical_cart, AccessStatus, CampaignAggregate, CampaignId, CampaignStatus, CartItem, ClubId,
    FulfillmentStatus, IdempotencyKey, KeyFields, NewPurchase, PaymentMethod, PurchaseKind,
    PurchaseRecord, UserId,
};
use superfan_payments::{
    CheckoutProvider, CheckoutRequest, CheckoutSession, LineItem, PresaleProvider, Rejection,
    TransferVerifier,
};
use superfan_store::{CreditGrant, PointsAward, QualificationQuery, QualificationResult, Store};
use tracing::{info, warn};

pub type Result<T> = std::result::Result<T, EconomicsError>;

const MAX_CART_LINES: usize = 50;
const MAX_LINE_QUANTITY: u32 = 100;
const MAX_CREDITS_PER_PURCHASE: u32 = 100_000;

pub(crate) const META_KIND: &str = "purchase_kind";
pub(crate) const META_POINTS_SHORTFALL: &str = "points_shortfall";
pub(crate) const META_TARGET_TIER: &str = "target_tier";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    pub points_per_dollar: i64,
    pub credit_price_cents: u64,
    pub qualification_window_days: u32,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        RewardsConfig {
            points_per_dollar: 10,
            credit_price_cents: 100,
            qualification_window_days: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    pub rewards: RewardsConfig,
    /// Dollar tolerance when matching Metal's float amounts
    pub metal_amount_tolerance: f64,
    /// Decimals of the stablecoin presale prices are quoted in
    pub presale_token_decimals: u8,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            rewards: RewardsConfig::default(),
            metal_amount_tolerance: 1e-6,
            presale_token_decimals: 6,
        }
    }
}

// --- requests ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPurchase {
    pub club_id: ClubId,
    pub credits: u32,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCheckout {
    pub club_id: ClubId,
    pub campaign_id: CampaignId,
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUpgrade {
    pub club_id: ClubId,
    pub target_tier: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

// --- results ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutStarted {
    pub purchase_id: String,
    pub session_id: String,
    pub checkout_url: Option<String>,
    pub amount_cents: u64,
    pub idempotency_key: String,
    /// An identical checkout already existed and was returned as-is
    pub idempotent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TierUpgradeOutcome {
    AlreadyQualified { qualification: QualificationResult },
    Checkout {
        checkout: CheckoutStarted,
        points_shortfall: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOutcome {
    pub purchase: PurchaseRecord,
    /// Nothing was applied by this call; the purchase was already settled
    pub idempotent: bool,
    pub funded_now: bool,
    pub points_awarded: i64,
}

/// Priced cart, computed from stored tiers only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub items: Vec<CartItem>,
    pub line_items: Vec<LineItem>,
    pub original_cents: u64,
    pub discounted_cents: u64,
    pub units: u32,
}

/// What applying a purchase's side effects achieved
#[derive(Debug, Clone, Default)]
pub(crate) struct Fulfilment {
    /// The effect the purchase exists for landed (credits, progress, upgrade)
    pub essential_ok: bool,
    pub progress: Option<ProgressOutcome>,
    pub points_awarded: i64,
}

pub struct Reconciler {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) checkout: Arc<dyn CheckoutProvider>,
    pub(crate) transfers: Arc<dyn TransferVerifier>,
    pub(crate) presales: Arc<dyn PresaleProvider>,
    pub(crate) progress: ProgressAggregator,
    pub(crate) config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        checkout: Arc<dyn CheckoutProvider>,
        transfers: Arc<dyn TransferVerifier>,
        presales: Arc<dyn PresaleProvider>,
        config: ReconcilerConfig,
    ) -> Self {
        let progress = ProgressAggregator::new(store.clone());
        Reconciler {
            store,
            checkout,
            transfers,
            presales,
            progress,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    // --- pricing ---

    pub(crate) async fn active_campaign(&self, id: &CampaignId) -> Result<CampaignAggregate> {
        let campaign = self
            .store
            .get_campaign(id)
            .await?
            .ok_or_else(|| EconomicsError::NotFound(format!("campaign {}", id)))?;
        if campaign.status != CampaignStatus::Active {
            return Err(EconomicsError::Conflict(format!(
                "campaign {} is {}",
                id,
                campaign.status.name()
            )));
        }
        Ok(campaign)
    }

    /// Price a cart against the campaign's stored tiers. Client prices are
    /// never consulted.
    pub async fn price_cart(&self, club: &ClubId, campaign: &CampaignId, items: &[CartItem]) -> Result<PricedCart> {
        if items.is_empty() {
            return Err(EconomicsError::validation("items", "cart is empty"));
        }
        if items.len() > MAX_CART_LINES {
            return Err(EconomicsError::validation(
                "items",
                format!("at most {} lines per cart", MAX_CART_LINES),
            ));
        }

        let aggregate = self.active_campaign(campaign).await?;
        if &aggregate.club_id != club {
            return Err(EconomicsError::validation("campaign_id", "campaign belongs to another club"));
        }
        let tiers = self.store.get_campaign_tiers(campaign).await?;

        let items = canonical_cart(items);
        let mut line_items = Vec::with_capacity(items.len());
        let mut original: u64 = 0;
        let mut discounted: u64 = 0;
        let mut units: u32 = 0;
        let overflow = || EconomicsError::validation("items", "cart total overflows");

        for (i, item) in items.iter().enumerate() {
            let field = format!("items[{}]", i);
            if item.quantity == 0 || item.quantity > MAX_LINE_QUANTITY {
                return Err(EconomicsError::validation(
                    format!("{}.quantity", field),
                    format!("must be between 1 and {}", MAX_LINE_QUANTITY),
                ));
            }
            let tier = tiers
                .iter()
                .find(|t| t.id == item.tier_id)
                .ok_or_else(|| EconomicsError::validation(format!("{}.tier_id", field), "unknown tier"))?;
            if let Some(remaining) = tier.remaining {
                if u64::from(item.quantity) > remaining {
                    return Err(EconomicsError::Conflict(format!(
                        "tier {} has {} left",
                        tier.id, remaining
                    )));
                }
            }

            let qty = u64::from(item.quantity);
            let unit_price = tier.effective_price_cents();
            original = tier
                .price_cents
                .checked_mul(qty)
                .and_then(|v| original.checked_add(v))
                .ok_or_else(overflow)?;
            discounted = unit_price
                .checked_mul(qty)
                .and_then(|v| discounted.checked_add(v))
                .ok_or_else(overflow)?;
            units = units.checked_add(item.quantity).ok_or_else(overflow)?;
            line_items.push(LineItem {
                name: tier.name.clone(),
                unit_amount_cents: unit_price,
                quantity: item.quantity,
            });
        }
        if discounted == 0 {
            return Err(EconomicsError::validation("items", "cart total is zero"));
        }

        Ok(PricedCart {
            items,
            line_items,
            original_cents: original,
            discounted_cents: discounted,
            units,
        })
    }

    // --- stripe checkouts ---

    pub async fn purchase_credits(&self, user: &UserId, request: CreditPurchase) -> Result<CheckoutStarted> {
        if request.credits == 0 || request.credits > MAX_CREDITS_PER_PURCHASE {
            return Err(EconomicsError::validation(
                "credits",
                format!("must be between 1 and {}", MAX_CREDITS_PER_PURCHASE),
            ));
        }
        let amount = self
            .config
            .rewards
            .credit_price_cents
            .checked_mul(u64::from(request.credits))
            .ok_or_else(|| EconomicsError::validation("credits", "amount overflows"))?;

        let fields = KeyFields::new()
            .user(user)
            .club(&request.club_id)
            .field("credits", request.credits);
        let key = IdempotencyKey::resolve(request.idempotency_key.as_deref(), "credit_purchase", &fields)?;

        let draft = CheckoutDraft {
            club_id: request.club_id,
            campaign_id: None,
            kind: PurchaseKind::Credits,
            line_items: vec![LineItem {
                name: format!("{} credits", request.credits),
                unit_amount_cents: self.config.rewards.credit_price_cents,
                quantity: request.credits,
            }],
            original_cents: amount,
            discounted_cents: amount,
            units: request.credits,
            items: vec![],
            metadata: BTreeMap::new(),
        };
        self.start_checkout(user, key, draft).await
    }

    pub async fn cart_checkout(&self, user: &UserId, request: CartCheckout) -> Result<CheckoutStarted> {
        let priced = self
            .price_cart(&request.club_id, &request.campaign_id, &request.items)
            .await?;

        let fields = cart_key_fields(user, &request.club_id, &request.campaign_id, &priced.items);
        let key = IdempotencyKey::resolve(request.idempotency_key.as_deref(), CART_CHECKOUT_SCOPE, &fields)?;

        let draft = CheckoutDraft {
            club_id: request.club_id,
            campaign_id: Some(request.campaign_id),
            kind: PurchaseKind::CampaignItems,
            line_items: priced.line_items,
            original_cents: priced.original_cents,
            discounted_cents: priced.discounted_cents,
            units: priced.units,
            items: priced.items,
            metadata: BTreeMap::new(),
        };
        self.start_checkout(user, key, draft).await
    }

    pub async fn start_tier_upgrade(&self, user: &UserId, request: TierUpgrade) -> Result<TierUpgradeOutcome> {
        let tier = self
            .store
            .get_membership_tier(&request.club_id, &request.target_tier)
            .await?
            .ok_or_else(|| EconomicsError::NotFound(format!("tier {}", request.target_tier)))?;

        let qualification = self
            .store
            .check_tier_qualification(&QualificationQuery {
                user_id: user.clone(),
                club_id: request.club_id.clone(),
                target_tier: request.target_tier.clone(),
                rolling_window_days: self.config.rewards.qualification_window_days,
            })
            .await?;
        if qualification.qualifies {
            return Ok(TierUpgradeOutcome::AlreadyQualified { qualification });
        }
        if tier.upgrade_price_cents == 0 {
            return Err(EconomicsError::Conflict(format!(
                "tier {} cannot be purchased",
                request.target_tier
            )));
        }

        let shortfall = qualification.points_shortfall();
        let fields = KeyFields::new()
            .user(user)
            .club(&request.club_id)
            .field("tier", request.target_tier.as_str());
        let key = IdempotencyKey::resolve(request.idempotency_key.as_deref(), "tier_upgrade", &fields)?;

        let mut metadata = BTreeMap::new();
        metadata.insert(META_TARGET_TIER.to_string(), request.target_tier.clone());
        metadata.insert(META_POINTS_SHORTFALL.to_string(), shortfall.to_string());
        let draft = CheckoutDraft {
            club_id: request.club_id,
            campaign_id: None,
            kind: PurchaseKind::TierUpgrade,
            line_items: vec![LineItem {
                name: format!("{} membership", tier.tier),
                unit_amount_cents: tier.upgrade_price_cents,
                quantity: 1,
            }],
            original_cents: tier.upgrade_price_cents,
            discounted_cents: tier.upgrade_price_cents,
            units: 1,
            items: vec![],
            metadata,
        };
        let checkout = self.start_checkout(user, key, draft).await?;
        Ok(TierUpgradeOutcome::Checkout {
            checkout,
            points_shortfall: shortfall,
        })
    }

    async fn start_checkout(&self, user: &UserId, key: IdempotencyKey, draft: CheckoutDraft) -> Result<CheckoutStarted> {
        let mut metadata = draft.metadata.clone();
        metadata.insert(META_KIND.to_string(), draft.kind.name().to_string());
        metadata.insert("club_id".to_string(), draft.club_id.to_string());
        metadata.insert("idempotency_key".to_string(), key.to_string());
        if let Some(campaign) = &draft.campaign_id {
            metadata.insert("campaign_id".to_string(), campaign.to_string());
        }

        let request = CheckoutRequest {
            line_items: draft.line_items,
            client_reference_id: user.to_string(),
            metadata: metadata.clone(),
        };
        let session = self.checkout.create_checkout_session(&request, &key).await?;

        let purchase = NewPurchase {
            external_id: session.id.clone(),
            user_id: user.clone(),
            club_id: draft.club_id,
            campaign_id: draft.campaign_id,
            kind: draft.kind,
            payment_method: PaymentMethod::Stripe,
            amount_paid_cents: draft.discounted_cents,
            original_price_cents: draft.original_cents,
            discounted_price_cents: draft.discounted_cents,
            units: draft.units,
            items: draft.items,
            idempotency_key: Some(key.to_string()),
            fulfillment_status: FulfillmentStatus::Pending,
            metadata: json!(metadata),
        };
        let persisted = persist_purchase(self.store.as_ref(), purchase).await?;
        if persisted.idempotent {
            info!(session_id = %session.id, idempotency_key = %key, "checkout replayed");
        }

        Ok(CheckoutStarted {
            purchase_id: persisted.record.id,
            session_id: session.id,
            checkout_url: session.url,
            amount_cents: persisted.record.amount_paid_cents,
            idempotency_key: key.into_string(),
            idempotent: persisted.idempotent,
        })
    }

    /// Settle a checkout session reported by the webhook or by the client.
    /// The session object is the only source of truth for the payment.
    pub async fn complete_stripe_session(&self, session: &CheckoutSession) -> Result<PurchaseOutcome> {
        let record = self
            .store
            .find_purchase_by_external_id(&session.id)
            .await?
            .ok_or_else(|| EconomicsError::NotFound(format!("checkout session {}", session.id)))?;

        if !session.is_paid() {
            return Err(Rejection::NotPaid(session.payment_status.clone()).into());
        }
        let paid = session.amount_total.unwrap_or(-1);
        if paid != record.amount_paid_cents as i64 {
            return Err(Rejection::AmountMismatch {
                expected: record.amount_paid_cents.to_string(),
                actual: paid.to_string(),
            }
            .into());
        }

        let claimed = self
            .store
            .update_fulfillment_status(&record.id, FulfillmentStatus::Pending, FulfillmentStatus::Completed)
            .await?;
        if !claimed {
            let current = self
                .store
                .find_purchase_by_external_id(&session.id)
                .await?
                .unwrap_or(record);
            return Ok(PurchaseOutcome {
                purchase: current,
                idempotent: true,
                funded_now: false,
                points_awarded: 0,
            });
        }

        info!(purchase_id = %record.id, session_id = %session.id, "checkout completed");
        let mut record = record;
        record.fulfillment_status = FulfillmentStatus::Completed;
        Ok(self.fulfil_and_settle(record).await)
    }

    /// Client-initiated confirmation after the Stripe redirect
    pub async fn confirm_stripe_session(&self, user: &UserId, session_id: &str) -> Result<PurchaseOutcome> {
        if session_id.trim().is_empty() {
            return Err(EconomicsError::validation("session_id", "required"));
        }
        let record = self.store.find_purchase_by_external_id(session_id).await?;
        match record {
            Some(r) if &r.user_id == user => {}
            _ => return Err(EconomicsError::NotFound(format!("checkout session {}", session_id))),
        }
        let session = self.checkout.retrieve_session(session_id).await?;
        self.complete_stripe_session(&session).await
    }

    // --- side effects ---

    pub(crate) async fn fulfil(&self, record: &PurchaseRecord) -> Fulfilment {
        let mut out = Fulfilment {
            essential_ok: true,
            ..Fulfilment::default()
        };

        match record.kind {
            PurchaseKind::Credits => {
                let grant = CreditGrant {
                    user_id: record.user_id.clone(),
                    club_id: record.club_id.clone(),
                    credits: i64::from(record.units),
                    reference_id: record.id.clone(),
                };
                if let Err(err) = self.store.grant_credits(&grant).await {
                    warn!(purchase_id = %record.id, error = %err, "credit grant failed");
                    out.essential_ok = false;
                }
            }
            PurchaseKind::CampaignItems | PurchaseKind::MetalItem => {
                if let Some(campaign) = &record.campaign_id {
                    let outcome = self
                        .progress
                        .apply(campaign, record.amount_paid_cents as i64, i64::from(record.units))
                        .await;
                    if !outcome.incremented {
                        warn!(purchase_id = %record.id, campaign_id = %campaign, "purchase recorded without progress");
                        out.essential_ok = false;
                    }
                    out.progress = Some(outcome);
                }
                if let Err(err) = self.store.set_access_status(&record.id, AccessStatus::Granted).await {
                    warn!(purchase_id = %record.id, error = %err, "access grant failed");
                }
            }
            PurchaseKind::TierUpgrade => {
                let shortfall = metadata_i64(&record.metadata, META_POINTS_SHORTFALL);
                if shortfall > 0 {
                    let award = PointsAward {
                        user_id: record.user_id.clone(),
                        club_id: record.club_id.clone(),
                        points: shortfall,
                        source: "tier_upgrade".to_string(),
                        reference_id: record.id.clone(),
                    };
                    match self.store.award_points(&award).await {
                        Ok(balance) => out.points_awarded += balance.awarded,
                        Err(err) => {
                            warn!(purchase_id = %record.id, error = %err, "tier upgrade points failed");
                            out.essential_ok = false;
                        }
                    }
                }
            }
        }

        let spend_points = self.spend_points(record.amount_paid_cents);
        if spend_points > 0 {
            let award = PointsAward {
                user_id: record.user_id.clone(),
                club_id: record.club_id.clone(),
                points: spend_points,
                source: "purchase".to_string(),
                reference_id: record.id.clone(),
            };
            match self.store.award_points(&award).await {
                Ok(balance) => out.points_awarded += balance.awarded,
                Err(err) => warn!(purchase_id = %record.id, error = %err, "purchase points failed"),
            }
        }
        out
    }

    /// Apply side effects to a freshly completed record and downgrade it to
    /// `partial` if the essential one did not land
    pub(crate) async fn fulfil_and_settle(&self, mut record: PurchaseRecord) -> PurchaseOutcome {
        let fulfilment = self.fulfil(&record).await;
        if !fulfilment.essential_ok {
            match self
                .store
                .update_fulfillment_status(&record.id, FulfillmentStatus::Completed, FulfillmentStatus::Partial)
                .await
            {
                Ok(_) => record.fulfillment_status = FulfillmentStatus::Partial,
                Err(err) => {
                    tracing::error!(purchase_id = %record.id, error = %err, "could not mark purchase partial")
                }
            }
        }
        PurchaseOutcome {
            funded_now: fulfilment.progress.map(|p| p.funded_now).unwrap_or(false),
            points_awarded: fulfilment.points_awarded,
            purchase: record,
            idempotent: false,
        }
    }

    pub(crate) fn spend_points(&self, amount_cents: u64) -> i64 {
        let cents = i64::try_from(amount_cents).unwrap_or(i64::MAX);
        cents.saturating_mul(self.config.rewards.points_per_dollar) / 100
    }

    // --- reads ---

    pub async fn tier_qualification(
        &self,
        user: &UserId,
        club: &ClubId,
        target_tier: &str,
        window_days: Option<u32>,
    ) -> Result<QualificationResult> {
        let window = window_days.unwrap_or(self.config.rewards.qualification_window_days);
        if window == 0 || window > 365 {
            return Err(EconomicsError::validation("window_days", "must be between 1 and 365"));
        }
        if target_tier.trim().is_empty() {
            return Err(EconomicsError::validation("target_tier", "required"));
        }
        Ok(self
            .store
            .check_tier_qualification(&QualificationQuery {
                user_id: user.clone(),
                club_id: club.clone(),
                target_tier: target_tier.to_string(),
                rolling_window_days: window,
            })
            .await?)
    }
}

pub const CART_CHECKOUT_SCOPE: &str = "cart_checkout";

/// Fields a cart's idempotency key is derived from; item order is irrelevant
pub fn cart_key_fields(user: &UserId, club: &ClubId, campaign: &CampaignId, items: &[CartItem]) -> KeyFields {
    KeyFields::new()
        .user(user)
        .club(club)
        .field("campaign", campaign.as_str())
        .items(items)
}

struct CheckoutDraft {
    club_id: ClubId,
    campaign_id: Option<CampaignId>,
    kind: PurchaseKind,
    line_items: Vec<LineItem>,
    original_cents: u64,
    discounted_cents: u64,
    units: u32,
    items: Vec<CartItem>,
    metadata: BTreeMap<String, String>,
}

/// Metadata values arrive as strings from Stripe and as numbers from us
fn metadata_i64(metadata: &Value, key: &str) -> i64 {
    match &metadata[key] {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_numbers_parse_from_either_form() {
        let meta = json!({ "points_shortfall": "40", "other": 7 });
        assert_eq!(metadata_i64(&meta, "points_shortfall"), 40);
        assert_eq!(metadata_i64(&meta, "other"), 7);
        assert_eq!(metadata_i64(&meta, "missing"), 0);
        assert_eq!(metadata_i64(&Value::Null, "points_shortfall"), 0);
    }
}
