/// ON-CHAIN PURCHASES
///
/// Purchases proven by a transaction hash rather than a checkout session.
/// Both flows verify before writing anything, then persist a completed
/// record keyed by the hash. A hash can be claimed once, and a replay by
/// its owner returns the recorded purchase before anything else is checked.

use crate::error::EconomicsError;
use crate::persist::persist_purchase;
use crate::reconciler::{PurchaseOutcome, Reconciler, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use superfan_core::money::{cents_to_dollars, cents_to_token_units};
use superfan_core::{
    CampaignId, CartItem, ClubId, FulfillmentStatus, IdempotencyKey, KeyFields, NewPurchase,
    PaymentMethod, PurchaseKind, PurchaseRecord, UserId,
};
use superfan_payments::{verify_holder_transaction, TxHash};
use tracing::info;

const MAX_EXTERNAL_HASH_LEN: usize = 128;
const MAX_HOLDER_LEN: usize = 128;

/// Metal holder ids end up in a URL path
fn is_holder_id(holder: &str) -> bool {
    !holder.is_empty()
        && holder.len() <= MAX_HOLDER_LEN
        && holder.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn replayed(purchase: PurchaseRecord) -> PurchaseOutcome {
    PurchaseOutcome {
        purchase,
        idempotent: true,
        funded_now: false,
        points_awarded: 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsdcPurchase {
    pub club_id: ClubId,
    pub campaign_id: CampaignId,
    pub items: Vec<CartItem>,
    pub tx_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetalPurchase {
    pub item_id: String,
    /// Metal holder account the buyer paid from
    pub holder: String,
    pub tx_hash: String,
}

impl Reconciler {
    /// Replay of an already recorded hash, or a conflict if someone else
    /// recorded it
    async fn claimed_by(&self, user: &UserId, external_id: &str) -> Result<Option<PurchaseRecord>> {
        match self.store.find_purchase_by_external_id(external_id).await? {
            Some(record) if &record.user_id == user => Ok(Some(record)),
            Some(_) => Err(EconomicsError::Conflict(format!(
                "transaction {} already claimed",
                external_id
            ))),
            None => Ok(None),
        }
    }

    async fn record_verified(&self, purchase: NewPurchase) -> Result<PurchaseOutcome> {
        let persisted = persist_purchase(self.store.as_ref(), purchase).await?;
        if persisted.idempotent {
            return Ok(replayed(persisted.record));
        }
        Ok(self.fulfil_and_settle(persisted.record).await)
    }

    pub async fn purchase_with_usdc(&self, user: &UserId, request: UsdcPurchase) -> Result<PurchaseOutcome> {
        // Malformed hashes never reach the chain or the database
        let hash = TxHash::parse(&request.tx_hash)?;

        // A replay returns the first result even once the campaign stopped
        // taking purchases, e.g. after this very purchase funded it
        if let Some(existing) = self.claimed_by(user, hash.as_str()).await? {
            return Ok(replayed(existing));
        }

        let priced = self
            .price_cart(&request.club_id, &request.campaign_id, &request.items)
            .await?;

        let transfer = self
            .transfers
            .verify_transfer(&hash, priced.discounted_cents)
            .await?;

        let key = IdempotencyKey::derive(
            "usdc_purchase",
            &KeyFields::new().user(user).field("tx_hash", hash.as_str()),
        )?;
        let purchase = NewPurchase {
            external_id: hash.to_string(),
            user_id: user.clone(),
            club_id: request.club_id,
            campaign_id: Some(request.campaign_id),
            kind: PurchaseKind::CampaignItems,
            payment_method: PaymentMethod::Usdc,
            amount_paid_cents: priced.discounted_cents,
            original_price_cents: priced.original_cents,
            discounted_price_cents: priced.discounted_cents,
            units: priced.units,
            items: priced.items,
            idempotency_key: Some(key.into_string()),
            fulfillment_status: FulfillmentStatus::Completed,
            metadata: json!({
                "payer": transfer.payer,
                "block_number": transfer.block_number,
                "amount_units": transfer.amount_units.to_string(),
            }),
        };
        info!(tx = %hash, user_id = %user, cents = priced.discounted_cents, "usdc purchase verified");
        self.record_verified(purchase).await
    }

    pub async fn purchase_metal_item(&self, user: &UserId, request: MetalPurchase) -> Result<PurchaseOutcome> {
        let tx_hash = request.tx_hash.trim();
        if tx_hash.is_empty() || tx_hash.len() > MAX_EXTERNAL_HASH_LEN {
            return Err(EconomicsError::validation("tx_hash", "malformed transaction hash"));
        }
        let holder = request.holder.trim();
        if !is_holder_id(holder) {
            return Err(EconomicsError::validation("holder", "malformed holder id"));
        }

        if let Some(existing) = self.claimed_by(user, tx_hash).await? {
            return Ok(replayed(existing));
        }

        let item = self
            .store
            .get_metal_item(&request.item_id)
            .await?
            .ok_or_else(|| EconomicsError::NotFound(format!("item {}", request.item_id)))?;
        if item.price_cents == 0 {
            return Err(EconomicsError::Conflict(format!("item {} is not for sale", item.id)));
        }

        // Presale campaigns sell whole tokens; everything else is one ticket
        let mut tickets: u64 = 1;
        if let Some(campaign_id) = &item.campaign_id {
            let campaign = self.active_campaign(campaign_id).await?;
            if let Some(terms) = campaign.presale_terms() {
                if item.token_address.is_none() {
                    return Err(EconomicsError::Conflict(format!(
                        "item {} has no presale token configured",
                        item.id
                    )));
                }
                let units = cents_to_token_units(item.price_cents, self.config.presale_token_decimals)?;
                let units = u64::try_from(units)
                    .map_err(|_| EconomicsError::validation("amount", "price overflows presale units"))?;
                tickets = terms.quote(units)?.tokens;
            }
        }
        let units = u32::try_from(tickets)
            .map_err(|_| EconomicsError::validation("amount", "too many tokens in one purchase"))?;

        let found = self
            .presales
            .find_holder_transaction(holder, tx_hash)
            .await?;
        verify_holder_transaction(
            found.as_ref(),
            item.token_address.as_deref(),
            cents_to_dollars(item.price_cents),
            self.config.metal_amount_tolerance,
        )?;

        let key = IdempotencyKey::derive(
            "metal_purchase",
            &KeyFields::new()
                .user(user)
                .field("item", item.id.as_str())
                .field("tx_hash", tx_hash),
        )?;
        let purchase = NewPurchase {
            external_id: tx_hash.to_string(),
            user_id: user.clone(),
            club_id: item.club_id.clone(),
            campaign_id: item.campaign_id.clone(),
            kind: PurchaseKind::MetalItem,
            payment_method: PaymentMethod::MetalPresale,
            amount_paid_cents: item.price_cents,
            original_price_cents: item.price_cents,
            discounted_price_cents: item.price_cents,
            units,
            items: vec![],
            idempotency_key: Some(key.into_string()),
            fulfillment_status: FulfillmentStatus::Completed,
            metadata: json!({ "item_id": item.id, "holder": holder, "token_address": item.token_address }),
        };
        info!(tx = tx_hash, user_id = %user, item_id = %item.id, "metal purchase verified");
        self.record_verified(purchase).await
    }
}
