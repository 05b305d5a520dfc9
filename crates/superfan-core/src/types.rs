/// DOMAIN RECORDS
///
/// Typed rows for the tables the reconciliation flows touch. Every money
/// amount is an integer count of minor currency units (cents).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }
    };
}

string_id!(UserId);
string_id!(ClubId);
string_id!(CampaignId);

/// Payment rail a purchase settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Stripe,
    Usdc,
    MetalPresale,
}

impl PaymentMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Usdc => "usdc",
            Self::MetalPresale => "metal_presale",
        }
    }

    /// Only card payments can be refunded without a human in the loop.
    pub fn supports_automatic_refund(&self) -> bool {
        matches!(self, Self::Stripe)
    }
}

/// What the purchase bought
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseKind {
    Credits,
    CampaignItems,
    TierUpgrade,
    MetalItem,
}

impl PurchaseKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Credits => "credits",
            Self::CampaignItems => "campaign_items",
            Self::TierUpgrade => "tier_upgrade",
            Self::MetalItem => "metal_item",
        }
    }

    /// Kinds that count toward a campaign's funding goal
    pub fn funds_campaign(&self) -> bool {
        matches!(self, Self::CampaignItems | Self::MetalItem)
    }
}

/// Fulfillment state of a purchase
///
/// `Partial` means the payment is recorded but the campaign progress
/// increment failed and still has to be reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Pending,
    Completed,
    Partial,
}

impl FulfillmentStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Refunded,
    RefundFailed,
    ManualRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Granted,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Funded,
    Failed,
}

impl CampaignStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Funded => "funded",
            Self::Failed => "failed",
        }
    }
}

/// One line of a cart
///
/// Ordering compares every field so two items that differ only in an
/// optional field still sort the same way on every request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartItem {
    pub tier_id: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CartItem {
    pub fn new(tier_id: impl Into<String>, quantity: u32) -> Self {
        CartItem {
            tier_id: tier_id.into(),
            quantity,
            variant: None,
            note: None,
        }
    }
}

impl Ord for CartItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tier_id
            .cmp(&other.tier_id)
            .then(self.quantity.cmp(&other.quantity))
            .then_with(|| self.variant.cmp(&other.variant))
            .then_with(|| self.note.cmp(&other.note))
    }
}

impl PartialOrd for CartItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Reward tier sold by a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub id: String,
    pub campaign_id: CampaignId,
    pub name: String,
    pub price_cents: u64,
    /// Price after club discounts; `None` means no discount applies
    #[serde(default)]
    pub discounted_price_cents: Option<u64>,
    /// Remaining units; `None` is unlimited
    #[serde(default)]
    pub remaining: Option<u64>,
}

impl Tier {
    pub fn effective_price_cents(&self) -> u64 {
        self.discounted_price_cents
            .map(|d| d.min(self.price_cents))
            .unwrap_or(self.price_cents)
    }
}

/// Club membership tier that can be bought outright
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipTier {
    pub club_id: ClubId,
    pub tier: String,
    pub upgrade_price_cents: u64,
    pub points_required: i64,
}

/// Item sold through a Metal token presale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetalItem {
    pub id: String,
    pub club_id: ClubId,
    pub campaign_id: Option<CampaignId>,
    pub name: String,
    pub price_cents: u64,
    /// Token the item is paid in; holder transactions in any other token
    /// do not count
    #[serde(default)]
    pub token_address: Option<String>,
}

/// Rolling funding totals of a campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignAggregate {
    pub id: CampaignId,
    pub club_id: ClubId,
    pub status: CampaignStatus,
    pub goal_funding_cents: i64,
    pub current_funding_cents: i64,
    pub tickets_sold: i64,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub presale_id: Option<String>,
    /// Presale price per campaign token (USDC minor units)
    #[serde(default)]
    pub presale_price_per_token: Option<u64>,
    /// Presale token supply cap. Presale campaigns count tokens as tickets.
    #[serde(default)]
    pub presale_token_supply: Option<u64>,
}

impl CampaignAggregate {
    pub fn has_reached_goal(&self) -> bool {
        self.goal_funding_cents > 0 && self.current_funding_cents >= self.goal_funding_cents
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    /// Presale terms when the campaign sells tokens through a presale
    pub fn presale_terms(&self) -> Option<crate::presale::PresaleTerms> {
        let price = self.presale_price_per_token?;
        crate::presale::PresaleTerms::new(
            price,
            self.presale_token_supply,
            self.tickets_sold.max(0) as u64,
        )
        .ok()
    }

    /// Funding progress in basis points, capped at 10000
    pub fn progress_bps(&self) -> u16 {
        if self.goal_funding_cents <= 0 {
            return 0;
        }
        let current = self.current_funding_cents.max(0) as i128;
        let bps = current * 10_000 / self.goal_funding_cents as i128;
        bps.min(10_000) as u16
    }
}

/// A verified payment about to be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPurchase {
    pub external_id: String,
    pub user_id: UserId,
    pub club_id: ClubId,
    pub campaign_id: Option<CampaignId>,
    pub kind: PurchaseKind,
    pub payment_method: PaymentMethod,
    pub amount_paid_cents: u64,
    pub original_price_cents: u64,
    pub discounted_price_cents: u64,
    pub units: u32,
    #[serde(default)]
    pub items: Vec<CartItem>,
    pub idempotency_key: Option<String>,
    pub fulfillment_status: FulfillmentStatus,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One recorded external payment. Unique per `external_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: String,
    pub external_id: String,
    pub user_id: UserId,
    pub club_id: ClubId,
    pub campaign_id: Option<CampaignId>,
    pub kind: PurchaseKind,
    pub payment_method: PaymentMethod,
    pub amount_paid_cents: u64,
    pub original_price_cents: u64,
    pub discounted_price_cents: u64,
    pub units: u32,
    #[serde(default)]
    pub items: Vec<CartItem>,
    pub idempotency_key: Option<String>,
    pub fulfillment_status: FulfillmentStatus,
    #[serde(default)]
    pub refund_status: Option<RefundStatus>,
    #[serde(default)]
    pub access_status: Option<AccessStatus>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PurchaseRecord {
    /// Materialize a new purchase as a stored row
    pub fn from_new(purchase: NewPurchase, id: String, created_at: DateTime<Utc>) -> Self {
        PurchaseRecord {
            id,
            external_id: purchase.external_id,
            user_id: purchase.user_id,
            club_id: purchase.club_id,
            campaign_id: purchase.campaign_id,
            kind: purchase.kind,
            payment_method: purchase.payment_method,
            amount_paid_cents: purchase.amount_paid_cents,
            original_price_cents: purchase.original_price_cents,
            discounted_price_cents: purchase.discounted_price_cents,
            units: purchase.units,
            items: purchase.items,
            idempotency_key: purchase.idempotency_key,
            fulfillment_status: purchase.fulfillment_status,
            refund_status: None,
            access_status: None,
            metadata: purchase.metadata,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn campaign(goal: i64, current: i64) -> CampaignAggregate {
        CampaignAggregate {
            id: "c1".into(),
            club_id: "club".into(),
            status: CampaignStatus::Active,
            goal_funding_cents: goal,
            current_funding_cents: current,
            tickets_sold: 0,
            deadline: None,
            presale_id: None,
            presale_price_per_token: None,
            presale_token_supply: None,
        }
    }

    #[test]
    fn test_goal_reached_at_exact_threshold() {
        assert!(!campaign(10_000, 9_999).has_reached_goal());
        assert!(campaign(10_000, 10_000).has_reached_goal());
        assert!(campaign(10_000, 12_000).has_reached_goal());
        // A campaign without a goal never crosses it
        assert!(!campaign(0, 500).has_reached_goal());
    }

    #[test]
    fn test_progress_bps_is_capped() {
        assert_eq!(campaign(10_000, 2_500).progress_bps(), 2_500);
        assert_eq!(campaign(10_000, 30_000).progress_bps(), 10_000);
        assert_eq!(campaign(10_000, -5).progress_bps(), 0);
    }

    #[test]
    fn test_deadline() {
        let now = Utc::now();
        let mut c = campaign(1, 0);
        assert!(!c.is_past_deadline(now));
        c.deadline = Some(now - Duration::hours(1));
        assert!(c.is_past_deadline(now));
        c.deadline = Some(now + Duration::hours(1));
        assert!(!c.is_past_deadline(now));
    }

    #[test]
    fn test_cart_item_tie_break_on_optional_fields() {
        let mut a = CartItem::new("vip", 1);
        a.variant = Some("blue".into());
        let mut b = CartItem::new("vip", 1);
        b.variant = Some("red".into());
        let plain = CartItem::new("vip", 1);

        assert!(plain < a, "None sorts before Some");
        assert!(a < b);
    }

    #[test]
    fn test_effective_price_never_exceeds_list_price() {
        let tier = Tier {
            id: "t".into(),
            campaign_id: "c".into(),
            name: "Gold".into(),
            price_cents: 5_000,
            discounted_price_cents: Some(7_000),
            remaining: None,
        };
        assert_eq!(tier.effective_price_cents(), 5_000);
    }

    #[test]
    fn test_payment_method_wire_names() {
        let json = serde_json::to_string(&PaymentMethod::MetalPresale).unwrap();
        assert_eq!(json, "\"metal_presale\"");
        assert!(PaymentMethod::Stripe.supports_automatic_refund());
        assert!(!PaymentMethod::Usdc.supports_automatic_refund());
    }
}
