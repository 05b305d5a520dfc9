/// SUPERFAN CORE
///
/// Domain vocabulary shared by every Superfan crate:
/// - Purchases, campaigns and tiers as typed records
/// - Exact conversion between cents and on-chain token units
/// - Whole-token presale quotes
/// - Deterministic idempotency keys for payment requests

pub mod types;
pub mod money;
pub mod presale;
pub mod idempotency;

pub use types::{
    AccessStatus, CampaignAggregate, CampaignId, CampaignStatus, CartItem, ClubId,
    FulfillmentStatus, MembershipTier, MetalItem, NewPurchase, PaymentMethod, PurchaseKind,
    PurchaseRecord, RefundStatus, Tier, UserId,
};

pub use money::{cents_to_token_units, token_units_to_cents, MoneyError};

pub use presale::{PresaleError, PresaleQuote, PresaleTerms};

pub use idempotency::{canonical_cart, IdempotencyError, IdempotencyKey, KeyFields};
