/// SUPERFAN RECONCILIATION ENGINE
///
/// Turns verified external payments into exactly-once effects:
/// - Purchase rows are unique per external transaction id
/// - Side effects run only for the writer that created or claimed a row
/// - Campaign totals move through atomic increments only
/// - Goal crossing flips a campaign to funded at most once
/// - Multi-step provider operations unwind through compensating actions

pub mod campaign;
pub mod error;
pub mod onchain;
pub mod persist;
pub mod progress;
pub mod reconciler;
pub mod saga;

pub use campaign::{CampaignFailure, CampaignProgress, ExpirySweep, PresaleCreation, ReconcileReport};
pub use error::EconomicsError;
pub use onchain::{MetalPurchase, UsdcPurchase};
pub use persist::{persist_purchase, Persisted};
pub use progress::{detect_goal_crossing, ProgressAggregator, ProgressOutcome};
pub use reconciler::{
    cart_key_fields, CartCheckout, CheckoutStarted, CreditPurchase, PricedCart, PurchaseOutcome, Reconciler,
    ReconcilerConfig, RewardsConfig, TierUpgrade, TierUpgradeOutcome, CART_CHECKOUT_SCOPE,
};
pub use saga::{Saga, SagaError, SagaOutcome, SagaStep};
