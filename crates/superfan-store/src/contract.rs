/// STORE CONTRACT
///
/// Typed surface of the external database. Atomicity lives on the database
/// side: progress increments are a single procedure call and status
/// transitions are conditional updates, so callers never read-modify-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use superfan_core::{
    AccessStatus, CampaignAggregate, CampaignId, CampaignStatus, ClubId, FulfillmentStatus,
    MembershipTier, MetalItem, NewPurchase, PurchaseRecord, RefundStatus, Tier, UserId,
};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (Postgres 23505)
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    /// Network failure or 5xx; the same call may succeed later
    #[error("Database unavailable: {0}")]
    Unavailable(String),
    #[error("Database rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Malformed database response: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Input of `check_tier_qualification`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualificationQuery {
    pub user_id: UserId,
    pub club_id: ClubId,
    pub target_tier: String,
    pub rolling_window_days: u32,
}

/// Output of `check_tier_qualification`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationResult {
    /// The user holds the target tier, whether earned or purchased
    pub qualifies: bool,
    /// Rolling-window points alone reach the target tier
    pub meets_points_requirement: bool,
    pub earned_tier: String,
    pub effective_tier: String,
    pub rolling_points: i64,
    pub total_points: i64,
    pub points_required: i64,
}

impl QualificationResult {
    pub fn points_shortfall(&self) -> i64 {
        (self.points_required - self.rolling_points).max(0)
    }
}

/// Input of `award_points_unified`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsAward {
    pub user_id: UserId,
    pub club_id: ClubId,
    pub points: i64,
    pub source: String,
    /// Awards are unique per `(source, reference_id)`
    pub reference_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsBalance {
    pub awarded: i64,
    pub total_points: i64,
    #[serde(default)]
    pub duplicate: bool,
}

/// Input of `increment_user_credits`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditGrant {
    pub user_id: UserId,
    pub club_id: ClubId,
    pub credits: i64,
    pub reference_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
    pub balance: i64,
    #[serde(default)]
    pub duplicate: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- campaigns ---

    async fn get_campaign(&self, id: &CampaignId) -> Result<Option<CampaignAggregate>, StoreError>;

    async fn list_expired_active_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<CampaignAggregate>, StoreError>;

    /// `increment_campaigns_ticket_progress`: atomic signed increments
    async fn increment_campaign_progress(
        &self,
        id: &CampaignId,
        funding_cents: i64,
        tickets: i64,
    ) -> Result<(), StoreError>;

    /// Set `to` only while the status is still `from`. Returns whether this
    /// call performed the transition.
    async fn transition_campaign_status(
        &self,
        id: &CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool, StoreError>;

    async fn set_campaign_presale(&self, id: &CampaignId, presale_id: &str) -> Result<(), StoreError>;

    // --- catalog ---

    async fn get_campaign_tiers(&self, campaign: &CampaignId) -> Result<Vec<Tier>, StoreError>;

    async fn get_metal_item(&self, item_id: &str) -> Result<Option<MetalItem>, StoreError>;

    async fn get_membership_tier(&self, club: &ClubId, tier: &str) -> Result<Option<MembershipTier>, StoreError>;

    // --- purchases ---

    /// Fails with [`StoreError::UniqueViolation`] when `external_id` exists
    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<PurchaseRecord, StoreError>;

    async fn find_purchase_by_external_id(&self, external_id: &str) -> Result<Option<PurchaseRecord>, StoreError>;

    /// Conditional status update; returns whether this call changed it
    async fn update_fulfillment_status(
        &self,
        purchase_id: &str,
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    ) -> Result<bool, StoreError>;

    async fn set_refund_status(&self, purchase_id: &str, status: RefundStatus) -> Result<(), StoreError>;

    async fn set_access_status(&self, purchase_id: &str, status: AccessStatus) -> Result<(), StoreError>;

    async fn list_campaign_purchases(&self, campaign: &CampaignId) -> Result<Vec<PurchaseRecord>, StoreError>;

    async fn list_purchases_by_fulfillment(&self, status: FulfillmentStatus) -> Result<Vec<PurchaseRecord>, StoreError>;

    // --- procedures ---

    async fn check_tier_qualification(&self, query: &QualificationQuery) -> Result<QualificationResult, StoreError>;

    async fn award_points(&self, award: &PointsAward) -> Result<PointsBalance, StoreError>;

    async fn grant_credits(&self, grant: &CreditGrant) -> Result<CreditBalance, StoreError>;

    // --- authorization ---

    async fn is_club_admin(&self, user: &UserId, club: &ClubId) -> Result<bool, StoreError>;
}
