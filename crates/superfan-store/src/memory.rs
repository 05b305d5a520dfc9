/// IN-MEMORY STORE
///
/// Process-local implementation of [`Store`] with the same guarantees the
/// database gives: unique `external_id`, conditional status updates, and
/// increments applied under one lock. Used by tests and `--memory` dev runs.
/// Individual operations can be told to fail to exercise partial-failure
/// paths.

use crate::contract::{
    CreditBalance, CreditGrant, PointsAward, PointsBalance, QualificationQuery,
    QualificationResult, Store, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use superfan_core::{
    AccessStatus, CampaignAggregate, CampaignId, CampaignStatus, ClubId, FulfillmentStatus,
    MembershipTier, MetalItem, NewPurchase, PurchaseRecord, RefundStatus, Tier, UserId,
};
use tracing::debug;
use uuid::Uuid;

/// Operations that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertPurchase,
    IncrementProgress,
    TransitionCampaign,
    SetCampaignPresale,
    AwardPoints,
    GrantCredits,
    SetRefundStatus,
}

#[derive(Default)]
struct Inner {
    campaigns: HashMap<CampaignId, CampaignAggregate>,
    tiers: HashMap<CampaignId, Vec<Tier>>,
    metal_items: HashMap<String, MetalItem>,
    membership_tiers: HashMap<(ClubId, String), MembershipTier>,
    purchases: Vec<PurchaseRecord>,
    external_index: HashMap<String, usize>,
    qualifications: HashMap<(UserId, ClubId, String), QualificationResult>,
    points: HashMap<(UserId, ClubId), i64>,
    point_awards: HashSet<(String, String)>,
    credits: HashMap<(UserId, ClubId), i64>,
    credit_grants: HashSet<String>,
    admins: HashSet<(UserId, ClubId)>,
    failures: HashMap<StoreOp, u32>,
    increment_calls: u64,
}

impl Inner {
    fn should_fail(&mut self, op: StoreOp) -> bool {
        match self.failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn purchase_mut(&mut self, id: &str) -> Result<&mut PurchaseRecord, StoreError> {
        self.purchases
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("purchase {}", id)))
    }
}

fn injected(op: StoreOp) -> StoreError {
    StoreError::Unavailable(format!("injected failure: {:?}", op))
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- seeding ---

    pub fn insert_campaign(&self, campaign: CampaignAggregate) {
        self.inner.lock().campaigns.insert(campaign.id.clone(), campaign);
    }

    pub fn insert_tier(&self, tier: Tier) {
        self.inner
            .lock()
            .tiers
            .entry(tier.campaign_id.clone())
            .or_default()
            .push(tier);
    }

    pub fn insert_metal_item(&self, item: MetalItem) {
        self.inner.lock().metal_items.insert(item.id.clone(), item);
    }

    pub fn insert_membership_tier(&self, tier: MembershipTier) {
        self.inner
            .lock()
            .membership_tiers
            .insert((tier.club_id.clone(), tier.tier.clone()), tier);
    }

    pub fn set_qualification(&self, user: &UserId, club: &ClubId, tier: &str, result: QualificationResult) {
        self.inner
            .lock()
            .qualifications
            .insert((user.clone(), club.clone(), tier.to_string()), result);
    }

    pub fn add_club_admin(&self, user: &UserId, club: &ClubId) {
        self.inner.lock().admins.insert((user.clone(), club.clone()));
    }

    /// Make the next `times` calls of `op` fail with a retryable error
    pub fn fail_next(&self, op: StoreOp, times: u32) {
        self.inner.lock().failures.insert(op, times);
    }

    // --- inspection ---

    pub fn campaign(&self, id: &CampaignId) -> Option<CampaignAggregate> {
        self.inner.lock().campaigns.get(id).cloned()
    }

    pub fn purchases(&self) -> Vec<PurchaseRecord> {
        self.inner.lock().purchases.clone()
    }

    pub fn points_of(&self, user: &UserId, club: &ClubId) -> i64 {
        self.inner
            .lock()
            .points
            .get(&(user.clone(), club.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn credits_of(&self, user: &UserId, club: &ClubId) -> i64 {
        self.inner
            .lock()
            .credits
            .get(&(user.clone(), club.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Successful progress increments applied so far
    pub fn increment_calls(&self) -> u64 {
        self.inner.lock().increment_calls
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_campaign(&self, id: &CampaignId) -> Result<Option<CampaignAggregate>, StoreError> {
        Ok(self.inner.lock().campaigns.get(id).cloned())
    }

    async fn list_expired_active_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<CampaignAggregate>, StoreError> {
        let inner = self.inner.lock();
        let mut expired: Vec<CampaignAggregate> = inner
            .campaigns
            .values()
            .filter(|c| c.status == CampaignStatus::Active && c.is_past_deadline(now))
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(expired)
    }

    async fn increment_campaign_progress(
        &self,
        id: &CampaignId,
        funding_cents: i64,
        tickets: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.should_fail(StoreOp::IncrementProgress) {
            return Err(injected(StoreOp::IncrementProgress));
        }
        let campaign = inner
            .campaigns
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("campaign {}", id)))?;
        campaign.current_funding_cents += funding_cents;
        campaign.tickets_sold += tickets;
        inner.increment_calls += 1;
        Ok(())
    }

    async fn transition_campaign_status(
        &self,
        id: &CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.should_fail(StoreOp::TransitionCampaign) {
            return Err(injected(StoreOp::TransitionCampaign));
        }
        match inner.campaigns.get_mut(id) {
            Some(c) if c.status == from => {
                c.status = to;
                debug!(campaign = %id, from = from.name(), to = to.name(), "campaign status transition");
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("campaign {}", id))),
        }
    }

    async fn set_campaign_presale(&self, id: &CampaignId, presale_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.should_fail(StoreOp::SetCampaignPresale) {
            return Err(injected(StoreOp::SetCampaignPresale));
        }
        let campaign = inner
            .campaigns
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("campaign {}", id)))?;
        campaign.presale_id = Some(presale_id.to_string());
        Ok(())
    }

    async fn get_campaign_tiers(&self, campaign: &CampaignId) -> Result<Vec<Tier>, StoreError> {
        Ok(self.inner.lock().tiers.get(campaign).cloned().unwrap_or_default())
    }

    async fn get_metal_item(&self, item_id: &str) -> Result<Option<MetalItem>, StoreError> {
        Ok(self.inner.lock().metal_items.get(item_id).cloned())
    }

    async fn get_membership_tier(&self, club: &ClubId, tier: &str) -> Result<Option<MembershipTier>, StoreError> {
        Ok(self
            .inner
            .lock()
            .membership_tiers
            .get(&(club.clone(), tier.to_string()))
            .cloned())
    }

    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<PurchaseRecord, StoreError> {
        let mut inner = self.inner.lock();
        if inner.should_fail(StoreOp::InsertPurchase) {
            return Err(injected(StoreOp::InsertPurchase));
        }
        if inner.external_index.contains_key(&purchase.external_id) {
            return Err(StoreError::UniqueViolation(
                "purchases_external_id_key".to_string(),
            ));
        }
        let record = PurchaseRecord::from_new(purchase, Uuid::new_v4().to_string(), Utc::now());
        let index = inner.purchases.len();
        inner.external_index.insert(record.external_id.clone(), index);
        inner.purchases.push(record.clone());
        Ok(record)
    }

    async fn find_purchase_by_external_id(&self, external_id: &str) -> Result<Option<PurchaseRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .external_index
            .get(external_id)
            .and_then(|i| inner.purchases.get(*i))
            .cloned())
    }

    async fn update_fulfillment_status(
        &self,
        purchase_id: &str,
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let purchase = inner.purchase_mut(purchase_id)?;
        if purchase.fulfillment_status != from {
            return Ok(false);
        }
        purchase.fulfillment_status = to;
        Ok(true)
    }

    async fn set_refund_status(&self, purchase_id: &str, status: RefundStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.should_fail(StoreOp::SetRefundStatus) {
            return Err(injected(StoreOp::SetRefundStatus));
        }
        inner.purchase_mut(purchase_id)?.refund_status = Some(status);
        Ok(())
    }

    async fn set_access_status(&self, purchase_id: &str, status: AccessStatus) -> Result<(), StoreError> {
        self.inner.lock().purchase_mut(purchase_id)?.access_status = Some(status);
        Ok(())
    }

    async fn list_campaign_purchases(&self, campaign: &CampaignId) -> Result<Vec<PurchaseRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .purchases
            .iter()
            .filter(|p| p.campaign_id.as_ref() == Some(campaign))
            .cloned()
            .collect())
    }

    async fn list_purchases_by_fulfillment(&self, status: FulfillmentStatus) -> Result<Vec<PurchaseRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .purchases
            .iter()
            .filter(|p| p.fulfillment_status == status)
            .cloned()
            .collect())
    }

    async fn check_tier_qualification(&self, query: &QualificationQuery) -> Result<QualificationResult, StoreError> {
        let inner = self.inner.lock();
        let key = (
            query.user_id.clone(),
            query.club_id.clone(),
            query.target_tier.clone(),
        );
        if let Some(seeded) = inner.qualifications.get(&key) {
            return Ok(seeded.clone());
        }

        // Unseeded: qualify on lifetime points against the tier requirement
        let points = inner
            .points
            .get(&(query.user_id.clone(), query.club_id.clone()))
            .copied()
            .unwrap_or(0);
        let required = inner
            .membership_tiers
            .get(&(query.club_id.clone(), query.target_tier.clone()))
            .map(|t| t.points_required)
            .unwrap_or(0);
        let qualifies = points >= required;
        let tier = if qualifies {
            query.target_tier.clone()
        } else {
            "none".to_string()
        };
        Ok(QualificationResult {
            qualifies,
            meets_points_requirement: qualifies,
            earned_tier: tier.clone(),
            effective_tier: tier,
            rolling_points: points,
            total_points: points,
            points_required: required,
        })
    }

    async fn award_points(&self, award: &PointsAward) -> Result<PointsBalance, StoreError> {
        let mut inner = self.inner.lock();
        if inner.should_fail(StoreOp::AwardPoints) {
            return Err(injected(StoreOp::AwardPoints));
        }
        let key = (award.user_id.clone(), award.club_id.clone());
        let fresh = inner
            .point_awards
            .insert((award.source.clone(), award.reference_id.clone()));
        if fresh {
            *inner.points.entry(key.clone()).or_insert(0) += award.points;
        }
        let total = inner.points.get(&key).copied().unwrap_or(0);
        Ok(PointsBalance {
            awarded: if fresh { award.points } else { 0 },
            total_points: total,
            duplicate: !fresh,
        })
    }

    async fn grant_credits(&self, grant: &CreditGrant) -> Result<CreditBalance, StoreError> {
        let mut inner = self.inner.lock();
        if inner.should_fail(StoreOp::GrantCredits) {
            return Err(injected(StoreOp::GrantCredits));
        }
        let key = (grant.user_id.clone(), grant.club_id.clone());
        let fresh = inner.credit_grants.insert(grant.reference_id.clone());
        if fresh {
            *inner.credits.entry(key.clone()).or_insert(0) += grant.credits;
        }
        Ok(CreditBalance {
            balance: inner.credits.get(&key).copied().unwrap_or(0),
            duplicate: !fresh,
        })
    }

    async fn is_club_admin(&self, user: &UserId, club: &ClubId) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .admins
            .contains(&(user.clone(), club.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use superfan_core::{PaymentMethod, PurchaseKind};

    fn campaign(id: &str, goal: i64) -> CampaignAggregate {
        CampaignAggregate {
            id: id.into(),
            club_id: "club".into(),
            status: CampaignStatus::Active,
            goal_funding_cents: goal,
            current_funding_cents: 0,
            tickets_sold: 0,
            deadline: None,
            presale_id: None,
            presale_price_per_token: None,
            presale_token_supply: None,
        }
    }

    fn purchase(external_id: &str) -> NewPurchase {
        NewPurchase {
            external_id: external_id.to_string(),
            user_id: "u1".into(),
            club_id: "club".into(),
            campaign_id: Some("c1".into()),
            kind: PurchaseKind::CampaignItems,
            payment_method: PaymentMethod::Usdc,
            amount_paid_cents: 1_000,
            original_price_cents: 1_000,
            discounted_price_cents: 1_000,
            units: 1,
            items: vec![],
            idempotency_key: None,
            fulfillment_status: FulfillmentStatus::Completed,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_unique_external_id() {
        let store = MemoryStore::new();
        store.insert_purchase(purchase("0xabc")).await.unwrap();
        let err = store.insert_purchase(purchase("0xabc")).await.unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(store.purchases().len(), 1);
    }

    #[tokio::test]
    async fn test_guarded_transitions() {
        let store = MemoryStore::new();
        store.insert_campaign(campaign("c1", 100));
        let id: CampaignId = "c1".into();

        assert!(store
            .transition_campaign_status(&id, CampaignStatus::Active, CampaignStatus::Funded)
            .await
            .unwrap());
        assert!(!store
            .transition_campaign_status(&id, CampaignStatus::Active, CampaignStatus::Funded)
            .await
            .unwrap());
        assert!(!store
            .transition_campaign_status(&id, CampaignStatus::Active, CampaignStatus::Failed)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_parallel_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign("c1", 1_000_000));

        let handles: Vec<_> = (1..=50)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .increment_campaign_progress(&"c1".into(), i * 100, 1)
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let c = store.campaign(&"c1".into()).unwrap();
        assert_eq!(c.current_funding_cents, (1..=50).map(|i| i * 100).sum::<i64>());
        assert_eq!(c.tickets_sold, 50);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let store = MemoryStore::new();
        store.insert_campaign(campaign("c1", 100));
        store.fail_next(StoreOp::IncrementProgress, 1);

        let id: CampaignId = "c1".into();
        assert!(store.increment_campaign_progress(&id, 10, 1).await.unwrap_err().is_retryable());
        store.increment_campaign_progress(&id, 10, 1).await.unwrap();
        assert_eq!(store.campaign(&id).unwrap().current_funding_cents, 10);
    }

    #[tokio::test]
    async fn test_point_awards_dedupe_on_reference() {
        let store = MemoryStore::new();
        let award = PointsAward {
            user_id: "u1".into(),
            club_id: "club".into(),
            points: 50,
            source: "purchase".into(),
            reference_id: "p-1".into(),
        };
        assert!(!store.award_points(&award).await.unwrap().duplicate);
        let again = store.award_points(&award).await.unwrap();
        assert!(again.duplicate);
        assert_eq!(again.total_points, 50);
    }

    #[tokio::test]
    async fn test_unseeded_qualification_uses_points() {
        let store = MemoryStore::new();
        store.insert_membership_tier(MembershipTier {
            club_id: "club".into(),
            tier: "gold".into(),
            upgrade_price_cents: 5_000,
            points_required: 100,
        });
        let query = QualificationQuery {
            user_id: "u1".into(),
            club_id: "club".into(),
            target_tier: "gold".into(),
            rolling_window_days: 60,
        };
        let result = store.check_tier_qualification(&query).await.unwrap();
        assert!(!result.qualifies);
        assert_eq!(result.points_shortfall(), 100);
    }
}
