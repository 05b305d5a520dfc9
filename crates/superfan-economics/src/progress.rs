/// CAMPAIGN PROGRESS
///
/// Funding totals move only through the atomic increment procedure. A
/// failed increment is logged and reported, never retried inline and never
/// used to undo the purchase that triggered it; the caller marks that
/// purchase `partial` for out-of-band reconciliation.
///
/// Goal crossing re-reads the totals after a successful increment and asks
/// for an `active -> funded` transition. The transition is conditional on
/// the current status, so concurrent crossers race on the database and
/// exactly one of them wins.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use superfan_core::{CampaignAggregate, CampaignId, CampaignStatus};
use superfan_store::{Store, StoreError};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressOutcome {
    pub incremented: bool,
    /// This call flipped the campaign to `funded`
    pub funded_now: bool,
    /// Totals as re-read after the increment
    pub aggregate: Option<CampaignAggregate>,
}

impl ProgressOutcome {
    fn failed() -> Self {
        ProgressOutcome {
            incremented: false,
            funded_now: false,
            aggregate: None,
        }
    }
}

/// Flip `active -> funded` if the goal is met. Returns whether this call
/// made the transition, along with the totals it saw.
pub async fn detect_goal_crossing(
    store: &dyn Store,
    campaign: &CampaignId,
) -> Result<(bool, Option<CampaignAggregate>), StoreError> {
    let aggregate = match store.get_campaign(campaign).await? {
        Some(aggregate) => aggregate,
        None => return Ok((false, None)),
    };
    if aggregate.status != CampaignStatus::Active || !aggregate.has_reached_goal() {
        return Ok((false, Some(aggregate)));
    }

    let flipped = store
        .transition_campaign_status(campaign, CampaignStatus::Active, CampaignStatus::Funded)
        .await?;
    if flipped {
        info!(
            campaign_id = %campaign,
            current = aggregate.current_funding_cents,
            goal = aggregate.goal_funding_cents,
            "campaign funded"
        );
    }
    let mut aggregate = aggregate;
    if flipped {
        aggregate.status = CampaignStatus::Funded;
    }
    Ok((flipped, Some(aggregate)))
}

#[derive(Clone)]
pub struct ProgressAggregator {
    store: Arc<dyn Store>,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        ProgressAggregator { store }
    }

    pub async fn apply(&self, campaign: &CampaignId, cents: i64, tickets: i64) -> ProgressOutcome {
        if let Err(err) = self
            .store
            .increment_campaign_progress(campaign, cents, tickets)
            .await
        {
            warn!(campaign_id = %campaign, cents, tickets, error = %err, "progress increment failed");
            return ProgressOutcome::failed();
        }

        match detect_goal_crossing(self.store.as_ref(), campaign).await {
            Ok((funded_now, aggregate)) => ProgressOutcome {
                incremented: true,
                funded_now,
                aggregate,
            },
            Err(err) => {
                // Increment landed; the next purchase re-checks the goal
                warn!(campaign_id = %campaign, error = %err, "goal check failed");
                ProgressOutcome {
                    incremented: true,
                    funded_now: false,
                    aggregate: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use superfan_store::{MemoryStore, StoreOp};

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

    #[tokio::test]
    async fn test_crossing_flips_status() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign(10_000, 9_000));
        let aggregator = ProgressAggregator::new(store.clone());

        let outcome = aggregator.apply(&"c1".into(), 1_000, 1).await;
        assert!(outcome.incremented);
        assert!(outcome.funded_now);
        assert_eq!(outcome.aggregate.map(|a| a.status), Some(CampaignStatus::Funded));

        // Past the goal already; nothing left to flip
        let outcome = aggregator.apply(&"c1".into(), 500, 1).await;
        assert!(!outcome.funded_now);
        assert_eq!(store.campaign(&"c1".into()).unwrap().current_funding_cents, 10_500);
    }

    #[tokio::test]
    async fn test_below_goal_stays_active() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign(10_000, 0));
        let outcome = ProgressAggregator::new(store.clone())
            .apply(&"c1".into(), 2_500, 1)
            .await;
        assert!(!outcome.funded_now);
        assert_eq!(outcome.aggregate.unwrap().status, CampaignStatus::Active);
    }

    #[tokio::test]
    async fn test_failed_increment_is_reported_not_raised() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign(10_000, 0));
        store.fail_next(StoreOp::IncrementProgress, 1);
        let outcome = ProgressAggregator::new(store.clone())
            .apply(&"c1".into(), 2_500, 1)
            .await;
        assert_eq!(outcome, ProgressOutcome::failed());
        assert_eq!(store.campaign(&"c1".into()).unwrap().current_funding_cents, 0);
    }

    #[tokio::test]
    async fn test_lost_transition_is_not_a_crossing() {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(campaign(100, 100));
        store.fail_next(StoreOp::TransitionCampaign, 1);
        let err = detect_goal_crossing(store.as_ref(), &"c1".into()).await.unwrap_err();
        assert!(err.is_retryable());

        let (flipped, _) = detect_goal_crossing(store.as_ref(), &"c1".into()).await.unwrap();
        assert!(flipped);
        let (flipped, _) = detect_goal_crossing(store.as_ref(), &"c1".into()).await.unwrap();
        assert!(!flipped);
    }
}
