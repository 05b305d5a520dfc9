/// CAMPAIGN LIFECYCLE
///
/// Presale creation, deadline failure with refunds, and out-of-band
/// reconciliation of purchases whose progress never landed.

use crate::error::EconomicsError;
use crate::progress::detect_goal_crossing;
use crate::reconciler::{Reconciler, Result};
use crate::saga::{Saga, SagaError, SagaOutcome, SagaStep};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use superfan_core::{
    AccessStatus, CampaignId, CampaignStatus, FulfillmentStatus, IdempotencyKey, KeyFields,
    PurchaseRecord, RefundStatus,
};
use superfan_payments::{Presale, PresaleProvider, PresaleSpec};
use superfan_store::Store;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PresaleCreation {
    Created { presale_id: String },
    /// Nothing was left behind at the provider
    RolledBack { reason: String },
    /// A presale exists at the provider that nothing points to
    RequiresManualResolution { presale_id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub campaign_id: CampaignId,
    pub status: CampaignStatus,
    pub goal_funding_cents: i64,
    pub current_funding_cents: i64,
    pub tickets_sold: i64,
    pub progress_bps: u16,
    pub deadline: Option<DateTime<Utc>>,
    pub presale_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignFailure {
    pub campaign_id: String,
    /// This call moved the campaign to `failed`
    pub transitioned: bool,
    pub refunded: usize,
    pub refund_failed: usize,
    pub manual_required: usize,
    pub access_revoked: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirySweep {
    pub failed: Vec<CampaignFailure>,
    /// Expired campaigns that had met their goal and were flipped to funded
    pub funded: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub reconciled: usize,
    pub still_partial: usize,
    /// Closed without re-applying anything: refunded, or the campaign failed
    pub closed: usize,
}

// --- presale saga ---

struct PresaleContext {
    campaign_id: CampaignId,
    spec: PresaleSpec,
    presale: Option<Presale>,
}

struct CreatePresale {
    provider: Arc<dyn PresaleProvider>,
}

#[async_trait]
impl SagaStep<PresaleContext> for CreatePresale {
    fn name(&self) -> &'static str {
        "create_presale"
    }

    async fn execute(&self, ctx: &mut PresaleContext) -> std::result::Result<(), SagaError> {
        let presale = self.provider.create_presale(&ctx.spec).await.map_err(SagaError::new)?;
        ctx.presale = Some(presale);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut PresaleContext) -> std::result::Result<(), SagaError> {
        match &ctx.presale {
            Some(presale) => self
                .provider
                .resolve_presale(&presale.id)
                .await
                .map_err(SagaError::new),
            None => Ok(()),
        }
    }
}

struct LinkPresale {
    store: Arc<dyn Store>,
}

#[async_trait]
impl SagaStep<PresaleContext> for LinkPresale {
    fn name(&self) -> &'static str {
        "link_presale"
    }

    async fn execute(&self, ctx: &mut PresaleContext) -> std::result::Result<(), SagaError> {
        let presale = ctx
            .presale
            .as_ref()
            .ok_or_else(|| SagaError::new("no presale to link"))?;
        self.store
            .set_campaign_presale(&ctx.campaign_id, &presale.id)
            .await
            .map_err(SagaError::new)
    }

    // Last step: a failure here means nothing was written
    async fn compensate(&self, _ctx: &mut PresaleContext) -> std::result::Result<(), SagaError> {
        Ok(())
    }
}

impl Reconciler {
    pub async fn campaign_progress(&self, campaign: &CampaignId) -> Result<CampaignProgress> {
        let aggregate = self
            .store
            .get_campaign(campaign)
            .await?
            .ok_or_else(|| EconomicsError::NotFound(format!("campaign {}", campaign)))?;
        Ok(CampaignProgress {
            progress_bps: aggregate.progress_bps(),
            campaign_id: aggregate.id,
            status: aggregate.status,
            goal_funding_cents: aggregate.goal_funding_cents,
            current_funding_cents: aggregate.current_funding_cents,
            tickets_sold: aggregate.tickets_sold,
            deadline: aggregate.deadline,
            presale_id: aggregate.presale_id,
        })
    }

    pub async fn create_campaign_presale(&self, campaign: &CampaignId, spec: PresaleSpec) -> Result<PresaleCreation> {
        if spec.price_per_token == 0 {
            return Err(EconomicsError::validation("price_per_token", "must be positive"));
        }
        if spec.token_address.trim().is_empty() {
            return Err(EconomicsError::validation("token_address", "required"));
        }
        if spec.total_supply == Some(0) {
            return Err(EconomicsError::validation("total_supply", "must be positive"));
        }
        let aggregate = self.active_campaign(campaign).await?;
        if let Some(existing) = aggregate.presale_id {
            return Err(EconomicsError::Conflict(format!(
                "campaign {} already has presale {}",
                campaign, existing
            )));
        }

        let saga = Saga::new("campaign_presale")
            .step(CreatePresale {
                provider: self.presales.clone(),
            })
            .step(LinkPresale {
                store: self.store.clone(),
            });
        let mut ctx = PresaleContext {
            campaign_id: campaign.clone(),
            spec,
            presale: None,
        };

        let outcome = saga.run(&mut ctx).await;
        let presale_id = ctx.presale.map(|p| p.id);
        Ok(match (outcome, presale_id) {
            (SagaOutcome::Completed, Some(presale_id)) => {
                info!(campaign_id = %campaign, %presale_id, "campaign presale created");
                PresaleCreation::Created { presale_id }
            }
            (SagaOutcome::Completed, None) => PresaleCreation::RolledBack {
                reason: "provider returned no presale".to_string(),
            },
            (SagaOutcome::RolledBack { failed_step, error }, _) => PresaleCreation::RolledBack {
                reason: format!("{}: {}", failed_step, error),
            },
            (SagaOutcome::CompensationFailed { failed_step, error, compensation_error, .. }, presale_id) => {
                let presale_id = presale_id.unwrap_or_default();
                error!(
                    campaign_id = %campaign,
                    %presale_id,
                    %compensation_error,
                    "orphaned presale needs manual resolution"
                );
                PresaleCreation::RequiresManualResolution {
                    presale_id,
                    reason: format!("{}: {}; resolve failed: {}", failed_step, error, compensation_error),
                }
            }
        })
    }

    /// Fail a campaign whose deadline passed short of its goal, refund what
    /// can be refunded automatically and flag the rest. Safe to re-run.
    pub async fn fail_campaign(&self, campaign: &CampaignId, now: DateTime<Utc>) -> Result<CampaignFailure> {
        let aggregate = self
            .store
            .get_campaign(campaign)
            .await?
            .ok_or_else(|| EconomicsError::NotFound(format!("campaign {}", campaign)))?;

        let mut report = CampaignFailure {
            campaign_id: campaign.to_string(),
            ..CampaignFailure::default()
        };
        match aggregate.status {
            CampaignStatus::Funded => {
                return Err(EconomicsError::Conflict(format!("campaign {} is funded", campaign)))
            }
            CampaignStatus::Active => {
                if aggregate.has_reached_goal() {
                    return Err(EconomicsError::Conflict(format!(
                        "campaign {} reached its goal",
                        campaign
                    )));
                }
                if !aggregate.is_past_deadline(now) {
                    return Err(EconomicsError::Conflict(format!(
                        "campaign {} deadline has not passed",
                        campaign
                    )));
                }
                report.transitioned = self
                    .store
                    .transition_campaign_status(campaign, CampaignStatus::Active, CampaignStatus::Failed)
                    .await?;
                if !report.transitioned {
                    // Lost a race; only continue if the winner also failed it
                    let current = self.store.get_campaign(campaign).await?;
                    if current.map(|c| c.status) != Some(CampaignStatus::Failed) {
                        return Err(EconomicsError::Conflict(format!(
                            "campaign {} changed status concurrently",
                            campaign
                        )));
                    }
                }
            }
            CampaignStatus::Failed => {}
        }
        if report.transitioned {
            info!(campaign_id = %campaign, current = aggregate.current_funding_cents, goal = aggregate.goal_funding_cents, "campaign failed");
        }

        let purchases = self.store.list_campaign_purchases(campaign).await?;
        for purchase in purchases.iter().filter(|p| needs_refund(p)) {
            match self.refund(purchase).await {
                RefundStatus::Refunded => report.refunded += 1,
                RefundStatus::RefundFailed => report.refund_failed += 1,
                RefundStatus::ManualRequired => report.manual_required += 1,
            }
        }
        for purchase in purchases.iter().filter(|p| p.access_status == Some(AccessStatus::Granted)) {
            match self.store.set_access_status(&purchase.id, AccessStatus::Revoked).await {
                Ok(()) => report.access_revoked += 1,
                Err(err) => warn!(purchase_id = %purchase.id, error = %err, "access revoke failed"),
            }
        }
        Ok(report)
    }

    async fn refund(&self, purchase: &PurchaseRecord) -> RefundStatus {
        let status = if purchase.payment_method.supports_automatic_refund() {
            match self.stripe_refund(purchase).await {
                Ok(()) => RefundStatus::Refunded,
                Err(err) => {
                    error!(purchase_id = %purchase.id, error = %err, "refund failed");
                    RefundStatus::RefundFailed
                }
            }
        } else {
            info!(
                purchase_id = %purchase.id,
                method = purchase.payment_method.name(),
                "refund needs manual handling"
            );
            RefundStatus::ManualRequired
        };
        if let Err(err) = self.store.set_refund_status(&purchase.id, status).await {
            error!(purchase_id = %purchase.id, error = %err, "could not record refund status");
        }
        status
    }

    async fn stripe_refund(&self, purchase: &PurchaseRecord) -> Result<()> {
        let session = self.checkout.retrieve_session(&purchase.external_id).await?;
        let intent = session
            .payment_intent
            .ok_or_else(|| EconomicsError::NotFound(format!("payment intent for {}", purchase.external_id)))?;
        // One refund per purchase no matter how often the sweep runs
        let key = IdempotencyKey::derive("refund", &KeyFields::new().field("purchase", purchase.id.as_str()))?;
        let refund = self
            .checkout
            .create_refund(&intent, purchase.amount_paid_cents, &key)
            .await?;
        info!(purchase_id = %purchase.id, refund_id = %refund.id, "refund issued");
        Ok(())
    }

    /// Run `fail_campaign` for every active campaign past its deadline
    pub async fn fail_expired_campaigns(&self, now: DateTime<Utc>) -> Result<ExpirySweep> {
        let mut sweep = ExpirySweep::default();
        for campaign in self.store.list_expired_active_campaigns(now).await? {
            if campaign.has_reached_goal() {
                match detect_goal_crossing(self.store.as_ref(), &campaign.id).await {
                    Ok(_) => sweep.funded.push(campaign.id.to_string()),
                    Err(err) => sweep.errors.push(format!("{}: {}", campaign.id, err)),
                }
                continue;
            }
            match self.fail_campaign(&campaign.id, now).await {
                Ok(report) => sweep.failed.push(report),
                Err(err) => {
                    warn!(campaign_id = %campaign.id, error = %err, "could not fail campaign");
                    sweep.errors.push(format!("{}: {}", campaign.id, err));
                }
            }
        }
        Ok(sweep)
    }

    /// Re-apply side effects for purchases left `partial`
    pub async fn reconcile_partial(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for record in self
            .store
            .list_purchases_by_fulfillment(FulfillmentStatus::Partial)
            .await?
        {
            report.examined += 1;
            if let Some(reason) = self.partial_is_moot(&record).await? {
                let closed = self
                    .store
                    .update_fulfillment_status(&record.id, FulfillmentStatus::Partial, FulfillmentStatus::Completed)
                    .await?;
                if closed {
                    warn!(purchase_id = %record.id, reason, "partial purchase closed without progress");
                    report.closed += 1;
                }
                continue;
            }
            // Claim first so concurrent reconcilers never double-apply
            let claimed = self
                .store
                .update_fulfillment_status(&record.id, FulfillmentStatus::Partial, FulfillmentStatus::Completed)
                .await?;
            if !claimed {
                continue;
            }
            let outcome = self.fulfil_and_settle(record).await;
            if outcome.purchase.fulfillment_status == FulfillmentStatus::Completed {
                info!(purchase_id = %outcome.purchase.id, "partial purchase reconciled");
                report.reconciled += 1;
            } else {
                report.still_partial += 1;
            }
        }
        Ok(report)
    }
}

impl Reconciler {
    /// Funding owed by a partial purchase must not land once its money is
    /// being returned
    async fn partial_is_moot(&self, record: &PurchaseRecord) -> Result<Option<&'static str>> {
        if record.refund_status.is_some() {
            return Ok(Some("refund recorded"));
        }
        if let Some(campaign_id) = &record.campaign_id {
            let campaign = self.store.get_campaign(campaign_id).await?;
            if campaign.map(|c| c.status) == Some(CampaignStatus::Failed) {
                return Ok(Some("campaign failed"));
            }
        }
        Ok(None)
    }
}

/// Paid purchases of campaign items not yet refunded or flagged
fn needs_refund(purchase: &PurchaseRecord) -> bool {
    purchase.kind.funds_campaign()
        && purchase.fulfillment_status != FulfillmentStatus::Pending
        && matches!(purchase.refund_status, None | Some(RefundStatus::RefundFailed))
}
