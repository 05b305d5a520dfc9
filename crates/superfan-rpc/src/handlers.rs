use crate::error::{reject, ApiError};
use crate::state::AppState;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use superfan_core::{CampaignId, ClubId, UserId};
use superfan_economics::{
    CartCheckout, CreditPurchase, EconomicsError, MetalPurchase, PresaleCreation, TierUpgrade, UsdcPurchase,
};
use superfan_payments::{CheckoutSession, PresaleSpec};
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::{Rejection, Reply};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QualificationParams {
    pub club_id: ClubId,
    pub target_tier: String,
    #[serde(default)]
    pub window_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfirmRequest {
    pub session_id: String,
}

fn ok_json<T: Serialize>(value: &T) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(value), StatusCode::OK)
}

pub async fn health(state: AppState) -> Result<impl Reply, Rejection> {
    Ok(ok_json(&json!({
        "status": "ok",
        "environment": state.environment,
    })))
}

pub async fn purchase_credits(user: UserId, body: CreditPurchase, state: AppState) -> Result<impl Reply, Rejection> {
    let started = state.reconciler.purchase_credits(&user, body).await.map_err(reject)?;
    Ok(ok_json(&started))
}

pub async fn cart_checkout(user: UserId, body: CartCheckout, state: AppState) -> Result<impl Reply, Rejection> {
    let started = state.reconciler.cart_checkout(&user, body).await.map_err(reject)?;
    Ok(ok_json(&started))
}

pub async fn usdc_purchase(user: UserId, body: UsdcPurchase, state: AppState) -> Result<impl Reply, Rejection> {
    let outcome = state.reconciler.purchase_with_usdc(&user, body).await.map_err(reject)?;
    Ok(ok_json(&outcome))
}

pub async fn metal_purchase(user: UserId, body: MetalPurchase, state: AppState) -> Result<impl Reply, Rejection> {
    let outcome = state.reconciler.purchase_metal_item(&user, body).await.map_err(reject)?;
    Ok(ok_json(&outcome))
}

pub async fn campaign_progress(id: String, _user: UserId, state: AppState) -> Result<impl Reply, Rejection> {
    let progress = state
        .reconciler
        .campaign_progress(&CampaignId::new(id))
        .await
        .map_err(reject)?;
    Ok(ok_json(&progress))
}

/// Load a campaign and make sure `user` administers its club
async fn require_campaign_admin(state: &AppState, user: &UserId, id: &CampaignId) -> Result<(), Rejection> {
    let campaign = state
        .store
        .get_campaign(id)
        .await
        .map_err(|e| reject(EconomicsError::from(e)))?
        .ok_or_else(|| reject(EconomicsError::NotFound(format!("campaign {}", id))))?;
    state
        .admin
        .require_admin(state.store.as_ref(), user, &campaign.club_id)
        .await
        .map_err(reject)
}

pub async fn create_presale(
    id: String,
    user: UserId,
    spec: PresaleSpec,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let campaign = CampaignId::new(id);
    require_campaign_admin(&state, &user, &campaign).await?;

    let outcome = state
        .reconciler
        .create_campaign_presale(&campaign, spec)
        .await
        .map_err(reject)?;
    match outcome {
        PresaleCreation::Created { presale_id } => {
            info!(campaign_id = %campaign, presale_id = %presale_id, admin = %user, "presale linked");
            Ok(warp::reply::with_status(
                warp::reply::json(&json!({ "status": "created", "presale_id": presale_id })),
                StatusCode::CREATED,
            ))
        }
        PresaleCreation::RolledBack { reason } => Err(reject(
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "presale_rolled_back", reason).retryable(true),
        )),
        PresaleCreation::RequiresManualResolution { presale_id, reason } => {
            error!(campaign_id = %campaign, presale_id = %presale_id, "orphaned presale needs manual resolution");
            Err(reject(ApiError::manual_resolution(presale_id, reason)))
        }
    }
}

pub async fn fail_campaign(id: String, user: UserId, state: AppState) -> Result<impl Reply, Rejection> {
    let campaign = CampaignId::new(id);
    require_campaign_admin(&state, &user, &campaign).await?;
    let report = state
        .reconciler
        .fail_campaign(&campaign, Utc::now())
        .await
        .map_err(reject)?;
    Ok(ok_json(&report))
}

pub async fn tier_upgrade(user: UserId, body: TierUpgrade, state: AppState) -> Result<impl Reply, Rejection> {
    let outcome = state.reconciler.start_tier_upgrade(&user, body).await.map_err(reject)?;
    Ok(ok_json(&outcome))
}

pub async fn tier_qualification(
    params: QualificationParams,
    user: UserId,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let result = state
        .reconciler
        .tier_qualification(&user, &params.club_id, &params.target_tier, params.window_days)
        .await
        .map_err(reject)?;
    Ok(ok_json(&result))
}

pub async fn stripe_confirm(user: UserId, body: ConfirmRequest, state: AppState) -> Result<impl Reply, Rejection> {
    let outcome = state
        .reconciler
        .confirm_stripe_session(&user, &body.session_id)
        .await
        .map_err(reject)?;
    Ok(ok_json(&outcome))
}

pub async fn stripe_webhook(signature: Option<String>, body: Bytes, state: AppState) -> Result<impl Reply, Rejection> {
    let header = signature.ok_or_else(|| {
        reject(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_signature",
            "missing Stripe-Signature header",
        ))
    })?;
    let event = state
        .webhooks
        .verify(&body, &header, Utc::now().timestamp())
        .map_err(reject)?;

    if !event.is_checkout_completed() {
        info!(event_id = %event.id, event_type = %event.event_type, "webhook event ignored");
        return Ok(ok_json(&json!({ "received": true, "handled": false })));
    }

    let session: CheckoutSession = serde_json::from_value(event.data.object).map_err(|e| {
        reject(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_payload",
            format!("checkout session: {}", e),
        ))
    })?;
    // Delayed methods complete the session before the money arrives;
    // `async_payment_succeeded` settles it later
    if !session.is_paid() {
        info!(event_id = %event.id, session_id = %session.id, payment_status = %session.payment_status, "checkout completed awaiting payment");
        return Ok(ok_json(&json!({
            "received": true,
            "handled": false,
            "payment_status": session.payment_status,
        })));
    }
    match state.reconciler.complete_stripe_session(&session).await {
        Ok(outcome) => {
            info!(event_id = %event.id, session_id = %session.id, idempotent = outcome.idempotent, "webhook settled checkout");
            Ok(ok_json(&json!({
                "received": true,
                "handled": true,
                "idempotent": outcome.idempotent,
                "fulfillment_status": outcome.purchase.fulfillment_status,
            })))
        }
        // Sessions created outside this service
        Err(EconomicsError::NotFound(_)) => {
            warn!(event_id = %event.id, session_id = %session.id, "webhook for unknown checkout session");
            Ok(ok_json(&json!({ "received": true, "handled": false })))
        }
        Err(e) => Err(reject(e)),
    }
}
