/// POSTGREST CLIENT
///
/// [`Store`] over a PostgREST-style HTTP endpoint: tables under
/// `/<table>`, stored procedures under `/rpc/<name>`. Conditional updates
/// are PATCH requests filtered on the expected current status with
/// `Prefer: return=representation`, so an empty response means another
/// writer got there first.

use crate::contract::{
    CreditBalance, CreditGrant, PointsAward, PointsBalance, QualificationQuery,
    QualificationResult, Store, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use superfan_core::{
    AccessStatus, CampaignAggregate, CampaignId, CampaignStatus, ClubId, FulfillmentStatus,
    MembershipTier, MetalItem, NewPurchase, PurchaseRecord, RefundStatus, Tier, UserId,
};
use tracing::{debug, warn};

/// Postgres `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestStoreConfig {
    /// Base URL, e.g. `https://project.example.co/rest/v1`
    pub rest_url: String,
    pub service_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

pub struct RestStore {
    client: Client,
    base: String,
    service_key: String,
}

impl RestStore {
    pub fn new(config: &RestStoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(RestStore {
            client,
            base: config.rest_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base, path))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, StoreError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()));
        }

        let parsed: Option<PostgrestError> = serde_json::from_str(&body).ok();
        let code = parsed.as_ref().and_then(|p| p.code.clone());
        let message = parsed
            .as_ref()
            .and_then(|p| p.message.clone().or_else(|| p.details.clone()))
            .unwrap_or_else(|| body.clone());

        if code.as_deref() == Some(UNIQUE_VIOLATION) || status == StatusCode::CONFLICT {
            return Err(StoreError::UniqueViolation(message));
        }
        if status.is_server_error() {
            warn!(status = status.as_u16(), %message, "database request failed");
            return Err(StoreError::Unavailable(message));
        }
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, filters: &[(&str, String)]) -> Result<Vec<T>, StoreError> {
        let value = self
            .send(
                self.request(Method::GET, table)
                    .query(&[("select", "*")])
                    .query(filters),
            )
            .await?;
        decode(value)
    }

    async fn select_one<T: DeserializeOwned>(&self, table: &str, filters: &[(&str, String)]) -> Result<Option<T>, StoreError> {
        Ok(self.select(table, filters).await?.into_iter().next())
    }

    /// PATCH returning the affected rows
    async fn update(&self, table: &str, filters: &[(&str, String)], body: Value) -> Result<Vec<Value>, StoreError> {
        let value = self
            .send(
                self.request(Method::PATCH, table)
                    .header("Prefer", "return=representation")
                    .query(filters)
                    .json(&body),
            )
            .await?;
        decode(value)
    }

    async fn rpc<T: DeserializeOwned>(&self, function: &str, args: Value) -> Result<T, StoreError> {
        debug!(function, "calling stored procedure");
        let value = self
            .send(self.request(Method::POST, &format!("rpc/{}", function)).json(&args))
            .await?;
        // Set-returning functions come back as a one-row array
        let value = match value {
            Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
            other => other,
        };
        decode(value)
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Decode(e.to_string()))
}

fn transport_error(err: reqwest::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl Store for RestStore {
    async fn get_campaign(&self, id: &CampaignId) -> Result<Option<CampaignAggregate>, StoreError> {
        self.select_one("campaigns", &[("id", eq(id))]).await
    }

    async fn list_expired_active_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<CampaignAggregate>, StoreError> {
        self.select(
            "campaigns",
            &[
                ("status", eq(CampaignStatus::Active.name())),
                (
                    "deadline",
                    format!("lte.{}", now.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ),
            ],
        )
        .await
    }

    async fn increment_campaign_progress(
        &self,
        id: &CampaignId,
        funding_cents: i64,
        tickets: i64,
    ) -> Result<(), StoreError> {
        let _: Value = self
            .rpc(
                "increment_campaigns_ticket_progress",
                json!({
                    "p_campaign_id": id,
                    "p_increment_cents": funding_cents,
                    "p_increment_tickets": tickets,
                }),
            )
            .await?;
        Ok(())
    }

    async fn transition_campaign_status(
        &self,
        id: &CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool, StoreError> {
        let rows = self
            .update(
                "campaigns",
                &[("id", eq(id)), ("status", eq(from.name()))],
                json!({ "status": to }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn set_campaign_presale(&self, id: &CampaignId, presale_id: &str) -> Result<(), StoreError> {
        let rows = self
            .update("campaigns", &[("id", eq(id))], json!({ "presale_id": presale_id }))
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(format!("campaign {}", id)));
        }
        Ok(())
    }

    async fn get_campaign_tiers(&self, campaign: &CampaignId) -> Result<Vec<Tier>, StoreError> {
        self.select("campaign_tiers", &[("campaign_id", eq(campaign))]).await
    }

    async fn get_metal_item(&self, item_id: &str) -> Result<Option<MetalItem>, StoreError> {
        self.select_one("metal_items", &[("id", eq(item_id))]).await
    }

    async fn get_membership_tier(&self, club: &ClubId, tier: &str) -> Result<Option<MembershipTier>, StoreError> {
        self.select_one("membership_tiers", &[("club_id", eq(club)), ("tier", eq(tier))])
            .await
    }

    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<PurchaseRecord, StoreError> {
        let value = self
            .send(
                self.request(Method::POST, "purchases")
                    .header("Prefer", "return=representation")
                    .json(&purchase),
            )
            .await?;
        let rows: Vec<PurchaseRecord> = decode(value)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("insert returned no rows".to_string()))
    }

    async fn find_purchase_by_external_id(&self, external_id: &str) -> Result<Option<PurchaseRecord>, StoreError> {
        self.select_one("purchases", &[("external_id", eq(external_id))]).await
    }

    async fn update_fulfillment_status(
        &self,
        purchase_id: &str,
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    ) -> Result<bool, StoreError> {
        let rows = self
            .update(
                "purchases",
                &[("id", eq(purchase_id)), ("fulfillment_status", eq(from.name()))],
                json!({ "fulfillment_status": to }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn set_refund_status(&self, purchase_id: &str, status: RefundStatus) -> Result<(), StoreError> {
        self.update("purchases", &[("id", eq(purchase_id))], json!({ "refund_status": status }))
            .await?;
        Ok(())
    }

    async fn set_access_status(&self, purchase_id: &str, status: AccessStatus) -> Result<(), StoreError> {
        self.update("purchases", &[("id", eq(purchase_id))], json!({ "access_status": status }))
            .await?;
        Ok(())
    }

    async fn list_campaign_purchases(&self, campaign: &CampaignId) -> Result<Vec<PurchaseRecord>, StoreError> {
        self.select("purchases", &[("campaign_id", eq(campaign))]).await
    }

    async fn list_purchases_by_fulfillment(&self, status: FulfillmentStatus) -> Result<Vec<PurchaseRecord>, StoreError> {
        self.select("purchases", &[("fulfillment_status", eq(status.name()))]).await
    }

    async fn check_tier_qualification(&self, query: &QualificationQuery) -> Result<QualificationResult, StoreError> {
        self.rpc(
            "check_tier_qualification",
            json!({
                "p_user_id": query.user_id,
                "p_club_id": query.club_id,
                "p_target_tier": query.target_tier,
                "p_rolling_window_days": query.rolling_window_days,
            }),
        )
        .await
    }

    async fn award_points(&self, award: &PointsAward) -> Result<PointsBalance, StoreError> {
        self.rpc(
            "award_points_unified",
            json!({
                "p_user_id": award.user_id,
                "p_club_id": award.club_id,
                "p_points": award.points,
                "p_source": award.source,
                "p_reference_id": award.reference_id,
            }),
        )
        .await
    }

    async fn grant_credits(&self, grant: &CreditGrant) -> Result<CreditBalance, StoreError> {
        self.rpc(
            "increment_user_credits",
            json!({
                "p_user_id": grant.user_id,
                "p_club_id": grant.club_id,
                "p_credits": grant.credits,
                "p_reference_id": grant.reference_id,
            }),
        )
        .await
    }

    async fn is_club_admin(&self, user: &UserId, club: &ClubId) -> Result<bool, StoreError> {
        let rows: Vec<Value> = self
            .select("club_admins", &[("user_id", eq(user)), ("club_id", eq(club))])
            .await?;
        Ok(!rows.is_empty())
    }
}
