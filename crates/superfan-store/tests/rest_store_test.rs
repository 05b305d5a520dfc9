//! RestStore against a local PostgREST stand-in

use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use superfan_core::{
    CampaignId, CampaignStatus, FulfillmentStatus, NewPurchase, PaymentMethod, PurchaseKind,
};
use superfan_store::{QualificationQuery, RestStore, RestStoreConfig, Store, StoreError};
use warp::http::StatusCode;
use warp::Filter;

fn spawn_postgrest() -> SocketAddr {
    let duplicate_insert = warp::path!("rest" / "v1" / "purchases")
        .and(warp::post())
        .and(warp::header::<String>("apikey"))
        .map(|_key: String| {
            warp::reply::with_status(
                warp::reply::json(&json!({
                    "code": "23505",
                    "message": "duplicate key value violates unique constraint \"purchases_external_id_key\"",
                })),
                StatusCode::CONFLICT,
            )
        });

    let campaigns_get = warp::path!("rest" / "v1" / "campaigns")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .map(|q: HashMap<String, String>| {
            if q.get("id").map(String::as_str) == Some("eq.c1") {
                warp::reply::json(&json!([{
                    "id": "c1",
                    "club_id": "club",
                    "status": "active",
                    "goal_funding_cents": 100000,
                    "current_funding_cents": 2500,
                    "tickets_sold": 3,
                    "deadline": null
                }]))
            } else {
                warp::reply::json(&json!([]))
            }
        });

    // Another writer already moved the campaign: the filtered PATCH matches nothing
    let campaigns_patch = warp::path!("rest" / "v1" / "campaigns")
        .and(warp::patch())
        .map(|| warp::reply::json(&json!([])));

    let purchases_patch = warp::path!("rest" / "v1" / "purchases")
        .and(warp::patch())
        .and(warp::query::<HashMap<String, String>>())
        .map(|q: HashMap<String, String>| {
            if q.get("fulfillment_status").map(String::as_str) == Some("eq.pending") {
                warp::reply::json(&json!([{ "id": "p1" }]))
            } else {
                warp::reply::json(&json!([]))
            }
        });

    let qualification = warp::path!("rest" / "v1" / "rpc" / "check_tier_qualification")
        .and(warp::post())
        .and(warp::body::json())
        .map(|body: serde_json::Value| {
            assert_eq!(body["p_rolling_window_days"], 60);
            warp::reply::json(&json!([{
                "qualifies": false,
                "meets_points_requirement": false,
                "earned_tier": "silver",
                "effective_tier": "silver",
                "rolling_points": 40,
                "total_points": 120,
                "points_required": 100
            }]))
        });

    let increment = warp::path!("rest" / "v1" / "rpc" / "increment_campaigns_ticket_progress")
        .and(warp::post())
        .map(|| {
            warp::reply::with_status(
                warp::reply::json(&json!({ "message": "connection pool exhausted" })),
                StatusCode::SERVICE_UNAVAILABLE,
            )
        });

    let routes = duplicate_insert
        .or(campaigns_get)
        .or(campaigns_patch)
        .or(purchases_patch)
        .or(qualification)
        .or(increment);

    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn store(addr: SocketAddr) -> RestStore {
    RestStore::new(&RestStoreConfig {
        rest_url: format!("http://{}/rest/v1/", addr),
        service_key: "service-role-key".to_string(),
        timeout_secs: 5,
    })
    .unwrap()
}

fn purchase() -> NewPurchase {
    NewPurchase {
        external_id: "cs_test_123".to_string(),
        user_id: "u1".into(),
        club_id: "club".into(),
        campaign_id: None,
        kind: PurchaseKind::Credits,
        payment_method: PaymentMethod::Stripe,
        amount_paid_cents: 500,
        original_price_cents: 500,
        discounted_price_cents: 500,
        units: 5,
        items: vec![],
        idempotency_key: Some("credit_purchase_abc".to_string()),
        fulfillment_status: FulfillmentStatus::Pending,
        metadata: serde_json::Value::Null,
    }
}

#[tokio::test]
async fn test_duplicate_insert_maps_to_unique_violation() {
    let store = store(spawn_postgrest());
    let err = store.insert_purchase(purchase()).await.unwrap_err();
    assert!(err.is_unique_violation(), "got {:?}", err);
}

#[tokio::test]
async fn test_campaign_lookup_filters_by_id() {
    let store = store(spawn_postgrest());
    let found = store.get_campaign(&"c1".into()).await.unwrap().unwrap();
    assert_eq!(found.current_funding_cents, 2500);
    assert_eq!(found.status, CampaignStatus::Active);
    assert!(store.get_campaign(&"missing".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_lost_transition_reports_false() {
    let store = store(spawn_postgrest());
    let id: CampaignId = "c1".into();
    let moved = store
        .transition_campaign_status(&id, CampaignStatus::Active, CampaignStatus::Funded)
        .await
        .unwrap();
    assert!(!moved);
}

#[tokio::test]
async fn test_fulfillment_update_is_guarded_by_current_status() {
    let store = store(spawn_postgrest());
    assert!(store
        .update_fulfillment_status("p1", FulfillmentStatus::Pending, FulfillmentStatus::Completed)
        .await
        .unwrap());
    assert!(!store
        .update_fulfillment_status("p1", FulfillmentStatus::Partial, FulfillmentStatus::Completed)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_qualification_rpc_unwraps_single_row() {
    let store = store(spawn_postgrest());
    let result = store
        .check_tier_qualification(&QualificationQuery {
            user_id: "u1".into(),
            club_id: "club".into(),
            target_tier: "gold".into(),
            rolling_window_days: 60,
        })
        .await
        .unwrap();
    assert_eq!(result.effective_tier, "silver");
    assert_eq!(result.points_shortfall(), 60);
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let store = store(spawn_postgrest());
    let err = store
        .increment_campaign_progress(&"c1".into(), 100, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
    assert!(err.is_retryable());
}
