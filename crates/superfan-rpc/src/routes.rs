use crate::error::{handle_rejection, reject};
use crate::handlers;
use crate::state::AppState;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use superfan_auth::parse_bearer;
use superfan_core::UserId;
use warp::{Filter, Rejection, Reply};

const MAX_JSON_BYTES: u64 = 64 * 1024;

pub fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Caller identity from the bearer token
pub fn authenticated(state: AppState) -> impl Filter<Extract = (UserId,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_state(state))
        .and_then(|header: Option<String>, state: AppState| async move {
            let token = parse_bearer(header.as_deref()).map_err(reject)?;
            state.tokens.verify(token).map_err(reject)
        })
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_JSON_BYTES).and(warp::body::json())
}

/// Every route, without error rendering
pub fn api(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let auth = authenticated(state.clone());

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::health);

    let credits = warp::path!("api" / "credits" / "purchase")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::purchase_credits);

    let cart = warp::path!("api" / "campaigns" / "cart-checkout")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::cart_checkout);

    let usdc = warp::path!("api" / "campaigns" / "usdc-purchase")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::usdc_purchase);

    let progress = warp::path!("api" / "campaigns" / String / "progress")
        .and(warp::get())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::campaign_progress);

    let presale = warp::path!("api" / "campaigns" / String / "presale")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::create_presale);

    let fail = warp::path!("api" / "campaigns" / String / "fail")
        .and(warp::post())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::fail_campaign);

    let metal = warp::path!("api" / "metal" / "purchase-item")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::metal_purchase);

    let upgrade = warp::path!("api" / "tiers" / "upgrade")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::tier_upgrade);

    let qualification = warp::path!("api" / "tiers" / "qualification")
        .and(warp::get())
        .and(warp::query::<handlers::QualificationParams>())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(handlers::tier_qualification);

    let confirm = warp::path!("api" / "stripe" / "confirm")
        .and(warp::post())
        .and(auth)
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::stripe_confirm);

    // Authenticated by signature, not by bearer token
    let webhook = warp::path!("api" / "stripe" / "webhook")
        .and(warp::post())
        .and(warp::header::optional::<String>("stripe-signature"))
        .and(warp::body::content_length_limit(MAX_JSON_BYTES * 4))
        .and(warp::body::bytes())
        .and(with_state(state))
        .and_then(handlers::stripe_webhook);

    health
        .or(credits)
        .or(cart)
        .or(usdc)
        .or(progress)
        .or(presale)
        .or(fail)
        .or(metal)
        .or(upgrade)
        .or(qualification)
        .or(confirm)
        .or(webhook)
}

/// The full server: routes, error envelope and access log
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let environment = state.environment;
    api(state)
        .recover(move |err: Rejection| handle_rejection(err, environment))
        .with(warp::log("superfan_rpc"))
}

