//! Payment rails against local provider stand-ins

use parking_lot::Mutex;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use std::net::SocketAddr;
use std::sync::Arc;
use superfan_core::{IdempotencyKey, KeyFields};
use superfan_payments::{
    CheckoutProvider, CheckoutRequest, EvmTransferVerifier, LineItem, MetalClient, MetalConfig,
    PresaleProvider, PresaleSpec, StripeClient, StripeConfig, TransferVerifier, TxHash, UsdcConfig,
    VerificationError, TRANSFER_TOPIC,
};
use warp::http::StatusCode;
use warp::Filter;

/// Requests seen by a mock server
#[derive(Clone, Default)]
struct Recorded(Arc<Mutex<Vec<String>>>);

impl Recorded {
    fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    fn all(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

const TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
const WALLET: &str = "0x1111111111111111111111111111111111111111";
const PAYER: &str = "0x2222222222222222222222222222222222222222";

macro_rules! serve {
    ($routes:expr) => {{
        let (addr, server) = warp::serve($routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }};
}

#[test]
fn test_transfer_topic_is_keccak_of_event_signature() {
    let digest = Keccak256::digest(b"Transfer(address,address,uint256)");
    assert_eq!(format!("0x{}", hex::encode(digest)), TRANSFER_TOPIC);
}

fn stripe_config(addr: SocketAddr) -> StripeConfig {
    StripeConfig {
        secret_key: "sk_test_123".into(),
        webhook_secret: "whsec_test".into(),
        api_base: format!("http://{}/v1", addr),
        success_url: "https://app.example/ok".into(),
        cancel_url: "https://app.example/cancel".into(),
        currency: "usd".into(),
        webhook_tolerance_secs: 300,
        timeout_secs: 5,
    }
}

#[tokio::test]
async fn test_checkout_sends_idempotency_key_and_parses_session() {
    let seen = Recorded::default();
    let log = seen.clone();
    let routes = warp::path!("v1" / "checkout" / "sessions")
        .and(warp::post())
        .and(warp::header::<String>("idempotency-key"))
        .and(warp::header::<String>("authorization"))
        .and(warp::body::form::<Vec<(String, String)>>())
        .map(move |key: String, auth: String, form: Vec<(String, String)>| {
            log.push(key);
            assert_eq!(auth, "Bearer sk_test_123");
            let amount = form
                .iter()
                .find(|(k, _)| k == "line_items[0][price_data][unit_amount]")
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            warp::reply::json(&json!({
                "id": "cs_test_1",
                "url": "https://checkout.stripe.com/c/pay/cs_test_1",
                "amount_total": amount.parse::<i64>().unwrap_or(0) * 2,
                "currency": "usd",
                "payment_status": "unpaid",
                "status": "open"
            }))
        });
    let stripe = StripeClient::new(stripe_config(serve!(routes))).unwrap();

    let key = IdempotencyKey::derive("cart_checkout", &KeyFields::new().field("n", 1)).unwrap();
    let request = CheckoutRequest {
        line_items: vec![LineItem { name: "Gold".into(), unit_amount_cents: 2_500, quantity: 2 }],
        client_reference_id: "user-1".into(),
        metadata: Default::default(),
    };
    let session = stripe.create_checkout_session(&request, &key).await.unwrap();
    assert_eq!(session.id, "cs_test_1");
    assert_eq!(session.amount_total, Some(5_000));
    assert!(!session.is_paid());
    assert_eq!(seen.all(), vec![key.as_str().to_string()]);
}

#[tokio::test]
async fn test_stripe_server_error_is_retryable() {
    let routes = warp::path!("v1" / "checkout" / "sessions" / String).map(|_id: String| {
        warp::reply::with_status(
            warp::reply::json(&json!({ "error": { "message": "api unavailable" } })),
            StatusCode::BAD_GATEWAY,
        )
    });
    let stripe = StripeClient::new(stripe_config(serve!(routes))).unwrap();
    let err = stripe.retrieve_session("cs_test_1").await.unwrap_err();
    assert!(err.is_retryable());
}

fn receipt_json(units: u128) -> Value {
    json!({
        "transactionHash": format!("0x{}", "ab".repeat(32)),
        "status": "0x1",
        "from": PAYER,
        "to": TOKEN,
        "blockNumber": "0x10",
        "logs": [{
            "address": TOKEN,
            "topics": [
                TRANSFER_TOPIC,
                format!("0x{:0>64}", &PAYER[2..]),
                format!("0x{:0>64}", &WALLET[2..]),
            ],
            "data": format!("0x{:064x}", units),
        }]
    })
}

fn spawn_rpc(calls: Recorded) -> SocketAddr {
    let routes = warp::post()
        .and(warp::body::json())
        .map(move |body: Value| {
            assert_eq!(body["method"], "eth_getTransactionReceipt");
            let hash = body["params"][0].as_str().unwrap_or_default().to_string();
            calls.push(hash.clone());
            let result = if hash.ends_with("ab") {
                receipt_json(25_000_000)
            } else {
                Value::Null
            };
            warp::reply::json(&json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
        });
    serve!(routes)
}

fn usdc_verifier(addr: SocketAddr) -> EvmTransferVerifier {
    EvmTransferVerifier::new(&UsdcConfig {
        rpc_url: format!("http://{}", addr),
        token_contract: TOKEN.into(),
        receiving_wallet: WALLET.into(),
        decimals: 6,
        rpc_timeout_secs: 5,
    })
    .unwrap()
}

#[tokio::test]
async fn test_usdc_receipt_verifies_exact_amount() {
    let calls = Recorded::default();
    let verifier = usdc_verifier(spawn_rpc(calls.clone()));
    let hash = TxHash::parse(&format!("0x{}", "ab".repeat(32))).unwrap();

    let transfer = verifier.verify_transfer(&hash, 2_500).await.unwrap();
    assert_eq!(transfer.amount_units, 25_000_000);

    // $25.01 expected, $25.00 sent
    let err = verifier.verify_transfer(&hash, 2_501).await.unwrap_err();
    assert!(matches!(err, VerificationError::Rejected(_)));
    assert!(!err.is_retryable());
    assert_eq!(calls.all().len(), 2);
}

#[tokio::test]
async fn test_unmined_receipt_is_pending() {
    let verifier = usdc_verifier(spawn_rpc(Recorded::default()));
    let hash = TxHash::parse(&format!("0x{}", "cd".repeat(32))).unwrap();
    let err = verifier.verify_transfer(&hash, 2_500).await.unwrap_err();
    assert!(matches!(err, VerificationError::Pending(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_rpc_is_retryable() {
    // Bind then drop to get a port nobody listens on
    let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let verifier = usdc_verifier(addr);
    let hash = TxHash::parse(&format!("0x{}", "ab".repeat(32))).unwrap();
    let err = verifier.verify_transfer(&hash, 2_500).await.unwrap_err();
    assert!(matches!(err, VerificationError::Upstream(_)));
    assert!(err.is_retryable());
}

fn spawn_metal(resolved: Recorded) -> SocketAddr {
    let history = warp::path!("holder" / String / "transactions")
        .and(warp::get())
        .and(warp::header::<String>("x-api-key"))
        .map(|_holder: String, _key: String| {
            warp::reply::json(&json!({
                "transactions": [
                    { "transactionHash": "0xAAA", "amount": 25.0, "status": "completed" },
                    { "transactionHash": "0xbbb", "amount": 10.0, "status": "pending" }
                ]
            }))
        });
    let create = warp::path!("presales")
        .and(warp::post())
        .and(warp::body::json())
        .map(|body: Value| {
            assert_eq!(body["price"], 0.5);
            warp::reply::json(&json!({ "id": "presale-1", "status": "active" }))
        });
    let resolve = warp::path!("presales" / String / "resolve")
        .and(warp::post())
        .map(move |id: String| {
            resolved.push(id);
            warp::reply::json(&json!({ "ok": true }))
        });
    serve!(history.or(create).or(resolve))
}

#[tokio::test]
async fn test_metal_history_create_and_resolve() {
    let resolved = Recorded::default();
    let addr = spawn_metal(resolved.clone());
    let metal = MetalClient::new(&MetalConfig {
        api_base: format!("http://{}", addr),
        api_key: "metal-key".into(),
        timeout_secs: 5,
        amount_tolerance: 1e-6,
    })
    .unwrap();

    let found = metal.find_holder_transaction("holder-1", "0xaaa").await.unwrap();
    assert_eq!(found.map(|tx| tx.amount), Some(25.0));
    assert!(metal.find_holder_transaction("holder-1", "0xccc").await.unwrap().is_none());

    let presale = metal
        .create_presale(&PresaleSpec {
            name: "Tour presale".into(),
            token_address: TOKEN.into(),
            price_per_token: 500_000,
            total_supply: Some(1_000),
        })
        .await
        .unwrap();
    assert_eq!(presale.id, "presale-1");

    metal.resolve_presale(&presale.id).await.unwrap();
    assert_eq!(resolved.all(), vec!["presale-1".to_string()]);
}
