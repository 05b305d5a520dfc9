/// ON-CHAIN USDC VERIFICATION
///
/// A USDC purchase is proven by a transaction hash. The receipt must be a
/// success, carry an ERC-20 `Transfer` log emitted by the configured token
/// contract, name our receiving wallet as recipient, and move exactly the
/// expected number of base units. Anything else is a rejection; a receipt
/// that is not mined yet is pending.

use crate::error::{PaymentError, Rejection, VerificationError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use superfan_core::money::cents_to_token_units;
use tracing::{debug, info, warn};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

const RECEIPT_SUCCESS: &str = "0x1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsdcConfig {
    pub rpc_url: String,
    pub token_contract: String,
    pub receiving_wallet: String,
    pub decimals: u8,
    pub rpc_timeout_secs: u64,
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// 32-byte transaction hash, normalized to lowercase `0x…`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(raw: &str) -> Result<Self, VerificationError> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| VerificationError::MalformedHash(raw.to_string()))?;
        if body.len() != 64 || !is_hex(body) {
            return Err(VerificationError::MalformedHash(raw.to_string()));
        }
        Ok(TxHash(format!("0x{}", body.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 20-byte account address, lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, PaymentError> {
        let body = raw
            .trim()
            .strip_prefix("0x")
            .filter(|b| b.len() == 40 && is_hex(b))
            .ok_or_else(|| PaymentError::InvalidRequest(format!("invalid address {}", raw)))?;
        Ok(Address(format!("0x{}", body.to_ascii_lowercase())))
    }

    /// Address packed into an indexed log topic (left-padded to 32 bytes)
    fn from_topic(topic: &str) -> Option<Self> {
        let body = topic.strip_prefix("0x")?;
        if body.len() != 64 || !is_hex(body) {
            return None;
        }
        Some(Address(format!("0x{}", body[24..].to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

/// The receipt fields `eth_getTransactionReceipt` returns that matter here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    pub status: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub logs: Vec<ReceiptLog>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferExpectation {
    pub token_contract: Address,
    pub recipient: Address,
    pub amount_units: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedTransfer {
    pub tx_hash: String,
    pub payer: Option<String>,
    pub amount_units: u128,
    pub block_number: Option<String>,
}

/// uint256 log data; values beyond u128 cannot equal any expected amount
fn decode_amount(data: &str) -> Option<u128> {
    let body = data.strip_prefix("0x")?;
    if body.len() != 64 || !is_hex(body) {
        return None;
    }
    let (high, low) = body.split_at(32);
    if high.bytes().any(|b| b != b'0') {
        return None;
    }
    u128::from_str_radix(low, 16).ok()
}

/// Checks a mined receipt against what the purchase should have paid
pub fn verify_receipt(receipt: &Receipt, expected: &TransferExpectation) -> Result<VerifiedTransfer, Rejection> {
    if receipt.status != RECEIPT_SUCCESS {
        return Err(Rejection::TransactionFailed);
    }

    let transfers: Vec<&ReceiptLog> = receipt
        .logs
        .iter()
        .filter(|log| log.topics.len() == 3 && log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC))
        .collect();

    let from_token: Vec<&ReceiptLog> = transfers
        .iter()
        .copied()
        .filter(|log| log.address.eq_ignore_ascii_case(expected.token_contract.as_str()))
        .collect();
    if from_token.is_empty() {
        return match transfers.first() {
            Some(other) => Err(Rejection::WrongTokenContract {
                expected: expected.token_contract.to_string(),
                actual: other.address.to_ascii_lowercase(),
            }),
            None => Err(Rejection::NoTransferToRecipient),
        };
    }

    let to_us: Vec<&ReceiptLog> = from_token
        .into_iter()
        .filter(|log| Address::from_topic(&log.topics[2]).as_ref() == Some(&expected.recipient))
        .collect();
    if to_us.is_empty() {
        return Err(Rejection::NoTransferToRecipient);
    }

    match to_us
        .iter()
        .find(|log| decode_amount(&log.data) == Some(expected.amount_units))
    {
        Some(log) => Ok(VerifiedTransfer {
            tx_hash: receipt.transaction_hash.to_ascii_lowercase(),
            payer: Address::from_topic(&log.topics[1]).map(|a| a.to_string()),
            amount_units: expected.amount_units,
            block_number: receipt.block_number.clone(),
        }),
        None => Err(Rejection::AmountMismatch {
            expected: expected.amount_units.to_string(),
            actual: to_us[0].data.clone(),
        }),
    }
}

#[async_trait]
pub trait TransferVerifier: Send + Sync {
    async fn verify_transfer(&self, hash: &TxHash, amount_cents: u64) -> Result<VerifiedTransfer, VerificationError>;
}

/// Reads receipts over Ethereum JSON-RPC
pub struct EvmTransferVerifier {
    client: Client,
    rpc_url: String,
    token_contract: Address,
    recipient: Address,
    decimals: u8,
}

impl EvmTransferVerifier {
    pub fn new(config: &UsdcConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_secs.max(1)))
            .build()?;
        Ok(EvmTransferVerifier {
            client,
            rpc_url: config.rpc_url.clone(),
            token_contract: Address::parse(&config.token_contract)?,
            recipient: Address::parse(&config.receiving_wallet)?,
            decimals: config.decimals,
        })
    }

    pub fn expectation(&self, amount_cents: u64) -> Result<TransferExpectation, PaymentError> {
        let amount_units = cents_to_token_units(amount_cents, self.decimals)
            .map_err(|e| PaymentError::InvalidRequest(e.to_string()))?;
        Ok(TransferExpectation {
            token_contract: self.token_contract.clone(),
            recipient: self.recipient.clone(),
            amount_units,
        })
    }

    async fn fetch_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>, PaymentError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_getTransactionReceipt",
            "params": [hash.as_str()],
        });
        let response = self.client.post(&self.rpc_url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PaymentError::Provider {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        let body: Value = response.json().await?;
        if let Some(err) = body.get("error") {
            return Err(PaymentError::Provider {
                status: 502,
                message: err["message"].as_str().unwrap_or("rpc error").to_string(),
            });
        }
        match body.get("result") {
            None | Some(Value::Null) => Ok(None),
            Some(result) => serde_json::from_value(result.clone())
                .map(Some)
                .map_err(|e| PaymentError::Decode(e.to_string())),
        }
    }
}

#[async_trait]
impl TransferVerifier for EvmTransferVerifier {
    async fn verify_transfer(&self, hash: &TxHash, amount_cents: u64) -> Result<VerifiedTransfer, VerificationError> {
        let expected = self.expectation(amount_cents)?;
        debug!(tx = %hash, units = expected.amount_units, "fetching receipt");
        let receipt = self
            .fetch_receipt(hash)
            .await?
            .ok_or_else(|| VerificationError::Pending(format!("no receipt for {}", hash)))?;
        match verify_receipt(&receipt, &expected) {
            Ok(transfer) => {
                info!(tx = %hash, units = transfer.amount_units, "usdc transfer verified");
                Ok(transfer)
            }
            Err(rejection) => {
                warn!(tx = %hash, %rejection, "usdc transfer rejected");
                Err(rejection.into())
            }
        }
    }
}
