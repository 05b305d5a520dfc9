/// IDEMPOTENCY KEYS
///
/// A key is derived from the fields that make two requests the "same"
/// purchase: who pays, for which club, which items. Timestamps and other
/// request-local values never take part, so a client retry lands on the
/// same key and the payment provider / uniqueness constraint absorbs it.

use crate::types::{CartItem, ClubId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Hex characters of the digest kept in a derived key
pub const KEY_DIGEST_HEX_LEN: usize = 32;

pub const MIN_CLIENT_KEY_LEN: usize = 8;
pub const MAX_CLIENT_KEY_LEN: usize = 255;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdempotencyError {
    #[error("Idempotency key must be {MIN_CLIENT_KEY_LEN}-{MAX_CLIENT_KEY_LEN} characters, got {0}")]
    InvalidLength(usize),
    #[error("Idempotency key contains invalid character {0:?}")]
    InvalidCharacter(char),
    #[error("Idempotency scope must be non-empty lowercase ascii")]
    InvalidScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive `<scope>_<digest>` from the significant request fields
    pub fn derive(scope: &str, fields: &KeyFields) -> Result<Self, IdempotencyError> {
        if scope.is_empty()
            || !scope
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(IdempotencyError::InvalidScope);
        }

        let mut hasher = Sha256::new();
        hasher.update(scope.as_bytes());
        hasher.update(b"\n");
        hasher.update(fields.canonical_bytes());
        let digest = hex::encode(hasher.finalize());

        Ok(IdempotencyKey(format!(
            "{}_{}",
            scope,
            &digest[..KEY_DIGEST_HEX_LEN]
        )))
    }

    /// Accept a key generated by the client
    pub fn from_client(raw: &str) -> Result<Self, IdempotencyError> {
        let len = raw.chars().count();
        if !(MIN_CLIENT_KEY_LEN..=MAX_CLIENT_KEY_LEN).contains(&len) {
            return Err(IdempotencyError::InvalidLength(len));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-')))
        {
            return Err(IdempotencyError::InvalidCharacter(bad));
        }
        Ok(IdempotencyKey(raw.to_string()))
    }

    /// Client key when present, otherwise one derived from `fields`
    pub fn resolve(client: Option<&str>, scope: &str, fields: &KeyFields) -> Result<Self, IdempotencyError> {
        match client {
            Some(raw) => Self::from_client(raw),
            None => Self::derive(scope, fields),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Items in a stable order, ties broken on every optional field
pub fn canonical_cart(items: &[CartItem]) -> Vec<CartItem> {
    let mut sorted = items.to_vec();
    sorted.sort();
    sorted
}

/// The fields a key is derived from
#[derive(Debug, Clone, Default)]
pub struct KeyFields {
    fields: BTreeMap<String, Value>,
}

impl KeyFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(self, user: &UserId) -> Self {
        self.field("user_id", user.as_str())
    }

    pub fn club(self, club: &ClubId) -> Self {
        self.field("club_id", club.as_str())
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn items(self, items: &[CartItem]) -> Self {
        let canonical: Vec<Value> = canonical_cart(items)
            .into_iter()
            .map(|item| {
                json!([
                    item.tier_id,
                    item.quantity,
                    item.variant,
                    item.note,
                ])
            })
            .collect();
        self.field("items", Value::Array(canonical))
    }

    /// Deterministic serialization: sorted field names, canonical items
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.fields {
            out.extend_from_slice(name.as_bytes());
            out.push(b'=');
            out.extend_from_slice(value.to_string().as_bytes());
            out.push(b'\n');
        }
        out
    }
}
