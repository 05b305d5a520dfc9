use superfan_core::{IdempotencyError, MoneyError, PresaleError};
use superfan_payments::{PaymentError, Rejection, VerificationError};
use superfan_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EconomicsError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("Payment provider error: {0}")]
    Payment(#[from] PaymentError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EconomicsError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EconomicsError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Same request may succeed if retried unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            EconomicsError::Verification(e) => e.is_retryable(),
            EconomicsError::Payment(e) => e.is_retryable(),
            EconomicsError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<IdempotencyError> for EconomicsError {
    fn from(err: IdempotencyError) -> Self {
        EconomicsError::validation("idempotency_key", err.to_string())
    }
}

impl From<Rejection> for EconomicsError {
    fn from(err: Rejection) -> Self {
        EconomicsError::Verification(VerificationError::Rejected(err))
    }
}

impl From<MoneyError> for EconomicsError {
    fn from(err: MoneyError) -> Self {
        EconomicsError::validation("amount", err.to_string())
    }
}

impl From<PresaleError> for EconomicsError {
    fn from(err: PresaleError) -> Self {
        match err {
            PresaleError::SupplyExceeded { .. } => EconomicsError::Conflict(err.to_string()),
            other => EconomicsError::validation("amount", other.to_string()),
        }
    }
}
