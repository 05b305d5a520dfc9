use thiserror::Error;

/// Failure talking to a payment provider
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Provider request timed out")]
    Timeout,
    #[error("Provider unreachable: {0}")]
    Network(String),
    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },
    #[error("Malformed provider response: {0}")]
    Decode(String),
    #[error("Invalid payment request: {0}")]
    InvalidRequest(String),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Timeout | PaymentError::Network(_) => true,
            PaymentError::Provider { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PaymentError::Timeout
        } else if err.is_decode() {
            PaymentError::Decode(err.to_string())
        } else {
            PaymentError::Network(err.to_string())
        }
    }
}

/// Why a payment proof was refused
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("transaction reverted")]
    TransactionFailed,
    #[error("transaction targets contract {actual}, expected {expected}")]
    WrongTokenContract { expected: String, actual: String },
    #[error("no transfer to the receiving wallet in transaction")]
    NoTransferToRecipient,
    #[error("amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch { expected: String, actual: String },
    #[error("transaction not found in holder history")]
    TransactionNotFound,
    #[error("unexpected transaction status {0}")]
    UnexpectedStatus(String),
    #[error("payment not completed (status {0})")]
    NotPaid(String),
}

/// Outcome of checking a payment proof
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// Input can never verify; no network call was made
    #[error("Malformed transaction hash: {0}")]
    MalformedHash(String),
    /// Not visible yet; retry shortly
    #[error("Payment not confirmed yet: {0}")]
    Pending(String),
    #[error("Payment rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("Verification unavailable: {0}")]
    Upstream(PaymentError),
}

impl VerificationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            VerificationError::Pending(_) => true,
            VerificationError::Upstream(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<PaymentError> for VerificationError {
    fn from(err: PaymentError) -> Self {
        VerificationError::Upstream(err)
    }
}
