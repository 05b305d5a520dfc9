use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use superfan_auth::{AuthError, Environment};
use superfan_economics::EconomicsError;
use superfan_payments::{VerificationError, WebhookError};
use tracing::{error, warn};
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::Rejection;

const GENERIC_INTERNAL: &str = "Internal server error";

/// Body of every error response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_manual_resolution: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presale_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub envelope: ErrorEnvelope,
}

impl Reject for ApiError {}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            envelope: ErrorEnvelope {
                error: message.into(),
                code: code.to_string(),
                fields: None,
                retryable: None,
                requires_manual_resolution: None,
                presale_id: None,
            },
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), message.clone());
        let mut err = ApiError::new(StatusCode::BAD_REQUEST, "validation_error", message);
        err.envelope.fields = Some(fields);
        err
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.envelope.retryable = Some(retryable);
        self
    }

    /// The presale exists at the provider but is linked to nothing
    pub fn manual_resolution(presale_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut err = ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "requires_manual_resolution",
            reason,
        );
        err.envelope.requires_manual_resolution = Some(true);
        err.envelope.presale_id = Some(presale_id.into());
        err
    }

    fn is_internal(&self) -> bool {
        self.status == StatusCode::INTERNAL_SERVER_ERROR && self.envelope.requires_manual_resolution.is_none()
    }

    pub fn reply(self, environment: Environment) -> warp::reply::WithStatus<warp::reply::Json> {
        if self.status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(code = %self.envelope.code, error = %self.envelope.error, "request failed");
        }
        let hide = environment != Environment::Development && self.is_internal();
        let mut envelope = self.envelope;
        if hide {
            envelope.error = GENERIC_INTERNAL.to_string();
        }
        warp::reply::with_status(warp::reply::json(&envelope), self.status)
    }
}

impl From<EconomicsError> for ApiError {
    fn from(err: EconomicsError) -> Self {
        let retryable = err.is_retryable();
        match err {
            EconomicsError::Validation { field, message } => ApiError::validation(&field, message),
            EconomicsError::NotFound(what) => ApiError::new(StatusCode::NOT_FOUND, "not_found", format!("{} not found", what)),
            EconomicsError::Conflict(message) => ApiError::new(StatusCode::CONFLICT, "conflict", message),
            EconomicsError::Verification(VerificationError::MalformedHash(hash)) => {
                ApiError::validation("tx_hash", format!("malformed transaction hash: {}", hash))
            }
            EconomicsError::Verification(VerificationError::Rejected(reason)) => {
                ApiError::new(StatusCode::BAD_REQUEST, "verification_failed", reason.to_string()).retryable(false)
            }
            EconomicsError::Verification(e) if retryable => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "verification_pending", e.to_string()).retryable(true)
            }
            other if retryable => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", other.to_string()).retryable(true)
            }
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Forbidden(_) => ApiError::new(StatusCode::FORBIDDEN, "forbidden", err.to_string()),
            AuthError::Store(e) if e.is_retryable() => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", e.to_string()).retryable(true)
            }
            AuthError::Store(e) => ApiError::internal(e.to_string()),
            AuthError::Issue(e) => ApiError::internal(e),
            other => ApiError::unauthorized(other.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidSecret => ApiError::internal(err.to_string()),
            WebhookError::Payload(_) => ApiError::new(StatusCode::BAD_REQUEST, "invalid_payload", err.to_string()),
            other => ApiError::new(StatusCode::BAD_REQUEST, "invalid_signature", other.to_string()),
        }
    }
}

pub fn reject(err: impl Into<ApiError>) -> Rejection {
    warp::reject::custom(err.into())
}

/// Render any rejection as the JSON envelope
pub async fn handle_rejection(err: Rejection, environment: Environment) -> Result<impl warp::Reply, Infallible> {
    let api = if let Some(api) = err.find::<ApiError>() {
        api.clone()
    } else if err.is_not_found() {
        ApiError::new(StatusCode::NOT_FOUND, "not_found", "Endpoint not found")
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        ApiError::new(StatusCode::BAD_REQUEST, "invalid_body", format!("Invalid request body: {}", e))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        ApiError::new(StatusCode::BAD_REQUEST, "invalid_query", e.to_string())
    } else if let Some(e) = err.find::<warp::reject::MissingHeader>() {
        ApiError::new(StatusCode::BAD_REQUEST, "missing_header", e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", "Payload too large")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        ApiError::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type", "Expected application/json")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "Method not allowed")
    } else {
        warn!(rejection = ?err, "unhandled rejection");
        ApiError::internal("unhandled rejection")
    };
    Ok(api.reply(environment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use superfan_payments::{PaymentError, Rejection as PaymentRejection};

    #[test]
    fn test_economics_errors_map_to_statuses() {
        let cases = [
            (EconomicsError::validation("credits", "must be positive"), StatusCode::BAD_REQUEST),
            (EconomicsError::NotFound("campaign c1".into()), StatusCode::NOT_FOUND),
            (EconomicsError::Conflict("sold out".into()), StatusCode::CONFLICT),
            (
                EconomicsError::Verification(VerificationError::MalformedHash("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                EconomicsError::Verification(VerificationError::Pending("no receipt".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (EconomicsError::Payment(PaymentError::Timeout), StatusCode::SERVICE_UNAVAILABLE),
            (
                EconomicsError::Payment(PaymentError::InvalidRequest("bad".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_rejected_payment_is_not_retryable() {
        let api = ApiError::from(EconomicsError::from(PaymentRejection::TransactionFailed));
        assert_eq!(api.envelope.code, "verification_failed");
        assert_eq!(api.envelope.retryable, Some(false));
    }

    #[test]
    fn test_validation_carries_field() {
        let api = ApiError::from(EconomicsError::validation("items[0].quantity", "must be 1..=100"));
        let fields = api.envelope.fields.unwrap();
        assert_eq!(fields["items[0].quantity"], "must be 1..=100");
    }

    #[test]
    fn test_internal_is_internal() {
        assert!(ApiError::internal("boom").is_internal());
        assert!(!ApiError::manual_resolution("p1", "orphaned").is_internal());
    }
}
