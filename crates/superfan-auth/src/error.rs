use superfan_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingToken,
    #[error("Authorization header is not a bearer token")]
    MalformedHeader,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Token expired")]
    Expired,
    #[error("Not an admin of club {0}")]
    Forbidden(String),
    #[error("Could not issue token: {0}")]
    Issue(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// 401 for identity problems, 403 for missing rights
    pub fn is_forbidden(&self) -> bool {
        matches!(self, AuthError::Forbidden(_))
    }
}
