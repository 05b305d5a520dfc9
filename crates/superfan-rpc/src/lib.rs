//! HTTP JSON API for Superfan.
//!
//! Routes are warp filters over a shared [`AppState`]. Handlers stay thin:
//! they authenticate, call the reconciliation engine and serialize the
//! result. Every failure is rendered as the same JSON envelope by
//! [`error::handle_rejection`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::AppConfig;
pub use error::{ApiError, ErrorEnvelope};
pub use routes::routes;
pub use state::AppState;
