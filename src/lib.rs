//! Superfan backend.
//!
//! Fans buy campaign tickets, club credits and tier upgrades with a card
//! (Stripe), with USDC on-chain, or through a Metal presale. Every rail
//! is reconciled through one idempotent pipeline: verify the payment,
//! persist the purchase exactly once, then apply its side effects.
//!
//! The crates are re-exported here under short names.

pub use superfan_auth as auth;
pub use superfan_core as types;
pub use superfan_economics as economics;
pub use superfan_payments as payments;
pub use superfan_rpc as rpc;
pub use superfan_store as store;
