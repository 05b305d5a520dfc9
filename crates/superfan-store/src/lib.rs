//! Database access for Superfan.
//!
//! The relational schema and its stored procedures live in a managed
//! Postgres instance. This crate is the typed boundary to it: every table
//! and procedure the payment flows touch is a method on [`Store`].

pub mod contract;
pub mod memory;
pub mod rest;

pub use contract::{
    CreditBalance, CreditGrant, PointsAward, PointsBalance, QualificationQuery,
    QualificationResult, Store, StoreError,
};
pub use memory::{MemoryStore, StoreOp};
pub use rest::{RestStore, RestStoreConfig};
