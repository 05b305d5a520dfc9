//! Payment rails.
//!
//! Each rail answers one question: did this payment really happen, for
//! this amount, to us? Stripe answers through its session objects and
//! signed webhooks, USDC through transaction receipts, Metal through the
//! holder's transaction history.

pub mod error;
pub mod metal;
pub mod stripe;
pub mod usdc;
pub mod webhook;

pub use error::{PaymentError, Rejection, VerificationError};
pub use metal::{
    verify_holder_transaction, HolderTransaction, MetalClient, MetalConfig, Presale,
    PresaleProvider, PresaleSpec,
};
pub use stripe::{
    CheckoutProvider, CheckoutRequest, CheckoutSession, LineItem, Refund, StripeClient,
    StripeConfig,
};
pub use usdc::{
    verify_receipt, Address, EvmTransferVerifier, Receipt, ReceiptLog, TransferExpectation,
    TransferVerifier, TxHash, UsdcConfig, VerifiedTransfer, TRANSFER_TOPIC,
};
pub use webhook::{StripeEvent, WebhookError, WebhookVerifier};
