//! Lightning backend
//!
//! The mint drives payments through this capability trait; the node behind
//! it is out of scope.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use lightning_invoice::Bolt11Invoice;
use thiserror::Error;

use crate::nuts::{CurrencyUnit, MeltQuoteState};
use crate::Amount;

pub mod fake;

pub use fake::FakeLightning;

/// Lightning error
#[derive(Debug, Error)]
pub enum Error {
    /// Invoice has no amount
    #[error("Invoice amount undefined")]
    AmountUndefined,
    /// Payment definitely failed
    #[error("Payment failed: {0}")]
    PaymentFailed(String),
    /// Unit is not supported by the backend
    #[error("Unsupported unit")]
    UnsupportedUnit,
    /// Backend error
    #[error(transparent)]
    Lightning(Box<dyn std::error::Error + Send + Sync>),
}

/// Response from creating an invoice
#[derive(Debug, Clone)]
pub struct CreateInvoiceResponse {
    /// Id the backend uses to look the payment up, the payment hash for
    /// bolt11
    pub request_lookup_id: String,
    /// Invoice to be paid
    pub request: Bolt11Invoice,
    /// Unix expiry of the invoice
    pub expiry: Option<u64>,
}

/// Response from paying an invoice
#[derive(Debug, Clone)]
pub struct PayInvoiceResponse {
    /// Id the backend uses to look the payment up
    pub payment_lookup_id: String,
    /// Proof of payment
    pub payment_preimage: Option<String>,
    /// Outcome of the attempt; `Pending` when the backend cannot say
    pub status: MeltQuoteState,
    /// Total spent including routing fees
    pub total_spent: Amount,
}

/// Capability the mint requires from a Lightning node
#[async_trait]
pub trait MintLightning: Debug {
    /// Create an invoice to be paid towards the mint
    async fn create_invoice(
        &self,
        amount: Amount,
        unit: &CurrencyUnit,
        description: String,
        unix_expiry: u64,
    ) -> Result<CreateInvoiceResponse, Error>;

    /// Pay a bolt11 invoice, a single bounded attempt
    ///
    /// An ambiguous outcome must be reported as `Pending`, never as failed.
    async fn pay_invoice(
        &self,
        bolt11: Bolt11Invoice,
        max_fee: Option<Amount>,
        timeout: Duration,
    ) -> Result<PayInvoiceResponse, Error>;

    /// Whether the invoice behind a lookup id has been settled
    async fn invoice_settled(&self, request_lookup_id: &str) -> Result<bool, Error>;

    /// Fee to reserve for paying out `amount`
    fn fee_reserve(&self, amount: Amount) -> Amount;
}
