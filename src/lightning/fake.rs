//! In-process Lightning backend
//!
//! Issues real signed bolt11 invoices against a throwaway node key and
//! settles them on request. Used by the test suite and by anyone running a
//! mint without a node behind it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::hashes::sha256::Hash as Sha256Hash;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::rand::{self, RngCore};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use lightning_invoice::{Bolt11Invoice, Currency, InvoiceBuilder, PaymentSecret};
use tokio::sync::Mutex;

use super::{CreateInvoiceResponse, Error, MintLightning, PayInvoiceResponse};
use crate::nuts::{CurrencyUnit, MeltQuoteState};
use crate::util::hex;
use crate::Amount;
use async_trait::async_trait;

/// What the fake node reports for outgoing payments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayOutcome {
    /// Settle immediately
    #[default]
    Paid,
    /// Fail definitively
    Fail,
    /// Never resolve, the ambiguous case
    Pending,
}

/// Fake Lightning backend
#[derive(Debug, Clone)]
pub struct FakeLightning {
    node_key: SecretKey,
    settled: Arc<Mutex<HashSet<String>>>,
    outcome: Arc<Mutex<PayOutcome>>,
}

impl Default for FakeLightning {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLightning {
    /// Create new [`FakeLightning`]
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);

        Self {
            node_key: SecretKey::from_slice(&key).expect("32 random bytes"),
            settled: Arc::new(Mutex::new(HashSet::new())),
            outcome: Arc::new(Mutex::new(PayOutcome::Paid)),
        }
    }

    /// Mark an invoice as settled
    pub async fn settle_invoice(&self, request_lookup_id: &str) {
        self.settled
            .lock()
            .await
            .insert(request_lookup_id.to_string());
    }

    /// Set the outcome of future pay attempts
    pub async fn set_pay_outcome(&self, outcome: PayOutcome) {
        *self.outcome.lock().await = outcome;
    }
}

#[async_trait]
impl MintLightning for FakeLightning {
    async fn create_invoice(
        &self,
        amount: Amount,
        unit: &CurrencyUnit,
        description: String,
        unix_expiry: u64,
    ) -> Result<CreateInvoiceResponse, Error> {
        if unit != &CurrencyUnit::Sat {
            return Err(Error::UnsupportedUnit);
        }

        let mut preimage = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut preimage);

        let payment_hash = Sha256Hash::hash(&preimage);

        let secp = Secp256k1::new();
        let node_key = self.node_key;

        let invoice = InvoiceBuilder::new(Currency::Bitcoin)
            .description(description)
            .payment_hash(payment_hash)
            .payment_secret(PaymentSecret([42u8; 32]))
            .amount_milli_satoshis(u64::from(amount) * 1000)
            .current_timestamp()
            .min_final_cltv_expiry_delta(144)
            .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &node_key))
            .map_err(|e| Error::Lightning(e.to_string().into()))?;

        Ok(CreateInvoiceResponse {
            request_lookup_id: payment_hash.to_string(),
            request: invoice,
            expiry: Some(unix_expiry),
        })
    }

    async fn pay_invoice(
        &self,
        bolt11: Bolt11Invoice,
        _max_fee: Option<Amount>,
        _timeout: Duration,
    ) -> Result<PayInvoiceResponse, Error> {
        let amount_msat = bolt11
            .amount_milli_satoshis()
            .ok_or(Error::AmountUndefined)?;

        let payment_lookup_id = bolt11.payment_hash().to_string();

        match *self.outcome.lock().await {
            PayOutcome::Paid => {
                let mut preimage = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut preimage);

                self.settled
                    .lock()
                    .await
                    .insert(payment_lookup_id.clone());

                Ok(PayInvoiceResponse {
                    payment_lookup_id,
                    payment_preimage: Some(hex::encode(preimage)),
                    status: MeltQuoteState::Paid,
                    total_spent: Amount::from(amount_msat / 1000),
                })
            }
            PayOutcome::Fail => Err(Error::PaymentFailed("fake backend set to fail".to_string())),
            PayOutcome::Pending => Ok(PayInvoiceResponse {
                payment_lookup_id,
                payment_preimage: None,
                status: MeltQuoteState::Pending,
                total_spent: Amount::ZERO,
            }),
        }
    }

    async fn invoice_settled(&self, request_lookup_id: &str) -> Result<bool, Error> {
        Ok(self.settled.lock().await.contains(request_lookup_id))
    }

    fn fee_reserve(&self, amount: Amount) -> Amount {
        // 1% with a one unit floor
        std::cmp::max(Amount::from(u64::from(amount) / 100), Amount::from(1))
    }
}
