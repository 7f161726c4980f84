//! NUT-04: Mint tokens via bolt11
//!
//! <https://github.com/cashubtc/nuts/blob/main/04.md>

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::nut00::{BlindSignature, BlindedMessage, CurrencyUnit, PaymentMethod};
use super::nut01::{PublicKey, SecretKey};
use crate::Amount;

/// NUT04 Error
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown quote state
    #[error("Unknown quote state")]
    UnknownState,
    /// Amount overflow
    #[error("Amount overflow")]
    AmountOverflow,
    /// Quote signature invalid or missing
    #[error("Signature missing or invalid for locked quote")]
    SignatureMissingOrInvalid,
    /// NUT01 error
    #[error(transparent)]
    Nut01(#[from] super::nut01::Error),
}

/// Mint quote request [NUT-04]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuoteBolt11Request {
    /// Amount
    pub amount: Amount,
    /// Unit wallet would like to pay with
    pub unit: CurrencyUnit,
    /// Memo to create the invoice with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Pubkey the quote is locked to; the mint request must then carry a
    /// signature from the matching key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<PublicKey>,
}

/// Possible states of a mint quote
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteState {
    /// Quote has not been paid
    #[default]
    Unpaid,
    /// Quote has been paid and wallet can mint
    Paid,
    /// ecash issued for quote
    Issued,
}

impl fmt::Display for QuoteState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unpaid => write!(f, "UNPAID"),
            Self::Paid => write!(f, "PAID"),
            Self::Issued => write!(f, "ISSUED"),
        }
    }
}

impl FromStr for QuoteState {
    type Err = Error;

    fn from_str(state: &str) -> Result<Self, Self::Err> {
        match state {
            "UNPAID" => Ok(Self::Unpaid),
            "PAID" => Ok(Self::Paid),
            "ISSUED" => Ok(Self::Issued),
            _ => Err(Error::UnknownState),
        }
    }
}

/// Mint quote response [NUT-04]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuoteBolt11Response {
    /// Quote Id
    pub quote: String,
    /// Payment request to fulfil
    pub request: String,
    /// Quote State
    pub state: QuoteState,
    /// Unix timestamp until the quote is valid
    pub expiry: Option<u64>,
    /// Pubkey the quote is locked to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<PublicKey>,
}

/// Mint request [NUT-04]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintBolt11Request {
    /// Quote id
    pub quote: String,
    /// Outputs
    pub outputs: Vec<BlindedMessage>,
    /// Signature over the quote id and outputs, required for locked quotes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl MintBolt11Request {
    /// Total [`Amount`] of outputs
    pub fn total_amount(&self) -> Result<Amount, Error> {
        Amount::try_sum(
            self.outputs
                .iter()
                .map(|BlindedMessage { amount, .. }| *amount),
        )
        .map_err(|_| Error::AmountOverflow)
    }

    /// The message a locked quote commits to: quote id then every output
    /// `B_`
    fn msg_to_sign(&self) -> Vec<u8> {
        let mut msg = self.quote.clone().into_bytes();
        for output in &self.outputs {
            msg.extend(output.blinded_secret.to_hex().into_bytes());
        }
        msg
    }

    /// Sign the request with the secret key the quote was locked to
    pub fn sign(&mut self, secret_key: SecretKey) -> Result<(), Error> {
        let signature = secret_key.sign(&self.msg_to_sign())?;
        self.signature = Some(signature.to_string());
        Ok(())
    }

    /// Verify the signature against the quote pubkey
    pub fn verify_signature(&self, pubkey: PublicKey) -> Result<(), Error> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(Error::SignatureMissingOrInvalid)?;

        let signature = bitcoin::secp256k1::schnorr::Signature::from_str(signature)
            .map_err(|_| Error::SignatureMissingOrInvalid)?;

        pubkey
            .verify(&self.msg_to_sign(), &signature)
            .map_err(|_| Error::SignatureMissingOrInvalid)
    }
}

/// Mint response [NUT-04]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintBolt11Response {
    /// Blinded Signatures
    pub signatures: Vec<BlindSignature>,
}

/// Mint method settings
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MintMethodSettings {
    /// Payment method e.g. bolt11
    pub method: PaymentMethod,
    /// Currency unit e.g. sat
    pub unit: CurrencyUnit,
    /// Min amount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<Amount>,
    /// Max amount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Amount>,
    /// Whether quote requests may carry an invoice description
    #[serde(default)]
    pub description: bool,
}

/// Mint settings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Settings {
    /// Methods to mint
    pub methods: Vec<MintMethodSettings>,
    /// Minting disabled
    pub disabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let bolt11_mint = MintMethodSettings {
            method: PaymentMethod::Bolt11,
            unit: CurrencyUnit::Sat,
            min_amount: Some(Amount::from(1)),
            max_amount: Some(Amount::from(1000000)),
            description: true,
        };

        Settings {
            methods: vec![bolt11_mint],
            disabled: false,
        }
    }
}
