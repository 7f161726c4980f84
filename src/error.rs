//! Errors
//!
//! The crate error folds the module-local protocol errors together with the
//! operational failures of the wallet and mint engines. On the wire both
//! sides exchange an [`ErrorResponse`] of `{ code, detail }`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hex;

/// Chestnut error
#[derive(Debug, Error)]
pub enum Error {
    /// Selector cannot cover amount and fees
    #[error("Insufficient funds")]
    InsufficientFunds,
    /// Keyset is not known
    #[error("Unknown keyset")]
    UnknownKeySet,
    /// No active keyset for the unit
    #[error("No active keyset for unit")]
    NoActiveKeyset,
    /// Keyset is no longer signing new outputs
    #[error("Keyset is inactive")]
    InactiveKeyset,
    /// No key for amount in keyset
    #[error("No key for amount in keyset")]
    AmountKey,
    /// Amount overflow
    #[error("Amount overflow")]
    AmountOverflow,
    /// Quote is not known
    #[error("Unknown quote")]
    UnknownQuote,
    /// Quote has expired
    #[error("Quote expired at {0}, current time {1}")]
    ExpiredQuote(u64, u64),
    /// Operation requires the quote to be paid
    #[error("Quote is not paid")]
    UnpaidQuote,
    /// Quote is awaiting payment completion
    #[error("Quote is pending")]
    PendingQuote,
    /// Signatures have already been issued for the quote
    #[error("Quote has already been issued")]
    IssuedQuote,
    /// Quote has already been paid
    #[error("Quote is already paid")]
    PaidQuote,
    /// Proof is already spent
    #[error("Token already spent")]
    TokenAlreadySpent,
    /// Proof is locked to an in-flight operation
    #[error("Token is pending")]
    TokenPending,
    /// Proof could not be verified
    #[error("Token not verified")]
    TokenNotVerified,
    /// Blinded message was signed before
    #[error("Blinded message already signed")]
    BlindedMessageAlreadySigned,
    /// Same Y appears twice in a request
    #[error("Duplicate inputs provided")]
    DuplicateInputs,
    /// Same blinded message appears twice in a request
    #[error("Duplicate outputs provided")]
    DuplicateOutputs,
    /// Inputs or outputs of multiple units
    #[error("Multiple units in request")]
    MultipleUnits,
    /// Input unit does not match output unit
    #[error("Input unit does not match output unit")]
    UnitMismatch,
    /// Inputs do not cover outputs plus fee
    #[error("Transaction unbalanced: inputs {0}, outputs {1}, fee {2}")]
    TransactionUnbalanced(u64, u64, u64),
    /// SIG_ALL flagged inputs outside of swap
    #[error("SIG_ALL can only be used in swap")]
    SigAllOnlySwap,
    /// DLEQ verification failed on a received signature
    #[error("Could not verify DLEQ proof")]
    CouldNotVerifyDleq,
    /// Invoice has no amount
    #[error("Invoice amount undefined")]
    AmountlessInvoice,
    /// Lightning backend failed or timed out
    #[error("Payment failed")]
    PaymentFailed,
    /// Lightning backend outcome is unknown
    #[error("Payment state is pending")]
    PaymentPending,
    /// Receiving from a mint the wallet does not trust
    #[error("Untrusted mint: {0}")]
    UntrustedMint(String),
    /// Token does not belong to this wallet's mint
    #[error("Incorrect wallet: {0}")]
    IncorrectWallet(String),
    /// Transport failure, retryable
    #[error("Network error: {0}")]
    Network(String),
    /// Persistence failure, fatal to the current operation
    #[error(transparent)]
    Database(crate::database::Error),
    /// Lightning backend error
    #[error(transparent)]
    Lightning(#[from] crate::lightning::Error),
    /// Amount error
    #[error(transparent)]
    Amount(#[from] crate::amount::Error),
    /// Secret error
    #[error(transparent)]
    Secret(#[from] crate::secret::Error),
    /// DHKE error
    #[error(transparent)]
    Dhke(#[from] crate::dhke::Error),
    /// Mint url error
    #[error(transparent)]
    MintUrl(#[from] crate::mint_url::Error),
    /// NUT00 error
    #[error(transparent)]
    Nut00(#[from] crate::nuts::nut00::Error),
    /// NUT01 error
    #[error(transparent)]
    Nut01(#[from] crate::nuts::nut01::Error),
    /// NUT02 error
    #[error(transparent)]
    Nut02(#[from] crate::nuts::nut02::Error),
    /// NUT04 error
    #[error(transparent)]
    Nut04(#[from] crate::nuts::nut04::Error),
    /// NUT05 error
    #[error(transparent)]
    Nut05(#[from] crate::nuts::nut05::Error),
    /// NUT10 error
    #[error(transparent)]
    Nut10(#[from] crate::nuts::nut10::Error),
    /// NUT11 error
    #[error(transparent)]
    Nut11(#[from] crate::nuts::nut11::Error),
    /// NUT12 error
    #[error(transparent)]
    Nut12(#[from] crate::nuts::nut12::Error),
    /// NUT13 error
    #[error(transparent)]
    Nut13(#[from] crate::nuts::nut13::Error),
    /// NUT14 error
    #[error(transparent)]
    Nut14(#[from] crate::nuts::nut14::Error),
    /// Hex error
    #[error(transparent)]
    Hex(#[from] hex::Error),
    /// Bolt11 invoice error
    #[error(transparent)]
    Invoice(#[from] lightning_invoice::ParseOrSemanticError),
    /// Serde Json error
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Network-class errors are retryable and trigger cached-keyset
    /// fallback; protocol-class errors never do
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Numeric error codes exchanged on the wire
///
/// Everything without a reserved code maps to the standard bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Standard bucket (10000)
    Standard,
    /// Blinded message already signed (10002)
    BlindedMessageAlreadySigned,
    /// Proof could not be verified (10003)
    InvalidProof,
    /// Secret exceeds the allowed length (10004)
    SecretTooLong,
    /// Proof already used (11001)
    ProofAlreadyUsed,
    /// Unknown code
    Unknown(u16),
}

impl ErrorCode {
    /// Error code from u16
    pub fn from_code(code: u16) -> Self {
        match code {
            10000 => Self::Standard,
            10002 => Self::BlindedMessageAlreadySigned,
            10003 => Self::InvalidProof,
            10004 => Self::SecretTooLong,
            11001 => Self::ProofAlreadyUsed,
            _ => Self::Unknown(code),
        }
    }

    /// Error code to u16
    pub fn to_code(&self) -> u16 {
        match self {
            Self::Standard => 10000,
            Self::BlindedMessageAlreadySigned => 10002,
            Self::InvalidProof => 10003,
            Self::SecretTooLong => 10004,
            Self::ProofAlreadyUsed => 11001,
            Self::Unknown(code) => *code,
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u16(self.to_code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = u16::deserialize(deserializer)?;
        Ok(ErrorCode::from_code(code))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_code())
    }
}

/// Error body both sides return over the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code
    pub code: ErrorCode,
    /// Human readable detail
    pub detail: String,
}

impl ErrorResponse {
    /// Create new [`ErrorResponse`]
    pub fn new(code: ErrorCode, detail: String) -> Self {
        Self { code, detail }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code: {}, detail: {}", self.code, self.detail)
    }
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> ErrorResponse {
        let code = match err {
            // A request carrying the same Y twice is reported the same way
            // as a spent proof
            Error::TokenAlreadySpent | Error::DuplicateInputs => ErrorCode::ProofAlreadyUsed,
            Error::BlindedMessageAlreadySigned => ErrorCode::BlindedMessageAlreadySigned,
            Error::TokenNotVerified | Error::Dhke(_) => ErrorCode::InvalidProof,
            Error::Secret(crate::secret::Error::InvalidSecret) => ErrorCode::SecretTooLong,
            _ => ErrorCode::Standard,
        };

        ErrorResponse::new(code, err.to_string())
    }
}

impl From<ErrorResponse> for Error {
    fn from(err: ErrorResponse) -> Error {
        match err.code {
            ErrorCode::ProofAlreadyUsed => Error::TokenAlreadySpent,
            ErrorCode::BlindedMessageAlreadySigned => Error::BlindedMessageAlreadySigned,
            ErrorCode::InvalidProof => Error::TokenNotVerified,
            ErrorCode::SecretTooLong => Error::Secret(crate::secret::Error::InvalidSecret),
            ErrorCode::Standard | ErrorCode::Unknown(_) => Error::Custom(err.detail),
        }
    }
}
