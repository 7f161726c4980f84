//! Storage backends
//!
//! The logical schema and transaction boundaries for wallet and mint state.
//! Every trait call is one storage transaction; implementations must not
//! leave partial writes behind.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;

use crate::mint::{MeltQuote as MintMeltQuote, MintKeySetInfo, MintQuote as MintMintQuote};
use crate::mint_url::MintUrl;
use crate::nuts::{
    BlindSignature, CurrencyUnit, Id, KeySetInfo, Keys, MeltQuoteState, MintInfo, MintQuoteState,
    Proof, PublicKey, State,
};
use crate::types::{MeltQuote, MintQuote, ProofInfo};

pub mod mint_memory;
pub mod wallet_memory;

pub use mint_memory::MintMemoryDatabase;
pub use wallet_memory::WalletMemoryDatabase;

/// Database error
#[derive(Debug, Error)]
pub enum Error {
    /// Attempt to spend a proof that is already spent
    #[error("Attempt to update state of spent proof")]
    AttemptUpdateSpentProof,
    /// Attempt to spend a proof that is locked to an operation
    #[error("Attempt to update state of pending proof")]
    AttemptUpdatePendingProof,
    /// Attempt to sign a blinded message that was signed before
    #[error("Blinded message already signed")]
    DuplicateBlindedMessage,
    /// Row not found
    #[error("Unknown quote")]
    UnknownQuote,
    /// Backend failure
    #[error(transparent)]
    Database(Box<dyn std::error::Error + Send + Sync>),
}

/// Wallet storage backend
#[async_trait]
pub trait WalletDatabase: Debug {
    /// Error type of the backend
    type Err: Into<crate::Error> + From<Error>;

    /// Add mint to storage
    async fn add_mint(
        &self,
        mint_url: MintUrl,
        mint_info: Option<MintInfo>,
    ) -> Result<(), Self::Err>;
    /// Get mint from storage
    async fn get_mint(&self, mint_url: MintUrl) -> Result<Option<MintInfo>, Self::Err>;
    /// Get all mints from storage
    async fn get_mints(&self) -> Result<HashMap<MintUrl, Option<MintInfo>>, Self::Err>;

    /// Add mint keyset metadata to storage
    async fn add_keysets(
        &self,
        mint_url: MintUrl,
        keysets: Vec<KeySetInfo>,
    ) -> Result<(), Self::Err>;
    /// Get keyset metadata for mint
    async fn get_keysets(&self, mint_url: MintUrl) -> Result<Option<Vec<KeySetInfo>>, Self::Err>;
    /// Get keyset metadata by id
    async fn get_keyset_by_id(&self, keyset_id: &Id) -> Result<Option<KeySetInfo>, Self::Err>;

    /// Add public keys of a keyset
    async fn add_keys(&self, keys: Keys) -> Result<(), Self::Err>;
    /// Get public keys of a keyset
    async fn get_keys(&self, id: &Id) -> Result<Option<Keys>, Self::Err>;
    /// Remove public keys of a keyset
    async fn remove_keys(&self, id: &Id) -> Result<(), Self::Err>;

    /// Add mint quote to storage
    async fn add_mint_quote(&self, quote: MintQuote) -> Result<(), Self::Err>;
    /// Get mint quote from storage
    async fn get_mint_quote(&self, quote_id: &str) -> Result<Option<MintQuote>, Self::Err>;
    /// Get all mint quotes from storage
    async fn get_mint_quotes(&self) -> Result<Vec<MintQuote>, Self::Err>;
    /// Remove mint quote from storage
    async fn remove_mint_quote(&self, quote_id: &str) -> Result<(), Self::Err>;

    /// Add melt quote to storage
    async fn add_melt_quote(&self, quote: MeltQuote) -> Result<(), Self::Err>;
    /// Get melt quote from storage
    async fn get_melt_quote(&self, quote_id: &str) -> Result<Option<MeltQuote>, Self::Err>;
    /// Remove melt quote from storage
    async fn remove_melt_quote(&self, quote_id: &str) -> Result<(), Self::Err>;

    /// Add proofs and remove proofs in one transaction
    async fn update_proofs(
        &self,
        added: Vec<ProofInfo>,
        removed_ys: Vec<PublicKey>,
    ) -> Result<(), Self::Err>;
    /// Update the state of the given proofs
    async fn update_proofs_state(
        &self,
        ys: Vec<PublicKey>,
        state: State,
    ) -> Result<(), Self::Err>;
    /// Get proofs matching the filters
    async fn get_proofs(
        &self,
        mint_url: Option<MintUrl>,
        unit: Option<CurrencyUnit>,
        state: Option<Vec<State>>,
    ) -> Result<Vec<ProofInfo>, Self::Err>;

    /// Bump the derivation counter of a keyset
    async fn increment_keyset_counter(&self, keyset_id: &Id, count: u32) -> Result<(), Self::Err>;
    /// Get the last used derivation counter of a keyset
    async fn get_keyset_counter(&self, keyset_id: &Id) -> Result<Option<u32>, Self::Err>;
}

/// Mint storage backend
#[async_trait]
pub trait MintDatabase: Debug {
    /// Error type of the backend
    type Err: Into<crate::Error> + From<Error>;

    /// Set the active keyset for a unit
    async fn set_active_keyset(&self, unit: CurrencyUnit, id: Id) -> Result<(), Self::Err>;
    /// Get the active keyset id for a unit
    async fn get_active_keyset_id(&self, unit: &CurrencyUnit) -> Result<Option<Id>, Self::Err>;
    /// Get all active keyset ids
    async fn get_active_keysets(&self) -> Result<HashMap<CurrencyUnit, Id>, Self::Err>;

    /// Add keyset info
    async fn add_keyset_info(&self, keyset: MintKeySetInfo) -> Result<(), Self::Err>;
    /// Get keyset info
    async fn get_keyset_info(&self, id: &Id) -> Result<Option<MintKeySetInfo>, Self::Err>;
    /// Get all keyset infos
    async fn get_keyset_infos(&self) -> Result<Vec<MintKeySetInfo>, Self::Err>;

    /// Add mint quote
    async fn add_mint_quote(&self, quote: MintMintQuote) -> Result<(), Self::Err>;
    /// Get mint quote
    async fn get_mint_quote(&self, quote_id: &str) -> Result<Option<MintMintQuote>, Self::Err>;
    /// Update the state of a mint quote, returning the previous state
    async fn update_mint_quote_state(
        &self,
        quote_id: &str,
        state: MintQuoteState,
    ) -> Result<MintQuoteState, Self::Err>;
    /// Get all mint quotes
    async fn get_mint_quotes(&self) -> Result<Vec<MintMintQuote>, Self::Err>;
    /// Remove mint quote
    async fn remove_mint_quote(&self, quote_id: &str) -> Result<(), Self::Err>;

    /// Add melt quote
    async fn add_melt_quote(&self, quote: MintMeltQuote) -> Result<(), Self::Err>;
    /// Get melt quote
    async fn get_melt_quote(&self, quote_id: &str) -> Result<Option<MintMeltQuote>, Self::Err>;
    /// Update the state of a melt quote, returning the previous state
    async fn update_melt_quote_state(
        &self,
        quote_id: &str,
        state: MeltQuoteState,
    ) -> Result<MeltQuoteState, Self::Err>;
    /// Update the preimage stored on a melt quote
    async fn update_melt_quote_preimage(
        &self,
        quote_id: &str,
        preimage: Option<String>,
    ) -> Result<(), Self::Err>;
    /// Get all melt quotes
    async fn get_melt_quotes(&self) -> Result<Vec<MintMeltQuote>, Self::Err>;
    /// Remove melt quote
    async fn remove_melt_quote(&self, quote_id: &str) -> Result<(), Self::Err>;

    /// Add proofs, keyed by Y, optionally locked to a melt quote
    async fn add_proofs(&self, proofs: Vec<Proof>, quote_id: Option<String>)
        -> Result<(), Self::Err>;
    /// Remove proofs
    async fn remove_proofs(&self, ys: &[PublicKey]) -> Result<(), Self::Err>;
    /// Get proofs by Y
    async fn get_proofs_by_ys(&self, ys: &[PublicKey]) -> Result<Vec<Option<Proof>>, Self::Err>;
    /// Get proof states by Y
    async fn get_proofs_states(&self, ys: &[PublicKey]) -> Result<Vec<Option<State>>, Self::Err>;
    /// Atomically set the state of the given proofs, returning the previous
    /// states
    ///
    /// This is the serialization point for double-spend prevention: setting
    /// proofs to [`State::Spent`] or [`State::Pending`] fails if any of them
    /// already is.
    async fn update_proofs_states(
        &self,
        ys: &[PublicKey],
        proofs_state: State,
    ) -> Result<Vec<Option<State>>, Self::Err>;

    /// Record blind signatures under their blinded message
    ///
    /// Fails if any of the blinded messages was signed before.
    async fn add_blind_signatures(
        &self,
        blinded_messages: &[PublicKey],
        blind_signatures: &[BlindSignature],
        quote_id: Option<String>,
    ) -> Result<(), Self::Err>;
    /// Get blind signatures for blinded messages
    async fn get_blind_signatures(
        &self,
        blinded_messages: &[PublicKey],
    ) -> Result<Vec<Option<BlindSignature>>, Self::Err>;
}

impl From<Error> for crate::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::AttemptUpdateSpentProof => crate::Error::TokenAlreadySpent,
            Error::AttemptUpdatePendingProof => crate::Error::TokenPending,
            Error::DuplicateBlindedMessage => crate::Error::BlindedMessageAlreadySigned,
            Error::UnknownQuote => crate::Error::UnknownQuote,
            err => crate::Error::Database(err),
        }
    }
}
