//! Mint in-memory storage backend

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Error, MintDatabase};
use crate::mint::{MeltQuote, MintKeySetInfo, MintQuote};
use crate::nuts::{
    BlindSignature, CurrencyUnit, Id, MeltQuoteState, MintQuoteState, Proof, PublicKey, State,
};

#[derive(Debug, Default)]
struct MintMemoryInner {
    active_keysets: HashMap<CurrencyUnit, Id>,
    keyset_infos: HashMap<Id, MintKeySetInfo>,
    mint_quotes: HashMap<String, MintQuote>,
    melt_quotes: HashMap<String, MeltQuote>,
    proofs: HashMap<PublicKey, Proof>,
    proof_states: HashMap<PublicKey, State>,
    quote_proofs: HashMap<String, Vec<PublicKey>>,
    blind_signatures: HashMap<PublicKey, BlindSignature>,
}

/// Mint in-memory database
///
/// All state lives behind one lock so every trait call is a single
/// transaction; the state checks in [`update_proofs_states`] are the
/// linearization point for concurrent spends.
///
/// [`update_proofs_states`]: MintDatabase::update_proofs_states
#[derive(Debug, Clone, Default)]
pub struct MintMemoryDatabase {
    inner: Arc<Mutex<MintMemoryInner>>,
}

impl MintMemoryDatabase {
    /// Create new [`MintMemoryDatabase`]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MintDatabase for MintMemoryDatabase {
    type Err = Error;

    async fn set_active_keyset(&self, unit: CurrencyUnit, id: Id) -> Result<(), Error> {
        self.inner.lock().await.active_keysets.insert(unit, id);
        Ok(())
    }

    async fn get_active_keyset_id(&self, unit: &CurrencyUnit) -> Result<Option<Id>, Error> {
        Ok(self.inner.lock().await.active_keysets.get(unit).copied())
    }

    async fn get_active_keysets(&self) -> Result<HashMap<CurrencyUnit, Id>, Error> {
        Ok(self.inner.lock().await.active_keysets.clone())
    }

    async fn add_keyset_info(&self, keyset: MintKeySetInfo) -> Result<(), Error> {
        self.inner
            .lock()
            .await
            .keyset_infos
            .insert(keyset.id, keyset);
        Ok(())
    }

    async fn get_keyset_info(&self, id: &Id) -> Result<Option<MintKeySetInfo>, Error> {
        Ok(self.inner.lock().await.keyset_infos.get(id).cloned())
    }

    async fn get_keyset_infos(&self) -> Result<Vec<MintKeySetInfo>, Error> {
        Ok(self
            .inner
            .lock()
            .await
            .keyset_infos
            .values()
            .cloned()
            .collect())
    }

    async fn add_mint_quote(&self, quote: MintQuote) -> Result<(), Error> {
        self.inner
            .lock()
            .await
            .mint_quotes
            .insert(quote.id.clone(), quote);
        Ok(())
    }

    async fn get_mint_quote(&self, quote_id: &str) -> Result<Option<MintQuote>, Error> {
        Ok(self.inner.lock().await.mint_quotes.get(quote_id).cloned())
    }

    async fn update_mint_quote_state(
        &self,
        quote_id: &str,
        state: MintQuoteState,
    ) -> Result<MintQuoteState, Error> {
        let mut inner = self.inner.lock().await;
        let quote = inner
            .mint_quotes
            .get_mut(quote_id)
            .ok_or(Error::UnknownQuote)?;

        let current = quote.state;
        quote.state = state;

        Ok(current)
    }

    async fn get_mint_quotes(&self) -> Result<Vec<MintQuote>, Error> {
        Ok(self
            .inner
            .lock()
            .await
            .mint_quotes
            .values()
            .cloned()
            .collect())
    }

    async fn remove_mint_quote(&self, quote_id: &str) -> Result<(), Error> {
        self.inner.lock().await.mint_quotes.remove(quote_id);
        Ok(())
    }

    async fn add_melt_quote(&self, quote: MeltQuote) -> Result<(), Error> {
        self.inner
            .lock()
            .await
            .melt_quotes
            .insert(quote.id.clone(), quote);
        Ok(())
    }

    async fn get_melt_quote(&self, quote_id: &str) -> Result<Option<MeltQuote>, Error> {
        Ok(self.inner.lock().await.melt_quotes.get(quote_id).cloned())
    }

    async fn update_melt_quote_state(
        &self,
        quote_id: &str,
        state: MeltQuoteState,
    ) -> Result<MeltQuoteState, Error> {
        let mut inner = self.inner.lock().await;
        let quote = inner
            .melt_quotes
            .get_mut(quote_id)
            .ok_or(Error::UnknownQuote)?;

        let current = quote.state;
        quote.state = state;

        Ok(current)
    }

    async fn update_melt_quote_preimage(
        &self,
        quote_id: &str,
        preimage: Option<String>,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        let quote = inner
            .melt_quotes
            .get_mut(quote_id)
            .ok_or(Error::UnknownQuote)?;

        quote.payment_preimage = preimage;

        Ok(())
    }

    async fn get_melt_quotes(&self) -> Result<Vec<MeltQuote>, Error> {
        Ok(self
            .inner
            .lock()
            .await
            .melt_quotes
            .values()
            .cloned()
            .collect())
    }

    async fn remove_melt_quote(&self, quote_id: &str) -> Result<(), Error> {
        self.inner.lock().await.melt_quotes.remove(quote_id);
        Ok(())
    }

    async fn add_proofs(
        &self,
        proofs: Vec<Proof>,
        quote_id: Option<String>,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;

        let mut ys = Vec::with_capacity(proofs.len());
        for proof in proofs {
            let y = proof
                .y()
                .map_err(|e| Error::Database(Box::new(e)))?;
            ys.push(y);

            inner.proofs.entry(y).or_insert(proof);
            inner.proof_states.entry(y).or_insert(State::Unspent);
        }

        if let Some(quote_id) = quote_id {
            inner.quote_proofs.insert(quote_id, ys);
        }

        Ok(())
    }

    async fn remove_proofs(&self, ys: &[PublicKey]) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;

        for y in ys {
            inner.proofs.remove(y);
            inner.proof_states.remove(y);
        }

        // Quote locks over removed proofs are gone too
        inner
            .quote_proofs
            .retain(|_, locked| !locked.iter().any(|y| ys.contains(y)));

        Ok(())
    }

    async fn get_proofs_by_ys(&self, ys: &[PublicKey]) -> Result<Vec<Option<Proof>>, Error> {
        let inner = self.inner.lock().await;

        Ok(ys.iter().map(|y| inner.proofs.get(y).cloned()).collect())
    }

    async fn get_proofs_states(&self, ys: &[PublicKey]) -> Result<Vec<Option<State>>, Error> {
        let inner = self.inner.lock().await;

        Ok(ys
            .iter()
            .map(|y| inner.proof_states.get(y).copied())
            .collect())
    }

    async fn update_proofs_states(
        &self,
        ys: &[PublicKey],
        proofs_state: State,
    ) -> Result<Vec<Option<State>>, Error> {
        let mut inner = self.inner.lock().await;

        // Check every state before writing any so a failure commits nothing
        let current_states: Vec<Option<State>> = ys
            .iter()
            .map(|y| inner.proof_states.get(y).copied())
            .collect();

        match proofs_state {
            // Acquiring the pending lock requires every proof to be free
            State::Pending => {
                for state in current_states.iter().flatten() {
                    match state {
                        State::Spent => return Err(Error::AttemptUpdateSpentProof),
                        State::Pending => return Err(Error::AttemptUpdatePendingProof),
                        _ => (),
                    }
                }
            }
            // Pending proofs may move on to spent, spent ones never change
            State::Spent => {
                if current_states
                    .iter()
                    .flatten()
                    .any(|state| *state == State::Spent)
                {
                    return Err(Error::AttemptUpdateSpentProof);
                }
            }
            _ => (),
        }

        for y in ys {
            inner.proof_states.insert(*y, proofs_state);
        }

        Ok(current_states)
    }

    async fn add_blind_signatures(
        &self,
        blinded_messages: &[PublicKey],
        blind_signatures: &[BlindSignature],
        quote_id: Option<String>,
    ) -> Result<(), Error> {
        let _ = quote_id;
        let mut inner = self.inner.lock().await;

        for blinded_message in blinded_messages {
            if inner.blind_signatures.contains_key(blinded_message) {
                return Err(Error::DuplicateBlindedMessage);
            }
        }

        for (blinded_message, signature) in blinded_messages.iter().zip(blind_signatures) {
            inner
                .blind_signatures
                .insert(*blinded_message, signature.clone());
        }

        Ok(())
    }

    async fn get_blind_signatures(
        &self,
        blinded_messages: &[PublicKey],
    ) -> Result<Vec<Option<BlindSignature>>, Error> {
        let inner = self.inner.lock().await;

        Ok(blinded_messages
            .iter()
            .map(|bm| inner.blind_signatures.get(bm).cloned())
            .collect())
    }
}
