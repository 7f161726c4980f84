//! Wallet in-memory storage backend

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Error, WalletDatabase};
use crate::mint_url::MintUrl;
use crate::nuts::{CurrencyUnit, Id, KeySetInfo, Keys, MintInfo, PublicKey, State};
use crate::types::{MeltQuote, MintQuote, ProofInfo};

/// Wallet in-memory database
#[derive(Debug, Clone, Default)]
pub struct WalletMemoryDatabase {
    mints: Arc<RwLock<HashMap<MintUrl, Option<MintInfo>>>>,
    mint_keysets: Arc<RwLock<HashMap<MintUrl, HashSet<Id>>>>,
    keysets: Arc<RwLock<HashMap<Id, KeySetInfo>>>,
    mint_quotes: Arc<RwLock<HashMap<String, MintQuote>>>,
    melt_quotes: Arc<RwLock<HashMap<String, MeltQuote>>>,
    mint_keys: Arc<RwLock<HashMap<Id, Keys>>>,
    proofs: Arc<RwLock<HashMap<PublicKey, ProofInfo>>>,
    keyset_counter: Arc<RwLock<HashMap<Id, u32>>>,
}

impl WalletMemoryDatabase {
    /// Create new [`WalletMemoryDatabase`]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletDatabase for WalletMemoryDatabase {
    type Err = Error;

    async fn add_mint(
        &self,
        mint_url: MintUrl,
        mint_info: Option<MintInfo>,
    ) -> Result<(), Self::Err> {
        self.mints.write().await.insert(mint_url, mint_info);
        Ok(())
    }

    async fn get_mint(&self, mint_url: MintUrl) -> Result<Option<MintInfo>, Self::Err> {
        Ok(self.mints.read().await.get(&mint_url).cloned().flatten())
    }

    async fn get_mints(&self) -> Result<HashMap<MintUrl, Option<MintInfo>>, Error> {
        Ok(self.mints.read().await.clone())
    }

    async fn add_keysets(
        &self,
        mint_url: MintUrl,
        keysets: Vec<KeySetInfo>,
    ) -> Result<(), Error> {
        let mut current_mint_keysets = self.mint_keysets.write().await;
        let mut current_keysets = self.keysets.write().await;

        for keyset in keysets {
            current_mint_keysets
                .entry(mint_url.clone())
                .and_modify(|ks| {
                    ks.insert(keyset.id);
                })
                .or_insert_with(|| HashSet::from_iter(vec![keyset.id]));

            current_keysets.insert(keyset.id, keyset);
        }

        Ok(())
    }

    async fn get_keysets(&self, mint_url: MintUrl) -> Result<Option<Vec<KeySetInfo>>, Error> {
        match self.mint_keysets.read().await.get(&mint_url) {
            Some(keyset_ids) => {
                let mut keysets = vec![];

                let db_keysets = self.keysets.read().await;

                for id in keyset_ids {
                    if let Some(keyset) = db_keysets.get(id) {
                        keysets.push(keyset.clone());
                    }
                }

                Ok(Some(keysets))
            }
            None => Ok(None),
        }
    }

    async fn get_keyset_by_id(&self, keyset_id: &Id) -> Result<Option<KeySetInfo>, Error> {
        Ok(self.keysets.read().await.get(keyset_id).cloned())
    }

    async fn add_keys(&self, keys: Keys) -> Result<(), Error> {
        self.mint_keys.write().await.insert(Id::from(&keys), keys);
        Ok(())
    }

    async fn get_keys(&self, id: &Id) -> Result<Option<Keys>, Error> {
        Ok(self.mint_keys.read().await.get(id).cloned())
    }

    async fn remove_keys(&self, id: &Id) -> Result<(), Error> {
        self.mint_keys.write().await.remove(id);
        Ok(())
    }

    async fn add_mint_quote(&self, quote: MintQuote) -> Result<(), Error> {
        self.mint_quotes
            .write()
            .await
            .insert(quote.id.clone(), quote);
        Ok(())
    }

    async fn get_mint_quote(&self, quote_id: &str) -> Result<Option<MintQuote>, Error> {
        Ok(self.mint_quotes.read().await.get(quote_id).cloned())
    }

    async fn get_mint_quotes(&self) -> Result<Vec<MintQuote>, Error> {
        Ok(self.mint_quotes.read().await.values().cloned().collect())
    }

    async fn remove_mint_quote(&self, quote_id: &str) -> Result<(), Error> {
        self.mint_quotes.write().await.remove(quote_id);

        Ok(())
    }

    async fn add_melt_quote(&self, quote: MeltQuote) -> Result<(), Error> {
        self.melt_quotes
            .write()
            .await
            .insert(quote.id.clone(), quote);
        Ok(())
    }

    async fn get_melt_quote(&self, quote_id: &str) -> Result<Option<MeltQuote>, Error> {
        Ok(self.melt_quotes.read().await.get(quote_id).cloned())
    }

    async fn remove_melt_quote(&self, quote_id: &str) -> Result<(), Error> {
        self.melt_quotes.write().await.remove(quote_id);

        Ok(())
    }

    async fn update_proofs(
        &self,
        added: Vec<ProofInfo>,
        removed_ys: Vec<PublicKey>,
    ) -> Result<(), Error> {
        let mut all_proofs = self.proofs.write().await;

        for proof_info in added.into_iter() {
            all_proofs.insert(proof_info.y, proof_info);
        }

        for y in removed_ys.into_iter() {
            all_proofs.remove(&y);
        }

        Ok(())
    }

    async fn update_proofs_state(
        &self,
        ys: Vec<PublicKey>,
        state: State,
    ) -> Result<(), Error> {
        let mut all_proofs = self.proofs.write().await;

        for y in ys.into_iter() {
            if let Some(proof_info) = all_proofs.get_mut(&y) {
                proof_info.state = state;
            }
        }

        Ok(())
    }

    async fn get_proofs(
        &self,
        mint_url: Option<MintUrl>,
        unit: Option<CurrencyUnit>,
        state: Option<Vec<State>>,
    ) -> Result<Vec<ProofInfo>, Error> {
        let proofs = self.proofs.read().await;

        Ok(proofs
            .values()
            .filter(|proof_info| proof_info.matches_conditions(&mint_url, &unit, &state))
            .cloned()
            .collect())
    }

    async fn increment_keyset_counter(&self, keyset_id: &Id, count: u32) -> Result<(), Error> {
        let mut keyset_counter = self.keyset_counter.write().await;
        let current_counter = keyset_counter.get(keyset_id).copied().unwrap_or(0);
        keyset_counter.insert(*keyset_id, current_counter + count);
        Ok(())
    }

    async fn get_keyset_counter(&self, id: &Id) -> Result<Option<u32>, Error> {
        Ok(self.keyset_counter.read().await.get(id).copied())
    }
}
