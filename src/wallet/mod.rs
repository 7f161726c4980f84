//! Wallet
//!
//! A [`Wallet`] holds the proofs of a single mint and unit and drives the
//! mint, melt, send, receive, swap and restore flows against it.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use bitcoin::bip32::Xpriv;
use bitcoin::Network;

use crate::database::{self, WalletDatabase};
use crate::dhke::construct_proofs;
use crate::error::Error;
use crate::fees::calculate_fee;
use crate::mint_url::MintUrl;
use crate::nuts::nut12;
use crate::nuts::{
    CurrencyUnit, Id, Keys, MintInfo, PreMintSecrets, Proof, Proofs, ProofsMethods, PublicKey,
    RestoreRequest, State, Token,
};
use crate::types::ProofInfo;
use crate::Amount;

pub mod client;
mod keysets;
mod melt;
mod mint;
mod multi_mint;
mod proofs;
mod receive;
mod send;
pub mod subscription;
mod swap;

pub use client::{DirectMintConnector, HttpClient, MintConnector};
pub use multi_mint::{MultiMintReceiveOptions, MultiMintWallet};
pub use receive::ReceiveOptions;
pub use send::{SendOptions, SendResult};
pub use subscription::{Subscription, SubscriptionManager};
pub use swap::PreSwap;

/// How many counters one restore batch covers
const RESTORE_BATCH: u32 = 100;

/// How many consecutive empty batches end a restore scan
const RESTORE_EMPTY_BATCHES: u32 = 3;

/// Cashu wallet for a single mint and unit
#[derive(Debug, Clone)]
pub struct Wallet {
    /// Mint url
    pub mint_url: MintUrl,
    /// Unit
    pub unit: CurrencyUnit,
    /// Storage backend
    pub localstore: Arc<dyn WalletDatabase<Err = database::Error> + Send + Sync>,
    xpriv: Xpriv,
    client: Arc<dyn MintConnector + Send + Sync>,
}

impl Wallet {
    /// Create new [`Wallet`] talking to the mint over HTTP
    pub fn new(
        mint_url: &str,
        unit: CurrencyUnit,
        localstore: Arc<dyn WalletDatabase<Err = database::Error> + Send + Sync>,
        seed: &[u8],
    ) -> Result<Self, Error> {
        let mint_url = MintUrl::from_str(mint_url)?;

        Ok(Self {
            client: Arc::new(HttpClient::new(mint_url.clone())),
            mint_url,
            unit,
            localstore,
            xpriv: Xpriv::new_master(Network::Bitcoin, seed)
                .map_err(crate::nuts::nut13::Error::from)?,
        })
    }

    /// Replace the mint connector
    pub fn set_client(&mut self, client: Arc<dyn MintConnector + Send + Sync>) {
        self.client = client;
    }

    /// The mint connector in use
    pub(crate) fn client(&self) -> &Arc<dyn MintConnector + Send + Sync> {
        &self.client
    }

    pub(crate) fn xpriv(&self) -> Xpriv {
        self.xpriv
    }

    /// Unspent balance of the wallet
    pub async fn total_balance(&self) -> Result<Amount, Error> {
        Ok(self.get_unspent_proofs().await?.total_amount()?)
    }

    /// Balance currently reserved or pending in operations
    pub async fn total_pending_balance(&self) -> Result<Amount, Error> {
        let proofs = self
            .localstore
            .get_proofs(
                Some(self.mint_url.clone()),
                Some(self.unit.clone()),
                Some(vec![State::Pending, State::Reserved]),
            )
            .await?;

        Ok(Amount::try_sum(proofs.iter().map(|p| p.proof.amount))?)
    }

    /// Query the mint for its info and persist it
    pub async fn get_mint_info(&self) -> Result<Option<MintInfo>, Error> {
        let mint_info = match self.client.get_mint_info().await {
            Ok(mint_info) => Some(mint_info),
            Err(err) => {
                tracing::warn!("Could not get mint info {}", err);
                None
            }
        };

        self.localstore
            .add_mint(self.mint_url.clone(), mint_info.clone())
            .await?;

        Ok(mint_info)
    }

    /// Fee required to spend a proof set
    pub async fn get_proofs_fee(&self, proofs: &Proofs) -> Result<Amount, Error> {
        let mut proofs_per_keyset = HashMap::new();
        let mut fee_per_keyset = HashMap::new();

        for proof in proofs {
            if let std::collections::hash_map::Entry::Vacant(e) =
                fee_per_keyset.entry(proof.keyset_id)
            {
                let keyset_info = self
                    .localstore
                    .get_keyset_by_id(&proof.keyset_id)
                    .await?
                    .ok_or(Error::UnknownKeySet)?;
                e.insert(keyset_info.input_fee_ppk);
            }

            proofs_per_keyset
                .entry(proof.keyset_id)
                .and_modify(|count| *count += 1)
                .or_insert(1);
        }

        calculate_fee(&proofs_per_keyset, &fee_per_keyset)
    }

    /// Verify the DLEQ proofs on every proof that carries one
    ///
    /// A proof with DLEQ data that does not verify is rejected; proofs
    /// without DLEQ data pass.
    pub async fn verify_proofs_dleq(&self, proofs: &Proofs) -> Result<(), Error> {
        let mut keys_cache: HashMap<Id, Keys> = HashMap::new();

        for proof in proofs {
            if proof.dleq.is_none() {
                continue;
            }

            let keys = match keys_cache.get(&proof.keyset_id) {
                Some(keys) => keys.clone(),
                None => {
                    let keys = self.get_keyset_keys(proof.keyset_id).await?;
                    keys_cache.insert(proof.keyset_id, keys.clone());
                    keys
                }
            };

            let mint_pubkey = keys.amount_key(proof.amount).ok_or(Error::AmountKey)?;

            proof
                .verify_dleq(mint_pubkey)
                .map_err(|err| match err {
                    nut12::Error::MissingDleqProof => Error::CouldNotVerifyDleq,
                    _ => Error::CouldNotVerifyDleq,
                })?;
        }

        Ok(())
    }

    /// Verify the DLEQ proofs on every proof of a token
    pub async fn verify_token_dleq(&self, token: &Token) -> Result<(), Error> {
        for (_mint, proofs) in token.proofs() {
            self.verify_proofs_dleq(&proofs).await?;
        }

        Ok(())
    }

    /// Recover proofs from the wallet seed
    ///
    /// Walks the derivation counter of every known keyset in blocks,
    /// asking the mint to resign, and stores whatever is still unspent.
    /// Running it twice is a no-op for the second run.
    pub async fn restore(&self) -> Result<Amount, Error> {
        if self
            .localstore
            .get_mint(self.mint_url.clone())
            .await?
            .is_none()
        {
            self.get_mint_info().await?;
        }

        let keysets = self.refresh_mint_keysets().await?;

        let mut restored_value = Amount::ZERO;

        for keyset in keysets {
            // A keyset whose keys cannot be fetched is skipped; the rest of
            // the mint remains usable
            let keys = match self.get_keyset_keys(keyset.id).await {
                Ok(keys) => keys,
                Err(err) => {
                    tracing::warn!("Skipping keyset {} during restore: {err}", keyset.id);
                    continue;
                }
            };
            let mut empty_batch = 0;
            let mut start_counter = 0;
            let mut last_used_counter = None;

            while empty_batch.lt(&RESTORE_EMPTY_BATCHES) {
                let premint_secrets = PreMintSecrets::restore_batch(
                    keyset.id,
                    self.xpriv,
                    start_counter,
                    start_counter + RESTORE_BATCH - 1,
                )?;

                tracing::debug!(
                    "Attempting to restore counter {}-{} for mint {} keyset {}",
                    start_counter,
                    start_counter + RESTORE_BATCH - 1,
                    self.mint_url,
                    keyset.id
                );

                let restore_request = RestoreRequest {
                    outputs: premint_secrets.blinded_messages(),
                };

                let response = self.client.post_restore(restore_request).await?;

                if response.signatures.is_empty() {
                    empty_batch += 1;
                    start_counter += RESTORE_BATCH;
                    continue;
                }

                let premint_secrets: Vec<_> = premint_secrets
                    .secrets
                    .iter()
                    .filter(|p| response.outputs.contains(&p.blinded_message))
                    .collect();

                // Outputs and secrets line up after dropping the messages
                // the mint had no signatures for
                if response.outputs.len() != premint_secrets.len() {
                    return Err(Error::Custom(
                        "Restore response and premint secrets are out of sync".to_string(),
                    ));
                }

                let proofs = construct_proofs(
                    response.signatures,
                    premint_secrets.iter().map(|p| p.r.clone()).collect(),
                    premint_secrets.iter().map(|p| p.secret.clone()).collect(),
                    &keys,
                )?;

                tracing::debug!("Restored {} proofs", proofs.len());

                last_used_counter = Some(start_counter + RESTORE_BATCH - 1);

                let states = self.check_proofs_spent(proofs.clone()).await?;

                let unspent_proofs: Vec<Proof> = proofs
                    .iter()
                    .zip(states)
                    .filter(|(_, state)| !state.state.eq(&State::Spent))
                    .map(|(p, _)| p)
                    .cloned()
                    .collect();

                restored_value += unspent_proofs.total_amount()?;

                let unspent_proofs = unspent_proofs
                    .into_iter()
                    .map(|proof| {
                        ProofInfo::new(
                            proof,
                            self.mint_url.clone(),
                            State::Unspent,
                            keyset.unit.clone(),
                        )
                    })
                    .collect::<Result<Vec<ProofInfo>, _>>()?;

                self.localstore.update_proofs(unspent_proofs, vec![]).await?;

                empty_batch = 0;
                start_counter += RESTORE_BATCH;
            }

            // Advance the stored counter past the last index that was used
            if let Some(last_used_counter) = last_used_counter {
                let current = self
                    .localstore
                    .get_keyset_counter(&keyset.id)
                    .await?
                    .unwrap_or(0);

                if last_used_counter > current {
                    self.localstore
                        .increment_keyset_counter(&keyset.id, last_used_counter - current)
                        .await?;
                }
            }
        }

        Ok(restored_value)
    }

    /// Check the state of proofs with the mint
    pub async fn check_proofs_spent(
        &self,
        proofs: Proofs,
    ) -> Result<Vec<crate::nuts::ProofState>, Error> {
        let spendable = self
            .client
            .post_check_state(crate::nuts::CheckStateRequest { ys: proofs.ys()? })
            .await?;

        Ok(spendable.states)
    }

    /// Probe reserved and pending proofs, releasing the ones the mint has
    /// not seen and dropping the spent ones
    pub async fn check_all_pending_proofs(&self) -> Result<Amount, Error> {
        let proofs = self
            .localstore
            .get_proofs(
                Some(self.mint_url.clone()),
                Some(self.unit.clone()),
                Some(vec![State::Pending, State::Reserved]),
            )
            .await?;

        if proofs.is_empty() {
            return Ok(Amount::ZERO);
        }

        let states = self
            .check_proofs_spent(proofs.iter().map(|p| p.proof.clone()).collect())
            .await?;

        let spent_ys: Vec<PublicKey> = states
            .iter()
            .filter(|s| s.state == State::Spent)
            .map(|s| s.y)
            .collect();

        let unspent_ys: Vec<PublicKey> = states
            .iter()
            .filter(|s| s.state == State::Unspent)
            .map(|s| s.y)
            .collect();

        let released = Amount::try_sum(
            proofs
                .iter()
                .filter(|p| unspent_ys.contains(&p.y))
                .map(|p| p.proof.amount),
        )?;

        self.localstore.update_proofs(vec![], spent_ys).await?;
        self.localstore
            .update_proofs_state(unspent_ys, State::Unspent)
            .await?;

        Ok(released)
    }
}
