//! Keyset registry
//!
//! Discovery, verification and rotation of the mint's keysets, with an
//! offline fallback to the cached view on network failure.

use super::Wallet;
use crate::error::Error;
use crate::nuts::{Id, KeySetInfo, Keys};

impl Wallet {
    /// Get the public keys of a keyset, fetching and verifying them if they
    /// are not stored
    ///
    /// A fetched keyset whose derived id does not match the requested id is
    /// rejected.
    pub async fn get_keyset_keys(&self, keyset_id: Id) -> Result<Keys, Error> {
        if let Some(keys) = self.localstore.get_keys(&keyset_id).await? {
            return Ok(keys);
        }

        let keys_response = self.client().get_keyset(keyset_id).await?;

        let keyset = keys_response
            .keysets
            .into_iter()
            .find(|keyset| keyset.id == keyset_id)
            .ok_or(Error::UnknownKeySet)?;

        keyset.verify_id()?;

        self.localstore.add_keys(keyset.keys.clone()).await?;

        Ok(keyset.keys)
    }

    /// The keysets of the wallet's mint as currently stored
    pub async fn load_mint_keysets(&self) -> Result<Vec<KeySetInfo>, Error> {
        let keysets = self
            .localstore
            .get_keysets(self.mint_url.clone())
            .await?
            .unwrap_or_default();

        Ok(keysets
            .into_iter()
            .filter(|keyset| keyset.unit == self.unit)
            .collect())
    }

    /// Refresh the keyset list from the mint and persist it
    ///
    /// On a network failure the cached list is returned unchanged; protocol
    /// failures propagate.
    pub async fn refresh_mint_keysets(&self) -> Result<Vec<KeySetInfo>, Error> {
        match self.client().get_mint_keysets().await {
            Ok(response) => {
                self.localstore
                    .add_keysets(self.mint_url.clone(), response.keysets.clone())
                    .await?;

                Ok(response
                    .keysets
                    .into_iter()
                    .filter(|keyset| keyset.unit == self.unit)
                    .collect())
            }
            Err(err) if err.is_network() => {
                tracing::warn!(
                    "Could not refresh keysets for {}, using cached: {}",
                    self.mint_url,
                    err
                );

                let cached = self.load_mint_keysets().await?;
                if cached.is_empty() {
                    return Err(err);
                }

                Ok(cached)
            }
            Err(err) => Err(err),
        }
    }

    /// Get the active keyset of the mint for the wallet's unit
    ///
    /// If the mint rotated, the cached active keyset is demoted and the new
    /// one verified and swapped in; if only the fee changed the cached
    /// entry is refreshed; offline, the cached active keyset is used.
    pub async fn get_active_mint_keyset(&self) -> Result<KeySetInfo, Error> {
        let cached = self.load_mint_keysets().await?;
        let cached_active = cached.iter().find(|keyset| keyset.active).cloned();

        let fresh = match self.client().get_mint_keysets().await {
            Ok(response) => response.keysets,
            Err(err) if err.is_network() => {
                // Offline policy: serve the cached keyset, never fall back
                // on protocol errors
                return match cached_active {
                    Some(active) => {
                        tracing::warn!(
                            "Offline, using cached active keyset {} for {}",
                            active.id,
                            self.mint_url
                        );
                        Ok(active)
                    }
                    None => Err(err),
                };
            }
            Err(err) => return Err(err),
        };

        let fresh_active = fresh
            .iter()
            .find(|keyset| keyset.active && keyset.unit == self.unit)
            .cloned()
            .ok_or(Error::NoActiveKeyset)?;

        match cached_active {
            // The active keyset is unchanged; pick up a fee change if any
            Some(ref cached_active) if cached_active.id == fresh_active.id => {
                if cached_active.input_fee_ppk != fresh_active.input_fee_ppk {
                    tracing::debug!(
                        "Input fee of keyset {} changed: {} -> {}",
                        fresh_active.id,
                        cached_active.input_fee_ppk,
                        fresh_active.input_fee_ppk
                    );
                    self.localstore
                        .add_keysets(self.mint_url.clone(), vec![fresh_active.clone()])
                        .await?;
                }
            }
            // Rotation: verify the new keys before trusting the new keyset
            other => {
                self.get_keyset_keys(fresh_active.id).await?;

                if let Some(previous) = other {
                    tracing::info!(
                        "Mint {} rotated active keyset {} -> {}",
                        self.mint_url,
                        previous.id,
                        fresh_active.id
                    );

                    // Demote the previous active in case the mint no longer
                    // lists it
                    self.localstore
                        .add_keysets(
                            self.mint_url.clone(),
                            vec![KeySetInfo {
                                active: false,
                                ..previous
                            }],
                        )
                        .await?;
                }

                self.localstore
                    .add_keysets(self.mint_url.clone(), fresh.clone())
                    .await?;
            }
        }

        Ok(fresh_active)
    }

    /// Get the active keyset and make sure its keys are loaded
    pub async fn fetch_active_keyset(&self) -> Result<KeySetInfo, Error> {
        let keyset = self.get_active_mint_keyset().await?;
        self.get_keyset_keys(keyset.id).await?;
        Ok(keyset)
    }
}
