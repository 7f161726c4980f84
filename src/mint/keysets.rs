//! Mint keyset management

use bitcoin::bip32::{ChildNumber, DerivationPath};

use super::{Mint, MintKeySetInfo};
use crate::error::Error;
use crate::nuts::nut02::MAX_ORDER;
use crate::nuts::{CurrencyUnit, Id, KeySet, KeysResponse, KeysetResponse, MintKeySet};
use crate::util::unix_time;
use crate::SECP256K1;

/// Derivation path of a keyset: `m/0'/{unit}'/{index}'`
pub(crate) fn derivation_path_for_unit(
    unit: &CurrencyUnit,
    index: u32,
) -> Result<DerivationPath, Error> {
    let unit_index = unit
        .derivation_index()
        .ok_or_else(|| Error::Custom(format!("no derivation index for unit {unit}")))?;

    Ok(DerivationPath::from(vec![
        ChildNumber::from_hardened_idx(0).expect("0 is a valid index"),
        ChildNumber::from_hardened_idx(unit_index).expect("unit index is within bound"),
        ChildNumber::from_hardened_idx(index).expect("keyset index is within bound"),
    ]))
}

impl Mint {
    /// Retrieve the public keys of the active keysets for distribution to
    /// wallet clients
    pub async fn pubkeys(&self) -> Result<KeysResponse, Error> {
        let active_keysets = self.localstore.get_active_keysets().await?;

        let keysets = self.keysets.read().await;

        Ok(KeysResponse {
            keysets: active_keysets
                .values()
                .filter_map(|id| keysets.get(id).map(|k| k.clone().into()))
                .collect(),
        })
    }

    /// Retrieve the public keys of a specific keyset
    pub async fn keyset_pubkeys(&self, keyset_id: &Id) -> Result<KeysResponse, Error> {
        let keysets = self.keysets.read().await;
        let keyset = keysets
            .get(keyset_id)
            .cloned()
            .ok_or(Error::UnknownKeySet)?;

        Ok(KeysResponse {
            keysets: vec![keyset.into()],
        })
    }

    /// Return a list of all keysets with their metadata
    pub async fn keysets(&self) -> Result<KeysetResponse, Error> {
        let keysets = self.localstore.get_keyset_infos().await?;

        Ok(KeysetResponse {
            keysets: keysets.into_iter().map(Into::into).collect(),
        })
    }

    /// Get a keyset with keys
    pub async fn keyset(&self, id: &Id) -> Result<Option<KeySet>, Error> {
        Ok(self.keysets.read().await.get(id).cloned().map(Into::into))
    }

    /// Rotate to the next keyset for the unit
    ///
    /// The previous active keyset remains valid for verification but no
    /// longer signs outputs.
    pub async fn rotate_keyset(
        &self,
        unit: CurrencyUnit,
        max_order: u8,
        input_fee_ppk: u64,
    ) -> Result<MintKeySetInfo, Error> {
        let max_order = max_order.min(MAX_ORDER);

        let derivation_path_index = match self.localstore.get_active_keyset_id(&unit).await? {
            Some(active_id) => {
                let info = self
                    .localstore
                    .get_keyset_info(&active_id)
                    .await?
                    .ok_or(Error::UnknownKeySet)?;

                // Demote the previous active keyset
                self.localstore
                    .add_keyset_info(MintKeySetInfo {
                        active: false,
                        ..info.clone()
                    })
                    .await?;

                info.derivation_path_index + 1
            }
            None => 0,
        };

        let keyset = MintKeySet::generate(
            &SECP256K1,
            self.xpriv,
            unit.clone(),
            derivation_path_for_unit(&unit, derivation_path_index)?,
            max_order,
        );

        let info = MintKeySetInfo {
            id: keyset.id,
            unit: unit.clone(),
            active: true,
            valid_from: unix_time(),
            derivation_path_index,
            max_order,
            input_fee_ppk,
        };

        tracing::info!(
            "Rotated keyset for {unit}: {} at index {derivation_path_index}",
            keyset.id
        );

        self.localstore.add_keyset_info(info.clone()).await?;
        self.localstore.set_active_keyset(unit, keyset.id).await?;

        self.keysets.write().await.insert(keyset.id, keyset);

        Ok(info)
    }
}
