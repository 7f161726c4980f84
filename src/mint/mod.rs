//! Mint
//!
//! The issuing side of the protocol: signs blinded messages under its
//! keysets, enforces double-spend prevention and spending conditions, and
//! settles quotes against the Lightning backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::bip32::Xpriv;
use bitcoin::Network;
use lightning_invoice::Bolt11Invoice;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::{self, MintDatabase};
use crate::dhke::{sign_message, verify_message};
use crate::error::Error;
use crate::lightning::MintLightning;
use crate::nuts::nut02::MAX_ORDER;
use crate::nuts::{
    BlindSignature, BlindedMessage, CurrencyUnit, Id, Kind, MeltQuoteState, MintInfo,
    MintKeySet, MintQuoteState, Nut10Secret, Proof, PublicKey,
};
use crate::util::unix_time;
use crate::{Amount, SECP256K1};

mod check_spendable;
mod issue;
mod keysets;
mod melt;
mod restore;
mod subscription;
mod swap;
mod verification;

pub use subscription::PubSubManager;
pub use verification::Verification;

/// Default quote time to live in seconds
pub const DEFAULT_QUOTE_TTL: u64 = 60 * 60;

/// Default bound on a single melt payment attempt
pub const DEFAULT_MELT_TIMEOUT: Duration = Duration::from_secs(60);

/// Mint quote as stored by the mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuote {
    /// Quote id
    pub id: String,
    /// Amount of quote
    pub amount: Amount,
    /// Unit of quote
    pub unit: CurrencyUnit,
    /// Invoice the wallet must pay
    pub request: String,
    /// Quote state
    pub state: MintQuoteState,
    /// Expiration time of quote
    pub expiry: u64,
    /// Id the Lightning backend uses to look the invoice up
    pub request_lookup_id: String,
    /// Pubkey the quote is locked to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<PublicKey>,
}

impl MintQuote {
    /// Create new [`MintQuote`]
    pub fn new(
        request: String,
        unit: CurrencyUnit,
        amount: Amount,
        expiry: u64,
        request_lookup_id: String,
        pubkey: Option<PublicKey>,
    ) -> Self {
        let id = Uuid::new_v4();

        Self {
            id: id.to_string(),
            amount,
            unit,
            request,
            state: MintQuoteState::Unpaid,
            expiry,
            request_lookup_id,
            pubkey,
        }
    }
}

/// Melt quote as stored by the mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltQuote {
    /// Quote id
    pub id: String,
    /// Unit of quote
    pub unit: CurrencyUnit,
    /// Amount to be paid out
    pub amount: Amount,
    /// Invoice to be paid
    pub request: Bolt11Invoice,
    /// Fee reserved for the payment
    pub fee_reserve: Amount,
    /// Quote state
    pub state: MeltQuoteState,
    /// Expiration time of quote
    pub expiry: u64,
    /// Id the Lightning backend uses to look the payment up
    pub request_lookup_id: String,
    /// Preimage of the paid invoice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_preimage: Option<String>,
}

impl MeltQuote {
    /// Create new [`MeltQuote`]
    pub fn new(
        request: Bolt11Invoice,
        unit: CurrencyUnit,
        amount: Amount,
        fee_reserve: Amount,
        expiry: u64,
        request_lookup_id: String,
    ) -> Self {
        let id = Uuid::new_v4();

        Self {
            id: id.to_string(),
            unit,
            amount,
            request,
            fee_reserve,
            state: MeltQuoteState::Unpaid,
            expiry,
            request_lookup_id,
            payment_preimage: None,
        }
    }
}

/// Keyset metadata the mint persists; the keys themselves are re-derived
/// from the master key on startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintKeySetInfo {
    /// Keyset id
    pub id: Id,
    /// Keyset unit
    pub unit: CurrencyUnit,
    /// Whether the keyset is signing new outputs
    pub active: bool,
    /// When the keyset was created
    pub valid_from: u64,
    /// Index of the keyset under the per-unit derivation path; rotation
    /// increments it
    pub derivation_path_index: u32,
    /// Number of amounts in the keyset
    pub max_order: u8,
    /// Input fee in parts per thousand per proof
    pub input_fee_ppk: u64,
}

impl From<MintKeySetInfo> for crate::nuts::KeySetInfo {
    fn from(info: MintKeySetInfo) -> Self {
        Self {
            id: info.id,
            unit: info.unit,
            active: info.active,
            input_fee_ppk: info.input_fee_ppk,
        }
    }
}

/// Cashu mint
#[derive(Debug, Clone)]
pub struct Mint {
    /// Mint metadata
    pub mint_info: MintInfo,
    /// Storage backend
    pub localstore: Arc<dyn MintDatabase<Err = database::Error> + Send + Sync>,
    /// Lightning backend
    pub ln: Arc<dyn MintLightning + Send + Sync>,
    /// Subscription fan-out
    pub pubsub: Arc<PubSubManager>,
    /// Quote time to live in seconds
    pub quote_ttl: u64,
    /// Bound on a single melt payment attempt
    pub melt_timeout: Duration,
    xpriv: Xpriv,
    keysets: Arc<RwLock<HashMap<Id, MintKeySet>>>,
}

impl Mint {
    /// Create new [`Mint`]
    ///
    /// Ensures an active keyset exists for every unit in `supported_units`,
    /// generating or re-deriving them from `seed`. `supported_units` maps a
    /// unit to `(input_fee_ppk, max_order)`.
    pub async fn new(
        seed: &[u8],
        mint_info: MintInfo,
        localstore: Arc<dyn MintDatabase<Err = database::Error> + Send + Sync>,
        ln: Arc<dyn MintLightning + Send + Sync>,
        supported_units: HashMap<CurrencyUnit, (u64, u8)>,
    ) -> Result<Self, Error> {
        let xpriv = Xpriv::new_master(Network::Bitcoin, seed).map_err(crate::nuts::nut13::Error::from)?;

        let mut keysets = HashMap::new();

        let active_keysets = localstore.get_active_keysets().await?;

        for (unit, (input_fee_ppk, max_order)) in supported_units {
            match active_keysets.get(&unit) {
                Some(active_id) => {
                    let info = localstore
                        .get_keyset_info(active_id)
                        .await?
                        .ok_or(Error::UnknownKeySet)?;

                    let keyset = MintKeySet::generate(
                        &SECP256K1,
                        xpriv,
                        unit.clone(),
                        keysets::derivation_path_for_unit(&unit, info.derivation_path_index)?,
                        info.max_order,
                    );

                    if keyset.id != info.id {
                        tracing::error!(
                            "Derived keyset {} does not match stored {}",
                            keyset.id,
                            info.id
                        );
                        return Err(crate::nuts::nut02::Error::IdMismatch.into());
                    }

                    keysets.insert(keyset.id, keyset);
                }
                None => {
                    let keyset = MintKeySet::generate(
                        &SECP256K1,
                        xpriv,
                        unit.clone(),
                        keysets::derivation_path_for_unit(&unit, 0)?,
                        max_order.min(MAX_ORDER),
                    );

                    let info = MintKeySetInfo {
                        id: keyset.id,
                        unit: unit.clone(),
                        active: true,
                        valid_from: unix_time(),
                        derivation_path_index: 0,
                        max_order: max_order.min(MAX_ORDER),
                        input_fee_ppk,
                    };

                    localstore
                        .add_keyset_info(info)
                        .await?;
                    localstore
                        .set_active_keyset(unit, keyset.id)
                        .await?;

                    keysets.insert(keyset.id, keyset);
                }
            }
        }

        Ok(Self {
            mint_info,
            localstore,
            ln,
            pubsub: Arc::new(PubSubManager::default()),
            quote_ttl: DEFAULT_QUOTE_TTL,
            melt_timeout: DEFAULT_MELT_TIMEOUT,
            xpriv,
            keysets: Arc::new(RwLock::new(keysets)),
        })
    }

    /// Mint info
    pub fn mint_info(&self) -> &MintInfo {
        &self.mint_info
    }

    /// Sign a single blinded message with the keyset key for its amount
    pub async fn blind_sign(
        &self,
        blinded_message: &BlindedMessage,
    ) -> Result<BlindSignature, Error> {
        let BlindedMessage {
            amount,
            blinded_secret,
            keyset_id,
            ..
        } = blinded_message;

        let keyset_info = self
            .localstore
            .get_keyset_info(keyset_id)
            .await?
            .ok_or(Error::UnknownKeySet)?;

        let active = self
            .localstore
            .get_active_keyset_id(&keyset_info.unit)
            .await?
            .ok_or(Error::InactiveKeyset)?;

        // Outputs are only signed under the active keyset
        if keyset_info.id.ne(&active) {
            return Err(Error::InactiveKeyset);
        }

        let keysets = self.keysets.read().await;
        let keyset = keysets.get(keyset_id).ok_or(Error::UnknownKeySet)?;

        let key_pair = keyset
            .keys
            .amount_keypair(*amount)
            .ok_or(Error::AmountKey)?;

        let c = sign_message(&key_pair.secret_key, blinded_secret)?;

        let blinded_signature = BlindSignature::new(
            *amount,
            c,
            *keyset_id,
            &blinded_message.blinded_secret,
            key_pair.secret_key.clone(),
        )?;

        Ok(blinded_signature)
    }

    /// Verify the signature of a proof against its keyset key
    ///
    /// Does not check the spent set; that happens when the proof set is
    /// locked in the store. Spending conditions are checked separately
    /// since SIG_ALL conditions apply to a whole transaction.
    pub async fn verify_proof(&self, proof: &Proof) -> Result<(), Error> {
        let keysets = self.keysets.read().await;
        let keyset = keysets.get(&proof.keyset_id).ok_or(Error::UnknownKeySet)?;

        let keypair = keyset
            .keys
            .amount_keypair(proof.amount)
            .ok_or(Error::AmountKey)?;

        verify_message(&keypair.secret_key, proof.c, proof.secret.as_bytes())?;

        Ok(())
    }

    /// Verify the spending conditions of a single proof under SIG_INPUTS
    /// semantics
    ///
    /// Secrets that are not well-known secrets have no conditions and pass.
    pub fn verify_spending_conditions(&self, proof: &Proof) -> Result<(), Error> {
        if let Ok(secret) = Nut10Secret::try_from(&proof.secret) {
            match secret.kind {
                Kind::P2PK => proof.verify_p2pk()?,
                Kind::HTLC => proof.verify_htlc()?,
            }
        }

        Ok(())
    }

    /// Fee required to spend a proof set
    pub async fn get_proofs_fee(&self, proofs: &[Proof]) -> Result<Amount, Error> {
        let mut proofs_per_keyset = HashMap::new();
        let mut fee_per_keyset = HashMap::new();

        for proof in proofs {
            if let std::collections::hash_map::Entry::Vacant(e) =
                fee_per_keyset.entry(proof.keyset_id)
            {
                let keyset_info = self
                    .localstore
                    .get_keyset_info(&proof.keyset_id)
                    .await?
                    .ok_or(Error::UnknownKeySet)?;
                e.insert(keyset_info.input_fee_ppk);
            }

            proofs_per_keyset
                .entry(proof.keyset_id)
                .and_modify(|count| *count += 1)
                .or_insert(1);
        }

        crate::fees::calculate_fee(&proofs_per_keyset, &fee_per_keyset)
    }
}
