//! NUT-14: Hashed Time Lock Contracts (HTLC)
//!
//! <https://github.com/cashubtc/nuts/blob/main/14.md>

use std::str::FromStr;

use bitcoin::hashes::sha256::Hash as Sha256Hash;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::schnorr::Signature;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::nut00::{Proof, Witness};
use super::nut10::Secret;
use super::nut11::{valid_signatures, Conditions};
use super::Kind;
use crate::util::unix_time;

pub mod serde_htlc_witness;

/// NUT14 Errors
#[derive(Debug, Error)]
pub enum Error {
    /// Secret is not an HTLC secret
    #[error("Secret is not an HTLC secret")]
    IncorrectSecretKind,
    /// Hash lock in the secret is not a valid sha256 hash
    #[error("Hash lock is not valid")]
    InvalidHash,
    /// Preimage does not hash to the lock
    #[error("Preimage does not match")]
    Preimage,
    /// Witness signatures not provided
    #[error("Witness did not provide signatures")]
    SignaturesNotProvided,
    /// Not enough signatures for the lock conditions
    #[error("Not enough valid signatures provided")]
    NotEnoughSignatures,
    /// NUT11 error
    #[error(transparent)]
    Nut11(#[from] super::nut11::Error),
    /// Serde error
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// HTLC witness
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HTLCWitness {
    /// Preimage
    pub preimage: String,
    /// Signatures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signatures: Option<Vec<String>>,
}

impl Proof {
    /// Verify HTLC spending conditions
    pub fn verify_htlc(&self) -> Result<(), Error> {
        let secret: Secret = self
            .secret
            .clone()
            .try_into()
            .map_err(|_| Error::IncorrectSecretKind)?;

        if secret.kind != Kind::HTLC {
            return Err(Error::IncorrectSecretKind);
        }

        let conditions: Option<Conditions> = secret
            .secret_data
            .tags
            .clone()
            .and_then(|tags| tags.try_into().ok());

        let htlc_witness = match &self.witness {
            Some(Witness::HTLCWitness(witness)) => witness,
            _ => return Err(Error::SignaturesNotProvided),
        };

        if let Some(conditions) = &conditions {
            // Locktime fallback takes precedence over the hash lock
            if let Some(locktime) = conditions.locktime {
                if locktime.lt(&unix_time()) {
                    let refund_keys = conditions.refund_keys.clone().unwrap_or_default();

                    if refund_keys.is_empty() {
                        return Ok(());
                    }

                    let signatures = htlc_witness
                        .signatures
                        .as_ref()
                        .ok_or(Error::SignaturesNotProvided)?;

                    let signatures: Vec<Signature> = signatures
                        .iter()
                        .map(|s| {
                            Signature::from_str(s).map_err(|_| Error::SignaturesNotProvided)
                        })
                        .collect::<Result<_, _>>()?;

                    return match valid_signatures(
                        self.secret.as_bytes(),
                        &refund_keys,
                        &signatures,
                    ) >= 1
                    {
                        true => Ok(()),
                        false => Err(Error::NotEnoughSignatures),
                    };
                }
            }
        }

        let hash_lock =
            Sha256Hash::from_str(&secret.secret_data.data).map_err(|_| Error::InvalidHash)?;

        let preimage_hash = Sha256Hash::hash(htlc_witness.preimage.as_bytes());

        if hash_lock.ne(&preimage_hash) {
            return Err(Error::Preimage);
        }

        if let Some(conditions) = conditions {
            if let Some(pubkeys) = conditions.pubkeys {
                let req_sigs = conditions.num_sigs.unwrap_or(1);

                let signatures = htlc_witness
                    .signatures
                    .as_ref()
                    .ok_or(Error::SignaturesNotProvided)?;

                let signatures: Vec<Signature> = signatures
                    .iter()
                    .map(|s| Signature::from_str(s).map_err(|_| Error::SignaturesNotProvided))
                    .collect::<Result<_, _>>()?;

                if valid_signatures(self.secret.as_bytes(), &pubkeys, &signatures) < req_sigs {
                    return Err(Error::NotEnoughSignatures);
                }
            }
        }

        Ok(())
    }

    /// Add preimage to the proof witness
    #[inline]
    pub fn add_preimage(&mut self, preimage: String) {
        self.witness = Some(Witness::HTLCWitness(HTLCWitness {
            preimage,
            signatures: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::nuts::nut01::SecretKey;
    use crate::nuts::nut11::SpendingConditions;
    use crate::nuts::{Id, PublicKey, SigFlag};
    use crate::Amount;

    fn htlc_proof(conditions: SpendingConditions) -> Proof {
        let secret: super::super::nut10::Secret = conditions.into();
        let secret: crate::secret::Secret = secret.try_into().unwrap();

        Proof::new(
            Amount::from(1),
            Id::from_str("009a1f293253e41e").unwrap(),
            secret,
            PublicKey::from_str(
                "02698c4e2b5f9534cd0687d87513c759790cf829aa5739184a3e3735471fbda904",
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_preimage_verification() {
        let conditions = SpendingConditions::new_htlc("the-preimage", None).unwrap();

        let mut proof = htlc_proof(conditions);

        proof.add_preimage("wrong".to_string());
        assert!(matches!(proof.verify_htlc(), Err(Error::Preimage)));

        proof.add_preimage("the-preimage".to_string());
        assert!(proof.verify_htlc().is_ok());
    }

    #[test]
    fn test_preimage_with_signature() {
        let key = SecretKey::generate();

        let conditions = Conditions {
            locktime: None,
            pubkeys: Some(vec![key.public_key()]),
            refund_keys: None,
            num_sigs: None,
            sig_flag: SigFlag::SigInputs,
        };

        let spending =
            SpendingConditions::new_htlc("the-preimage", Some(conditions)).unwrap();

        let mut proof = htlc_proof(spending);

        // A valid preimage alone is not enough when pubkeys are set
        proof.add_preimage("the-preimage".to_string());
        assert!(proof.verify_htlc().is_err());

        let signature = key.sign(proof.secret.as_bytes()).unwrap();
        proof.witness = Some(Witness::HTLCWitness(HTLCWitness {
            preimage: "the-preimage".to_string(),
            signatures: Some(vec![signature.to_string()]),
        }));

        assert!(proof.verify_htlc().is_ok());
    }

    #[test]
    fn test_expired_locktime_no_refund_spendable() {
        let conditions = Conditions {
            locktime: Some(unix_time() - 100),
            pubkeys: None,
            refund_keys: None,
            num_sigs: None,
            sig_flag: SigFlag::SigInputs,
        };

        let spending = SpendingConditions::new_htlc("preimage", Some(conditions)).unwrap();

        let mut proof = htlc_proof(spending);
        proof.add_preimage("anything".to_string());

        assert!(proof.verify_htlc().is_ok());
    }
}
