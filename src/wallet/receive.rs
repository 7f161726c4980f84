//! Receive ecash

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Wallet;
use crate::amount::SplitTarget;
use crate::dhke::construct_proofs;
use crate::error::Error;
use crate::nuts::{
    nut10, nut11, Kind, PreMintSecrets, Proofs, ProofsMethods, SecretKey, State, SwapRequest,
    Token,
};
use crate::types::ProofInfo;
use crate::Amount;

/// Configuration for a receive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiveOptions {
    /// Keys to sign P2PK locked proofs with
    pub p2pk_signing_keys: Vec<SecretKey>,
    /// Preimages for HTLC locked proofs
    pub preimages: Vec<String>,
}

impl Wallet {
    /// Receive a serialized token
    pub async fn receive(&self, token: &str, opts: ReceiveOptions) -> Result<Amount, Error> {
        let token = Token::from_str(token)?;
        self.receive_token(&token, opts).await
    }

    /// Receive a token, swapping its proofs for fresh ones under the
    /// wallet's own secrets
    ///
    /// DLEQ proofs are verified for every proof that carries one. The swap
    /// makes the receive final: the sender can no longer reclaim.
    pub async fn receive_token(
        &self,
        token: &Token,
        opts: ReceiveOptions,
    ) -> Result<Amount, Error> {
        let token_mint = token.mint_url()?;

        if token_mint != self.mint_url {
            return Err(Error::IncorrectWallet(format!(
                "Should be {} not {}",
                self.mint_url, token_mint
            )));
        }

        if let Some(unit) = token.unit() {
            if unit != &self.unit {
                return Err(Error::UnitMismatch);
            }
        }

        let proofs = token
            .proofs()
            .remove(&token_mint)
            .ok_or(crate::nuts::nut00::Error::ProofsRequired)?;

        self.receive_proofs(proofs, opts).await
    }

    /// Receive bare proofs
    pub async fn receive_proofs(
        &self,
        mut proofs: Proofs,
        opts: ReceiveOptions,
    ) -> Result<Amount, Error> {
        if proofs.is_empty() {
            return Err(crate::nuts::nut00::Error::ProofsRequired.into());
        }

        // Keysets must be known before fees and keys can be resolved
        self.refresh_mint_keysets().await?;
        for proof in &proofs {
            self.get_keyset_keys(proof.keyset_id).await?;
        }

        self.verify_proofs_dleq(&proofs).await?;

        let sig_all = nut11::proofs_sig_all(&proofs);

        // Satisfy spending conditions on the inputs
        for proof in proofs.iter_mut() {
            if let Ok(secret) = nut10::Secret::try_from(&proof.secret) {
                match secret.kind {
                    Kind::P2PK if !sig_all => {
                        for key in &opts.p2pk_signing_keys {
                            proof.sign_p2pk(key.clone())?;
                        }
                    }
                    Kind::HTLC => {
                        if let Some(preimage) = opts.preimages.first() {
                            let witness_sigs: Option<Vec<String>> = None;
                            proof.witness = Some(crate::nuts::Witness::HTLCWitness(
                                crate::nuts::HTLCWitness {
                                    preimage: preimage.clone(),
                                    signatures: witness_sigs,
                                },
                            ));
                        }

                        for key in &opts.p2pk_signing_keys {
                            let signature = key.sign(proof.secret.as_bytes())?;
                            if let Some(witness) = proof.witness.as_mut() {
                                witness.add_signatures(vec![signature.to_string()]);
                            }
                        }
                    }
                    _ => (),
                }
            }
        }

        // When receiving a token made from this wallet's own proofs, the
        // reserved originals must go away with the swap
        let input_ys = proofs.ys()?;

        let proofs_total = proofs.total_amount()?;
        let fee = self.get_proofs_fee(&proofs).await?;

        let receive_amount = proofs_total
            .checked_sub(fee)
            .ok_or(Error::InsufficientFunds)?;

        let active_keyset_id = self.fetch_active_keyset().await?.id;

        let count = self
            .localstore
            .get_keyset_counter(&active_keyset_id)
            .await?
            .map_or(0, |c| c + 1);

        let premint_secrets = PreMintSecrets::from_xpriv(
            active_keyset_id,
            count,
            self.xpriv(),
            receive_amount,
            &SplitTarget::default(),
        )?;

        let outputs = premint_secrets.blinded_messages();

        // A SIG_ALL transaction is signed over all inputs and outputs once
        // the outputs are known
        if sig_all {
            let mut signed = false;
            for key in &opts.p2pk_signing_keys {
                if nut11::sign_sig_all(&mut proofs, &outputs, key).is_ok() {
                    signed = true;
                }
            }
            if !signed {
                return Err(nut11::Error::SignaturesNotProvided.into());
            }
        }

        let swap_request = SwapRequest::new(proofs, outputs);

        let swap_response = self.client().post_swap(swap_request).await?;

        let keys = self.get_keyset_keys(active_keyset_id).await?;

        let new_proofs = construct_proofs(
            swap_response.signatures,
            premint_secrets.rs(),
            premint_secrets.secrets(),
            &keys,
        )?;

        self.verify_proofs_dleq(&new_proofs).await?;

        self.localstore
            .increment_keyset_counter(&active_keyset_id, new_proofs.len() as u32)
            .await?;

        let received = new_proofs.total_amount()?;

        let proof_infos = new_proofs
            .into_iter()
            .map(|proof| {
                ProofInfo::new(
                    proof,
                    self.mint_url.clone(),
                    State::Unspent,
                    self.unit.clone(),
                )
            })
            .collect::<Result<Vec<ProofInfo>, _>>()?;

        self.localstore.update_proofs(proof_infos, input_ys).await?;

        Ok(received)
    }

    /// Check that every proof of a token is locked to the expected
    /// conditions
    ///
    /// Lets a wallet accept a locked token offline while bounding the risk
    /// of the sender clawing it back: the proofs must be spendable by the
    /// expected keys, with at least the expected threshold, and any refund
    /// path must not open earlier than agreed.
    pub fn verify_token_p2pk(
        &self,
        token: &Token,
        spending_conditions: &crate::nuts::SpendingConditions,
    ) -> Result<(), Error> {
        let expected_pubkeys = spending_conditions.pubkeys().unwrap_or_default();
        let expected_num_sigs = spending_conditions.num_sigs();
        let expected_locktime = spending_conditions.locktime();
        let expected_refund = spending_conditions.refund_keys();

        if token.mint_url()? != self.mint_url {
            return Err(Error::IncorrectWallet(format!(
                "Should be {} not {}",
                self.mint_url,
                token.mint_url()?
            )));
        }

        for (_mint, proofs) in token.proofs() {
            for proof in proofs {
                let secret: nut10::Secret = (&proof.secret)
                    .try_into()
                    .map_err(|_| Error::Custom("Proof is not locked".to_string()))?;

                let proof_conditions: crate::nuts::SpendingConditions = secret.try_into()?;

                if proof_conditions.kind() != spending_conditions.kind() {
                    return Err(Error::Custom(
                        "Proof locked under a different condition kind".to_string(),
                    ));
                }

                if expected_num_sigs != proof_conditions.num_sigs() {
                    return Err(Error::Custom(
                        "Signature threshold does not match".to_string(),
                    ));
                }

                let proof_pubkeys = proof_conditions.pubkeys().unwrap_or_default();
                if proof_pubkeys.len() != expected_pubkeys.len()
                    || !proof_pubkeys.iter().all(|pk| expected_pubkeys.contains(pk))
                {
                    return Err(Error::Custom(
                        "Proof is not locked to the expected keys".to_string(),
                    ));
                }

                match (proof_conditions.locktime(), expected_locktime) {
                    (None, None) => (),
                    // A proof unlocking earlier than agreed can be clawed
                    // back
                    (Some(proof_locktime), Some(expected)) if proof_locktime >= expected => (),
                    _ => {
                        return Err(Error::Custom(
                            "Proof locktime earlier than expected".to_string(),
                        ))
                    }
                }

                if let Some(proof_refund) = proof_conditions.refund_keys() {
                    let allowed = expected_refund
                        .as_ref()
                        .map(|keys| proof_refund.iter().all(|pk| keys.contains(pk)))
                        .unwrap_or(false);

                    if !allowed {
                        return Err(Error::Custom(
                            "Refund key not allowed by expected conditions".to_string(),
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}
