//! Swap proofs for fresh ones

use super::Wallet;
use crate::amount::SplitTarget;
use crate::dhke::construct_proofs;
use crate::error::Error;
use crate::nuts::{
    nut10, PreMintSecrets, Proofs, ProofsMethods, SpendingConditions, State, SwapRequest,
};
use crate::types::ProofInfo;
use crate::Amount;

/// A prepared swap: the request and the secrets needed to unblind its
/// response
#[derive(Debug, Clone)]
pub struct PreSwap {
    /// Premint secrets for the outputs
    pub pre_mint_secrets: PreMintSecrets,
    /// Request to be posted
    pub swap_request: SwapRequest,
    /// How many secrets were derived from the counter
    pub derived_secret_count: u32,
    /// Input fee paid by the swap
    pub fee: Amount,
}

impl Wallet {
    /// Swap `input_proofs` at the mint
    ///
    /// With an `amount`, proofs summing to it are returned and the rest
    /// comes back as change; without, everything is reissued as change
    /// under fresh wallet secrets.
    ///
    /// On a protocol error the inputs are released back to unspent; on a
    /// network error they stay reserved for reconciliation since the mint
    /// may have processed the request.
    pub async fn swap(
        &self,
        amount: Option<Amount>,
        input_proofs: Proofs,
        spending_conditions: Option<SpendingConditions>,
    ) -> Result<Option<Proofs>, Error> {
        let pre_swap = self
            .create_swap(amount, input_proofs.clone(), spending_conditions.clone())
            .await?;

        let input_ys = input_proofs.ys()?;

        let swap_response = match self.client().post_swap(pre_swap.swap_request.clone()).await {
            Ok(response) => response,
            Err(err) if err.is_network() => {
                tracing::warn!("Swap outcome unknown, inputs stay reserved: {err}");
                return Err(err);
            }
            Err(err) => {
                self.unreserve_proofs(input_ys).await?;
                return Err(err);
            }
        };

        let active_keyset_id = pre_swap.pre_mint_secrets.keyset_id;

        let active_keys = self
            .localstore
            .get_keys(&active_keyset_id)
            .await?
            .ok_or(Error::NoActiveKeyset)?;

        let post_swap_proofs = construct_proofs(
            swap_response.signatures,
            pre_swap.pre_mint_secrets.rs(),
            pre_swap.pre_mint_secrets.secrets(),
            &active_keys,
        )?;

        self.verify_proofs_dleq(&post_swap_proofs).await?;

        self.localstore
            .increment_keyset_counter(&active_keyset_id, pre_swap.derived_secret_count)
            .await?;

        let mut added_proofs = Vec::new();
        let send_proofs = match amount {
            Some(amount) => {
                let (send_proofs, change_proofs) =
                    split_post_swap_proofs(post_swap_proofs, amount, &spending_conditions)?;

                let send_total = send_proofs.total_amount()?;
                if send_total.ne(&amount) {
                    tracing::warn!(
                        "Send proofs sum to {send_total}, expected {amount}"
                    );
                }

                for proof in send_proofs.clone() {
                    added_proofs.push(ProofInfo::new(
                        proof,
                        self.mint_url.clone(),
                        State::Reserved,
                        self.unit.clone(),
                    )?);
                }

                for proof in change_proofs {
                    added_proofs.push(ProofInfo::new(
                        proof,
                        self.mint_url.clone(),
                        State::Unspent,
                        self.unit.clone(),
                    )?);
                }

                Some(send_proofs)
            }
            None => {
                for proof in post_swap_proofs {
                    added_proofs.push(ProofInfo::new(
                        proof,
                        self.mint_url.clone(),
                        State::Unspent,
                        self.unit.clone(),
                    )?);
                }

                None
            }
        };

        // Inputs are spent, outputs take their place
        self.localstore
            .update_proofs(added_proofs, input_ys)
            .await?;

        Ok(send_proofs)
    }

    /// Swap proofs from the unspent pool to obtain `amount`
    pub async fn swap_from_unspent(
        &self,
        amount: Amount,
        spending_conditions: Option<SpendingConditions>,
    ) -> Result<Proofs, Error> {
        let available = self.get_unspent_proofs().await?;

        let selected = self.select_proofs(amount, available).await?;

        self.swap(Some(amount), selected, spending_conditions)
            .await?
            .ok_or(Error::InsufficientFunds)
    }

    /// Construct the swap request for the given inputs
    ///
    /// The inputs are reserved in the same breath so a concurrent operation
    /// cannot pick them up.
    pub async fn create_swap(
        &self,
        amount: Option<Amount>,
        proofs: Proofs,
        spending_conditions: Option<SpendingConditions>,
    ) -> Result<PreSwap, Error> {
        let active_keyset_id = self.fetch_active_keyset().await?.id;

        self.reserve_proofs(&proofs).await?;

        let proofs_total = proofs.total_amount()?;
        let fee = self.get_proofs_fee(&proofs).await?;

        let desired_amount = amount.unwrap_or(Amount::ZERO);

        let change_amount = proofs_total
            .checked_sub(desired_amount)
            .and_then(|amount| amount.checked_sub(fee))
            .ok_or(Error::InsufficientFunds)?;

        let mut count = self
            .localstore
            .get_keyset_counter(&active_keyset_id)
            .await?
            .map_or(0, |c| c + 1);

        let derived_secret_count;

        let (mut desired_messages, change_messages) = match spending_conditions {
            Some(conditions) => {
                let change_premint_secrets = PreMintSecrets::from_xpriv(
                    active_keyset_id,
                    count,
                    self.xpriv(),
                    change_amount,
                    &SplitTarget::default(),
                )?;

                derived_secret_count = change_premint_secrets.len();

                (
                    PreMintSecrets::with_conditions(
                        active_keyset_id,
                        desired_amount,
                        &SplitTarget::default(),
                        &conditions,
                    )?,
                    change_premint_secrets,
                )
            }
            None => {
                let premint_secrets = PreMintSecrets::from_xpriv(
                    active_keyset_id,
                    count,
                    self.xpriv(),
                    desired_amount,
                    &SplitTarget::default(),
                )?;

                count += premint_secrets.len() as u32;

                let change_premint_secrets = PreMintSecrets::from_xpriv(
                    active_keyset_id,
                    count,
                    self.xpriv(),
                    change_amount,
                    &SplitTarget::default(),
                )?;

                derived_secret_count =
                    premint_secrets.len() + change_premint_secrets.len();

                (premint_secrets, change_premint_secrets)
            }
        };

        desired_messages.combine(change_messages);
        // Sort by amount to avoid fingerprinting the send
        desired_messages.sort_secrets();

        let swap_request = SwapRequest::new(proofs, desired_messages.blinded_messages());

        Ok(PreSwap {
            pre_mint_secrets: desired_messages,
            swap_request,
            derived_secret_count: derived_secret_count as u32,
            fee,
        })
    }
}

/// Split the proofs of a swap response into the send set and the change
/// set
fn split_post_swap_proofs(
    proofs: Proofs,
    amount: Amount,
    spending_conditions: &Option<SpendingConditions>,
) -> Result<(Proofs, Proofs), Error> {
    match spending_conditions {
        // Outputs carrying a spending condition are the send set
        Some(_) => Ok(proofs.into_iter().partition(|p| {
            let nut10_secret: Result<nut10::Secret, _> = p.secret.clone().try_into();
            nut10_secret.is_ok()
        })),
        None => {
            let mut amount_split = amount.split();

            let mut send_proofs = Proofs::new();
            let mut change_proofs = Proofs::new();

            for proof in proofs {
                if let Some(idx) = amount_split.iter().position(|&a| a == proof.amount) {
                    send_proofs.push(proof);
                    amount_split.remove(idx);
                } else {
                    change_proofs.push(proof);
                }
            }

            Ok((send_proofs, change_proofs))
        }
    }
}
