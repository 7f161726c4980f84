//! Swap

use super::Mint;
use crate::error::Error;
use crate::nuts::nut11;
use crate::nuts::{ProofState, ProofsMethods, State, SwapRequest, SwapResponse};

impl Mint {
    /// Process a swap request
    ///
    /// Inputs are locked in the spent set and signatures emitted together;
    /// any verification failure leaves the store untouched.
    pub async fn process_swap_request(
        &self,
        swap_request: SwapRequest,
    ) -> Result<SwapResponse, Error> {
        if swap_request.inputs.is_empty() {
            return Err(Error::Custom("Inputs cannot be empty".to_string()));
        }

        if swap_request.outputs.is_empty() {
            return Err(Error::Custom("Outputs cannot be empty".to_string()));
        }

        // Spending conditions. SIG_ALL commits to the whole transaction and
        // is verified in aggregate; SIG_INPUTS conditions are verified per
        // proof.
        if nut11::proofs_sig_all(&swap_request.inputs) {
            nut11::verify_sig_all(&swap_request.inputs, &swap_request.outputs)?;
        } else {
            for proof in &swap_request.inputs {
                self.verify_spending_conditions(proof)?;
            }
        }

        self.verify_transaction_balanced(&swap_request.inputs, &swap_request.outputs)
            .await?;

        let input_ys = swap_request.inputs.ys()?;

        // Lock the inputs; this is where a concurrent spend of any shared Y
        // loses
        self.localstore
            .add_proofs(swap_request.inputs.clone(), None)
            .await?;
        self.localstore
            .update_proofs_states(&input_ys, State::Pending)
            .await?;

        let mut promises = Vec::with_capacity(swap_request.outputs.len());

        for blinded_message in &swap_request.outputs {
            let blinded_signature = match self.blind_sign(blinded_message).await {
                Ok(signature) => signature,
                Err(err) => {
                    // Nothing was signed; release the inputs
                    self.localstore.remove_proofs(&input_ys).await?;
                    return Err(err);
                }
            };
            promises.push(blinded_signature);
        }

        let blinded_secrets: Vec<_> = swap_request
            .outputs
            .iter()
            .map(|o| o.blinded_secret)
            .collect();

        if let Err(err) = self
            .localstore
            .add_blind_signatures(&blinded_secrets, &promises, None)
            .await
        {
            self.localstore.remove_proofs(&input_ys).await?;
            return Err(err.into());
        }

        self.localstore
            .update_proofs_states(&input_ys, State::Spent)
            .await?;

        for y in input_ys {
            self.pubsub.broadcast_proof_state(ProofState {
                y,
                state: State::Spent,
                witness: None,
            });
        }

        Ok(SwapResponse::new(promises))
    }
}
