//! Proof state lookup

use super::Mint;
use crate::error::Error;
use crate::nuts::{CheckStateRequest, CheckStateResponse, ProofState, State};

impl Mint {
    /// Check the state of proofs by Y
    ///
    /// A Y the mint has never seen is unspent.
    pub async fn check_state(
        &self,
        check_state: &CheckStateRequest,
    ) -> Result<CheckStateResponse, Error> {
        let states = self.localstore.get_proofs_states(&check_state.ys).await?;

        let proofs = self.localstore.get_proofs_by_ys(&check_state.ys).await?;

        let states = check_state
            .ys
            .iter()
            .zip(states)
            .zip(proofs)
            .map(|((y, state), proof)| {
                let state = state.unwrap_or(State::Unspent);

                // Spent proofs echo their witness so observers of a shared
                // lock can learn the preimage
                let witness = match state {
                    State::Spent => proof
                        .and_then(|p| p.witness)
                        .and_then(|w| serde_json::to_string(&w).ok()),
                    _ => None,
                };

                ProofState {
                    y: *y,
                    state,
                    witness,
                }
            })
            .collect();

        Ok(CheckStateResponse { states })
    }
}
