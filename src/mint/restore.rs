//! Restore signatures

use super::Mint;
use crate::error::Error;
use crate::nuts::{PublicKey, RestoreRequest, RestoreResponse};

impl Mint {
    /// Return the signatures previously issued for the given outputs
    ///
    /// Outputs the mint has never signed are dropped from the response;
    /// order is preserved for the rest.
    pub async fn process_restore_request(
        &self,
        restore_request: RestoreRequest,
    ) -> Result<RestoreResponse, Error> {
        let blinded_secrets: Vec<PublicKey> = restore_request
            .outputs
            .iter()
            .map(|o| o.blinded_secret)
            .collect();

        let found = self
            .localstore
            .get_blind_signatures(&blinded_secrets)
            .await?;

        let mut outputs = Vec::new();
        let mut signatures = Vec::new();

        for (output, signature) in restore_request.outputs.into_iter().zip(found) {
            if let Some(signature) = signature {
                outputs.push(output);
                signatures.push(signature);
            }
        }

        Ok(RestoreResponse {
            outputs,
            signatures,
        })
    }
}
