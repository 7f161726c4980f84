//! NUT-03: Swap
//!
//! <https://github.com/cashubtc/nuts/blob/main/03.md>

use serde::{Deserialize, Serialize};

use super::nut00::{BlindSignature, BlindedMessage, Proofs};
use crate::Amount;

/// Swap request [NUT-03]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    /// Proofs that are to be spent in the swap
    pub inputs: Proofs,
    /// Blinded messages for the mint to sign
    pub outputs: Vec<BlindedMessage>,
}

impl SwapRequest {
    /// Create new [`SwapRequest`]
    pub fn new(inputs: Proofs, outputs: Vec<BlindedMessage>) -> Self {
        Self { inputs, outputs }
    }

    /// Total value of proofs in the request
    pub fn input_amount(&self) -> Result<Amount, crate::amount::Error> {
        Amount::try_sum(self.inputs.iter().map(|proof| proof.amount))
    }

    /// Total value of outputs in the request
    pub fn output_amount(&self) -> Result<Amount, crate::amount::Error> {
        Amount::try_sum(self.outputs.iter().map(|output| output.amount))
    }
}

/// Swap response [NUT-03]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapResponse {
    /// Blinded signatures for the outputs
    pub signatures: Vec<BlindSignature>,
}

impl SwapResponse {
    /// Create new [`SwapResponse`]
    pub fn new(promises: Vec<BlindSignature>) -> Self {
        Self {
            signatures: promises,
        }
    }

    /// Total value of the signatures
    pub fn promises_amount(&self) -> Result<Amount, crate::amount::Error> {
        Amount::try_sum(self.signatures.iter().map(|s| s.amount))
    }
}
