//! Proof store access and selection

use super::Wallet;
use crate::error::Error;
use crate::nuts::{Proof, Proofs, ProofsMethods, PublicKey, State};
use crate::Amount;

impl Wallet {
    /// Get unspent proofs for the wallet's mint
    pub async fn get_unspent_proofs(&self) -> Result<Proofs, Error> {
        Ok(self
            .localstore
            .get_proofs(
                Some(self.mint_url.clone()),
                Some(self.unit.clone()),
                Some(vec![State::Unspent]),
            )
            .await?
            .into_iter()
            .map(|p| p.proof)
            .collect())
    }

    /// Get proofs reserved for an outgoing send
    pub async fn get_reserved_proofs(&self) -> Result<Proofs, Error> {
        Ok(self
            .localstore
            .get_proofs(
                Some(self.mint_url.clone()),
                Some(self.unit.clone()),
                Some(vec![State::Reserved]),
            )
            .await?
            .into_iter()
            .map(|p| p.proof)
            .collect())
    }

    /// Get proofs locked to an in-flight operation
    pub async fn get_pending_proofs(&self) -> Result<Proofs, Error> {
        Ok(self
            .localstore
            .get_proofs(
                Some(self.mint_url.clone()),
                Some(self.unit.clone()),
                Some(vec![State::Pending]),
            )
            .await?
            .into_iter()
            .map(|p| p.proof)
            .collect())
    }

    /// Return reserved proofs to unspent so they can be selected again
    pub async fn unreserve_proofs(&self, ys: Vec<PublicKey>) -> Result<(), Error> {
        Ok(self
            .localstore
            .update_proofs_state(ys, State::Unspent)
            .await?)
    }

    /// Atomically reserve the given proofs for an operation
    pub(crate) async fn reserve_proofs(&self, proofs: &Proofs) -> Result<Vec<PublicKey>, Error> {
        let ys = proofs.ys()?;
        self.localstore
            .update_proofs_state(ys.clone(), State::Reserved)
            .await?;
        Ok(ys)
    }

    /// Select proofs to cover `amount` plus the input fees of the selected
    /// set
    ///
    /// Proofs from inactive keysets are preferred so old keysets drain
    /// first; within each group selection is greedy, largest first.
    pub async fn select_proofs(&self, amount: Amount, proofs: Proofs) -> Result<Proofs, Error> {
        let keysets = self.load_mint_keysets().await?;
        let active_ids: Vec<_> = keysets
            .iter()
            .filter(|keyset| keyset.active)
            .map(|keyset| keyset.id)
            .collect();

        let (mut active_proofs, mut inactive_proofs): (Proofs, Proofs) = proofs
            .into_iter()
            .partition(|p| active_ids.contains(&p.keyset_id));

        // Largest first
        inactive_proofs.sort_by(|a: &Proof, b: &Proof| b.cmp(a));
        active_proofs.sort_by(|a: &Proof, b: &Proof| b.cmp(a));

        let mut selected: Proofs = Vec::new();

        for proof in inactive_proofs.into_iter().chain(active_proofs) {
            selected.push(proof);

            let selected_total = selected.total_amount()?;
            let fee = self.get_proofs_fee(&selected).await?;

            if selected_total >= amount.checked_add(fee).ok_or(Error::AmountOverflow)? {
                return Ok(selected);
            }
        }

        Err(Error::InsufficientFunds)
    }

    /// Select proofs summing to exactly `amount`, if such a set falls out
    /// of the greedy walk
    pub(crate) fn select_exact(amount: Amount, proofs: &Proofs) -> Option<Proofs> {
        let mut sorted: Vec<&Proof> = proofs.iter().collect();
        sorted.sort_by(|a, b| b.cmp(a));

        let mut selected: Proofs = Vec::new();
        let mut remaining = amount;

        for proof in sorted {
            if proof.amount <= remaining {
                remaining = remaining.checked_sub(proof.amount)?;
                selected.push(proof.clone());

                if remaining == Amount::ZERO {
                    return Some(selected);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::nuts::Id;
    use crate::secret::Secret;

    fn proof(amount: u64) -> Proof {
        Proof::new(
            Amount::from(amount),
            Id::from_str("009a1f293253e41e").unwrap(),
            Secret::generate(),
            crate::nuts::SecretKey::generate().public_key(),
        )
    }

    #[test]
    fn select_exact_prefers_exact_sets() {
        let proofs = vec![proof(32), proof(8), proof(2), proof(1)];

        let selected = Wallet::select_exact(Amount::from(11), &proofs).unwrap();
        assert_eq!(selected.total_amount().unwrap(), Amount::from(11));

        let selected = Wallet::select_exact(Amount::from(43), &proofs).unwrap();
        assert_eq!(selected.total_amount().unwrap(), Amount::from(43));

        assert!(Wallet::select_exact(Amount::from(5), &proofs).is_none());
    }
}
