//! Send ecash

use serde::{Deserialize, Serialize};

use super::Wallet;
use crate::error::Error;
use crate::nuts::{ProofsMethods, SpendingConditions, State, Token};
use crate::types::ProofInfo;
use crate::Amount;

/// Configuration for a send
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendOptions {
    /// Memo carried in the token
    pub memo: Option<String>,
    /// Spending conditions to lock the sent proofs to
    pub conditions: Option<SpendingConditions>,
    /// Allow sending more than requested when exact change cannot be made
    /// without a swap
    pub allow_overpayment: bool,
    /// Bound overpayment to a percentage of the requested amount, zero for
    /// no percentage bound
    pub max_overpayment_percent: u64,
    /// Bound overpayment to an absolute amount, zero for no absolute bound
    pub max_overpayment_absolute: u64,
}

/// Outcome of a send
#[derive(Debug, Clone)]
pub struct SendResult {
    /// Token for the receiver
    pub token: Token,
    /// Amount that was asked for
    pub requested_amount: Amount,
    /// Amount actually sent, higher than requested on overpayment
    pub actual_amount: Amount,
    /// Difference between actual and requested amount
    pub overpayment: Amount,
    /// Whether the send fell back to the offline path
    pub was_offline: bool,
}

impl Wallet {
    /// Send `amount` as a token
    ///
    /// Exact sets are reserved directly; anything else is reshaped through
    /// a swap first. When the mint is unreachable and overpayment is
    /// allowed, a set within the overpayment bound is sent as-is.
    pub async fn send(&self, amount: Amount, opts: SendOptions) -> Result<SendResult, Error> {
        let available = self.get_unspent_proofs().await?;

        if available.total_amount()? < amount {
            return Err(Error::InsufficientFunds);
        }

        // An exact set needs no swap and pays no fee, unless the proofs
        // must be locked to new conditions
        if opts.conditions.is_none() {
            if let Some(exact) = Wallet::select_exact(amount, &available) {
                self.reserve_proofs(&exact).await?;

                return Ok(SendResult {
                    token: Token::new(
                        self.mint_url.clone(),
                        exact.clone(),
                        opts.memo,
                        Some(self.unit.clone()),
                    ),
                    requested_amount: amount,
                    actual_amount: amount,
                    overpayment: Amount::ZERO,
                    was_offline: false,
                });
            }
        }

        let selected = self.select_proofs(amount, available).await?;

        match self
            .swap(Some(amount), selected.clone(), opts.conditions.clone())
            .await
        {
            Ok(Some(send_proofs)) => {
                let actual = send_proofs.total_amount()?;

                Ok(SendResult {
                    token: Token::new(
                        self.mint_url.clone(),
                        send_proofs,
                        opts.memo,
                        Some(self.unit.clone()),
                    ),
                    requested_amount: amount,
                    actual_amount: actual,
                    overpayment: Amount::ZERO,
                    was_offline: false,
                })
            }
            Ok(None) => Err(Error::InsufficientFunds),
            Err(err) if err.is_network() && opts.allow_overpayment => {
                // The swap never connected; take the inputs back and send a
                // set as-is within the overpayment bound
                self.unreserve_proofs(selected.ys()?).await?;
                self.send_with_overpayment(amount, opts).await
            }
            Err(err) => Err(err),
        }
    }

    /// Offline fallback: send a set over the amount, bounded by the
    /// overpayment limits
    async fn send_with_overpayment(
        &self,
        amount: Amount,
        opts: SendOptions,
    ) -> Result<SendResult, Error> {
        let available = self.get_unspent_proofs().await?;

        let mut selected: Vec<_> = Vec::new();
        let mut sorted = available;
        sorted.sort_by(|a, b| b.cmp(a));

        let mut total = Amount::ZERO;
        for proof in sorted {
            if total >= amount {
                break;
            }
            total = total
                .checked_add(proof.amount)
                .ok_or(Error::AmountOverflow)?;
            selected.push(proof);
        }

        if total < amount {
            return Err(Error::InsufficientFunds);
        }

        let overpayment = total - amount;

        let percent_bound = match opts.max_overpayment_percent {
            0 => None,
            pct => Some(Amount::from(u64::from(amount) * pct / 100)),
        };
        let absolute_bound = match opts.max_overpayment_absolute {
            0 => None,
            abs => Some(Amount::from(abs)),
        };

        let bound = match (percent_bound, absolute_bound) {
            (Some(p), Some(a)) => Some(std::cmp::min(p, a)),
            (Some(p), None) => Some(p),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        };

        if let Some(bound) = bound {
            if overpayment > bound {
                tracing::warn!(
                    "Overpayment {} exceeds bound {}, refusing offline send",
                    overpayment,
                    bound
                );
                return Err(Error::InsufficientFunds);
            }
        }

        self.reserve_proofs(&selected).await?;

        tracing::info!(
            "Offline send of {} for requested {} (overpayment {})",
            total,
            amount,
            overpayment
        );

        Ok(SendResult {
            token: Token::new(
                self.mint_url.clone(),
                selected,
                opts.memo,
                Some(self.unit.clone()),
            ),
            requested_amount: amount,
            actual_amount: total,
            overpayment,
            was_offline: true,
        })
    }

    /// Claim back the proofs of a send that was never redeemed
    pub async fn reclaim_reserved(&self) -> Result<Amount, Error> {
        let reserved = self
            .localstore
            .get_proofs(
                Some(self.mint_url.clone()),
                Some(self.unit.clone()),
                Some(vec![State::Reserved]),
            )
            .await?;

        if reserved.is_empty() {
            return Ok(Amount::ZERO);
        }

        let states = self
            .check_proofs_spent(reserved.iter().map(|p| p.proof.clone()).collect())
            .await?;

        let unspent: Vec<ProofInfo> = reserved
            .into_iter()
            .zip(states)
            .filter(|(_, state)| state.state == State::Unspent)
            .map(|(info, _)| info)
            .collect();

        let amount = Amount::try_sum(unspent.iter().map(|p| p.proof.amount))?;

        self.localstore
            .update_proofs_state(unspent.into_iter().map(|p| p.y).collect(), State::Unspent)
            .await?;

        Ok(amount)
    }
}
