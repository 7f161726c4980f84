//! Melt ecash into Lightning payments

use std::str::FromStr;

use lightning_invoice::Bolt11Invoice;

use super::Wallet;
use crate::dhke::construct_proofs;
use crate::error::Error;
use crate::nuts::{
    MeltBolt11Request, MeltQuoteBolt11Request, MeltQuoteBolt11Response, MeltQuoteState,
    PreMintSecrets, ProofsMethods, State,
};
use crate::types::{Melted, MeltQuote, ProofInfo};
use crate::Amount;

impl Wallet {
    /// Request a quote to pay a bolt11 invoice
    pub async fn melt_quote(&self, request: &str) -> Result<MeltQuote, Error> {
        let invoice = Bolt11Invoice::from_str(request)?;

        let quote_res = self
            .client()
            .post_melt_quote(MeltQuoteBolt11Request {
                request: invoice.clone(),
                unit: self.unit.clone(),
            })
            .await?;

        let quote = MeltQuote {
            id: quote_res.quote,
            unit: self.unit.clone(),
            amount: quote_res.amount,
            request: request.to_string(),
            fee_reserve: quote_res.fee_reserve,
            state: quote_res.state,
            expiry: quote_res.expiry,
            payment_preimage: quote_res.payment_preimage,
        };

        self.localstore.add_melt_quote(quote.clone()).await?;

        Ok(quote)
    }

    /// Check the state of a melt quote with the mint and sync the stored
    /// copy
    ///
    /// This is the reconciliation path for melts that were left pending.
    pub async fn melt_quote_state(
        &self,
        quote_id: &str,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        let response = self.client().get_melt_quote_status(quote_id).await?;

        if let Some(quote) = self.localstore.get_melt_quote(quote_id).await? {
            let mut quote = quote;
            quote.state = response.state;
            quote.payment_preimage = response.payment_preimage.clone();
            self.localstore.add_melt_quote(quote).await?;
        }

        match response.state {
            // The payment settled; pending proofs are gone for good
            MeltQuoteState::Paid => {
                let pending = self.get_pending_proofs().await?;
                if !pending.is_empty() {
                    self.localstore
                        .update_proofs(vec![], pending.ys()?)
                        .await?;
                }
            }
            // The payment failed; pending proofs are spendable again
            MeltQuoteState::Unpaid => {
                let pending = self.get_pending_proofs().await?;
                if !pending.is_empty() {
                    self.localstore
                        .update_proofs_state(pending.ys()?, State::Unspent)
                        .await?;
                }
            }
            MeltQuoteState::Pending => (),
        }

        Ok(response)
    }

    /// Pay the invoice behind a stored melt quote
    ///
    /// Proofs are locked while the payment is in flight. A definite
    /// failure releases them; an ambiguous outcome keeps them locked and
    /// the quote pending for [`melt_quote_state`] reconciliation.
    ///
    /// [`melt_quote_state`]: Wallet::melt_quote_state
    pub async fn melt(&self, quote_id: &str) -> Result<Melted, Error> {
        let quote_info = self
            .localstore
            .get_melt_quote(quote_id)
            .await?
            .ok_or(Error::UnknownQuote)?;

        let required = quote_info
            .amount
            .checked_add(quote_info.fee_reserve)
            .ok_or(Error::AmountOverflow)?;

        let available = self.get_unspent_proofs().await?;
        let selected = self.select_proofs(required, available).await?;

        let input_ys = self.reserve_proofs(&selected).await?;

        // Blank outputs for fee reserve change [NUT-08]
        let active_keyset_id = self.fetch_active_keyset().await?.id;
        let count = self
            .localstore
            .get_keyset_counter(&active_keyset_id)
            .await?
            .map_or(0, |c| c + 1);

        // Enough blank outputs to carry back any possible change
        let max_change = selected
            .total_amount()?
            .checked_sub(quote_info.amount)
            .unwrap_or(Amount::ZERO);
        let change_count = std::cmp::max(max_change.split().len(), 1) as u32;
        let premint_secrets = PreMintSecrets::restore_batch(
            active_keyset_id,
            self.xpriv(),
            count,
            count + change_count - 1,
        )?;

        let request = MeltBolt11Request {
            quote: quote_id.to_string(),
            inputs: selected.clone(),
            outputs: Some(premint_secrets.blinded_messages()),
        };

        // Lock the proofs to the in-flight payment
        self.localstore
            .update_proofs_state(input_ys.clone(), State::Pending)
            .await?;

        let response = match self.client().post_melt(request).await {
            Ok(response) => response,
            Err(err) => {
                return self
                    .reconcile_failed_melt(quote_id, input_ys, err)
                    .await;
            }
        };

        self.finish_melt(quote_info, selected, response, premint_secrets)
            .await
    }

    /// Sort out a melt whose request did not return cleanly
    async fn reconcile_failed_melt(
        &self,
        quote_id: &str,
        input_ys: Vec<crate::nuts::PublicKey>,
        err: Error,
    ) -> Result<Melted, Error> {
        if err.is_network() {
            tracing::warn!(
                "Melt {} outcome unknown, proofs stay pending: {err}",
                quote_id
            );
            return Err(err);
        }

        // Ask the mint what actually happened
        match self.client().get_melt_quote_status(quote_id).await {
            Ok(state) if state.state == MeltQuoteState::Pending => {
                tracing::warn!("Melt {} still pending at mint", quote_id);
                Err(Error::PaymentPending)
            }
            Ok(state) if state.state == MeltQuoteState::Paid => {
                // Paid underneath us; the pending proofs are spent
                self.localstore.update_proofs(vec![], input_ys).await?;
                Err(err)
            }
            _ => {
                // Definitely unpaid: release the proofs
                self.localstore
                    .update_proofs_state(input_ys, State::Unspent)
                    .await?;
                Err(err)
            }
        }
    }

    /// Book the outcome of a settled melt
    async fn finish_melt(
        &self,
        quote_info: MeltQuote,
        inputs: crate::nuts::Proofs,
        response: MeltQuoteBolt11Response,
        premint_secrets: PreMintSecrets,
    ) -> Result<Melted, Error> {
        match response.state {
            MeltQuoteState::Paid => (),
            MeltQuoteState::Pending => {
                tracing::warn!("Melt {} pending, proofs stay locked", quote_info.id);
                return Err(Error::PaymentPending);
            }
            MeltQuoteState::Unpaid => {
                self.localstore
                    .update_proofs_state(inputs.ys()?, State::Unspent)
                    .await?;
                return Err(Error::PaymentFailed);
            }
        }

        // Unblind fee reserve change, if the mint returned any
        let change_proofs = match response.change.clone() {
            Some(change) => {
                let keys = self.get_keyset_keys(premint_secrets.keyset_id).await?;

                // The mint signs change over the first outputs in order
                let count = change.len();
                let proofs = construct_proofs(
                    change,
                    premint_secrets.rs()[..count].to_vec(),
                    premint_secrets.secrets()[..count].to_vec(),
                    &keys,
                )?;

                self.localstore
                    .increment_keyset_counter(&premint_secrets.keyset_id, count as u32)
                    .await?;

                Some(proofs)
            }
            None => None,
        };

        let melted = Melted::from_proofs(
            MeltQuoteState::Paid,
            response.payment_preimage.clone(),
            quote_info.amount,
            inputs.clone(),
            change_proofs.clone(),
        )?;

        let mut added = Vec::new();
        if let Some(change_proofs) = change_proofs {
            for proof in change_proofs {
                added.push(ProofInfo::new(
                    proof,
                    self.mint_url.clone(),
                    State::Unspent,
                    self.unit.clone(),
                )?);
            }
        }

        // Inputs are spent, change joins the pool
        self.localstore.update_proofs(added, inputs.ys()?).await?;
        self.localstore.remove_melt_quote(&quote_info.id).await?;

        tracing::info!(
            "Melt {} paid {} with fee {}",
            quote_info.id,
            melted.amount,
            melted.fee_paid
        );

        Ok(melted)
    }

    /// Total amount a melt of `amount` may cost including the fee reserve
    pub async fn melt_cost(&self, quote_id: &str) -> Result<Amount, Error> {
        let quote = self
            .localstore
            .get_melt_quote(quote_id)
            .await?
            .ok_or(Error::UnknownQuote)?;

        quote
            .amount
            .checked_add(quote.fee_reserve)
            .ok_or(Error::AmountOverflow)
    }
}
