//! Melt ecash into Lightning payments

use tokio::time::timeout;

use super::{MeltQuote, Mint};
use crate::error::Error;
use crate::nuts::nut11;
use crate::nuts::{
    BlindSignature, MeltBolt11Request, MeltQuoteBolt11Request, MeltQuoteBolt11Response,
    MeltQuoteState, ProofState, ProofsMethods, State,
};
use crate::util::unix_time;
use crate::Amount;

impl Mint {
    /// Create a new melt quote for a bolt11 invoice
    pub async fn get_melt_quote(
        &self,
        request: MeltQuoteBolt11Request,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        let MeltQuoteBolt11Request { request, unit } = request;

        let amount_msat = request
            .amount_milli_satoshis()
            .ok_or(Error::AmountlessInvoice)?;

        let amount = Amount::from(amount_msat / 1000);

        let fee_reserve = self.ln.fee_reserve(amount);

        let quote = MeltQuote::new(
            request.clone(),
            unit,
            amount,
            fee_reserve,
            unix_time() + self.quote_ttl,
            request.payment_hash().to_string(),
        );

        tracing::debug!(
            "New melt quote {} for {} with fee reserve {}",
            quote.id,
            quote.amount,
            quote.fee_reserve
        );

        self.localstore.add_melt_quote(quote.clone()).await?;

        Ok(melt_quote_response(&quote))
    }

    /// Look up the state of a melt quote
    pub async fn check_melt_quote(&self, quote_id: &str) -> Result<MeltQuoteBolt11Response, Error> {
        let quote = self
            .localstore
            .get_melt_quote(quote_id)
            .await?
            .ok_or(Error::UnknownQuote)?;

        Ok(melt_quote_response(&quote))
    }

    /// Process a melt request
    ///
    /// Inputs are locked to the quote while the payment is in flight; a
    /// definite failure releases them, an ambiguous outcome keeps quote and
    /// inputs pending for later reconciliation.
    pub async fn process_melt_request(
        &self,
        melt_request: MeltBolt11Request,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        let quote = self
            .localstore
            .get_melt_quote(&melt_request.quote)
            .await?
            .ok_or(Error::UnknownQuote)?;

        match quote.state {
            MeltQuoteState::Unpaid => (),
            MeltQuoteState::Pending => return Err(Error::PendingQuote),
            MeltQuoteState::Paid => return Err(Error::PaidQuote),
        }

        if quote.expiry.ne(&0) && quote.expiry.lt(&unix_time()) {
            return Err(Error::ExpiredQuote(quote.expiry, unix_time()));
        }

        // SIG_ALL commits to outputs the melt contract does not have
        if nut11::proofs_sig_all(&melt_request.inputs) {
            return Err(Error::SigAllOnlySwap);
        }

        for proof in &melt_request.inputs {
            self.verify_spending_conditions(proof)?;
        }

        let input_verification = self.verify_inputs(&melt_request.inputs).await?;

        if input_verification.unit != quote.unit {
            return Err(Error::UnitMismatch);
        }

        let inputs_amount = input_verification.amount;
        let required = quote
            .amount
            .checked_add(quote.fee_reserve)
            .ok_or(Error::AmountOverflow)?;

        if inputs_amount < required {
            return Err(Error::TransactionUnbalanced(
                inputs_amount.into(),
                quote.amount.into(),
                quote.fee_reserve.into(),
            ));
        }

        if let Some(outputs) = &melt_request.outputs {
            self.verify_outputs(outputs).await?;
        }

        let input_ys = melt_request.inputs.ys()?;

        // Lock inputs to the quote and mark the quote in flight in one
        // logical step
        self.localstore
            .add_proofs(melt_request.inputs.clone(), Some(quote.id.clone()))
            .await?;
        self.localstore
            .update_proofs_states(&input_ys, State::Pending)
            .await?;
        self.localstore
            .update_melt_quote_state(&quote.id, MeltQuoteState::Pending)
            .await?;

        let pay_result = timeout(
            self.melt_timeout,
            self.ln
                .pay_invoice(quote.request.clone(), Some(quote.fee_reserve), self.melt_timeout),
        )
        .await;

        let pay_response = match pay_result {
            // Backend gave a definite or pending answer
            Ok(Ok(response)) => response,
            // Backend reported a definite failure: roll back
            Ok(Err(crate::lightning::Error::PaymentFailed(err))) => {
                tracing::warn!("Melt {} payment failed: {}", quote.id, err);

                self.localstore.remove_proofs(&input_ys).await?;
                self.localstore
                    .update_melt_quote_state(&quote.id, MeltQuoteState::Unpaid)
                    .await?;

                return Err(Error::PaymentFailed);
            }
            Ok(Err(err)) => {
                // Unclassified backend error: must not release the inputs
                tracing::error!("Melt {} backend error: {}", quote.id, err);
                return Err(Error::PaymentPending);
            }
            // Timed out: outcome unknown, keep everything pending
            Err(_) => {
                tracing::warn!("Melt {} timed out, leaving quote pending", quote.id);
                return Err(Error::PaymentPending);
            }
        };

        match pay_response.status {
            MeltQuoteState::Paid => (),
            MeltQuoteState::Pending => {
                tracing::warn!("Melt {} payment pending", quote.id);
                return Err(Error::PaymentPending);
            }
            MeltQuoteState::Unpaid => {
                self.localstore.remove_proofs(&input_ys).await?;
                self.localstore
                    .update_melt_quote_state(&quote.id, MeltQuoteState::Unpaid)
                    .await?;
                return Err(Error::PaymentFailed);
            }
        }

        // Payment went through: spend the inputs, store the preimage and
        // return unused fee reserve as change
        self.localstore
            .update_proofs_states(&input_ys, State::Spent)
            .await?;
        self.localstore
            .update_melt_quote_state(&quote.id, MeltQuoteState::Paid)
            .await?;
        self.localstore
            .update_melt_quote_preimage(&quote.id, pay_response.payment_preimage.clone())
            .await?;

        let change = self
            .sign_melt_change(&melt_request, inputs_amount, pay_response.total_spent)
            .await?;

        for y in input_ys {
            self.pubsub.broadcast_proof_state(ProofState {
                y,
                state: State::Spent,
                witness: None,
            });
        }

        let mut paid_quote = quote.clone();
        paid_quote.state = MeltQuoteState::Paid;
        paid_quote.payment_preimage = pay_response.payment_preimage.clone();
        self.pubsub.broadcast_melt_quote(&paid_quote);

        Ok(MeltQuoteBolt11Response {
            quote: quote.id,
            amount: quote.amount,
            fee_reserve: quote.fee_reserve,
            state: MeltQuoteState::Paid,
            expiry: quote.expiry,
            payment_preimage: pay_response.payment_preimage,
            change,
        })
    }

    /// Sign change for the unused fee reserve over the blank outputs of the
    /// request
    async fn sign_melt_change(
        &self,
        melt_request: &MeltBolt11Request,
        inputs_amount: Amount,
        total_spent: Amount,
    ) -> Result<Option<Vec<BlindSignature>>, Error> {
        let outputs = match &melt_request.outputs {
            Some(outputs) if !outputs.is_empty() => outputs,
            _ => return Ok(None),
        };

        let change_amount = match inputs_amount.checked_sub(total_spent) {
            Some(change) if change > Amount::ZERO => change,
            _ => return Ok(None),
        };

        let mut amounts = change_amount.split();

        if amounts.len() > outputs.len() {
            tracing::debug!(
                "Too few change outputs: dropping {} of {} change parts",
                amounts.len() - outputs.len(),
                amounts.len()
            );
            amounts.truncate(outputs.len());
        }

        let mut change = Vec::with_capacity(amounts.len());
        let mut signed_messages = Vec::with_capacity(amounts.len());

        for (amount, output) in amounts.into_iter().zip(outputs) {
            let mut message = output.clone();
            message.amount = amount;

            let signature = self.blind_sign(&message).await?;
            signed_messages.push(message.blinded_secret);
            change.push(signature);
        }

        self.localstore
            .add_blind_signatures(
                &signed_messages,
                &change,
                Some(melt_request.quote.clone()),
            )
            .await?;

        Ok(Some(change))
    }
}

fn melt_quote_response(quote: &MeltQuote) -> MeltQuoteBolt11Response {
    MeltQuoteBolt11Response {
        quote: quote.id.clone(),
        amount: quote.amount,
        fee_reserve: quote.fee_reserve,
        state: quote.state,
        expiry: quote.expiry,
        payment_preimage: quote.payment_preimage.clone(),
        change: None,
    }
}
