//! Issue ecash against paid mint quotes

use super::{Mint, MintQuote};
use crate::error::Error;
use crate::nuts::{
    MintBolt11Request, MintBolt11Response, MintQuoteBolt11Request, MintQuoteBolt11Response,
    MintQuoteState, PublicKey,
};
use crate::util::unix_time;

impl Mint {
    /// Create a new mint quote backed by a Lightning invoice
    pub async fn get_mint_quote(
        &self,
        request: MintQuoteBolt11Request,
    ) -> Result<MintQuoteBolt11Response, Error> {
        let MintQuoteBolt11Request {
            amount,
            unit,
            description,
            pubkey,
        } = request;

        let quote_expiry = unix_time() + self.quote_ttl;

        let create_invoice_response = self
            .ln
            .create_invoice(
                amount,
                &unit,
                description.unwrap_or_default(),
                quote_expiry,
            )
            .await?;

        let quote = MintQuote::new(
            create_invoice_response.request.to_string(),
            unit,
            amount,
            create_invoice_response.expiry.unwrap_or(quote_expiry),
            create_invoice_response.request_lookup_id,
            pubkey,
        );

        tracing::debug!("New mint quote {} for {}", quote.id, quote.amount);

        self.localstore.add_mint_quote(quote.clone()).await?;

        let response = MintQuoteBolt11Response {
            quote: quote.id.clone(),
            request: quote.request.clone(),
            state: quote.state,
            expiry: Some(quote.expiry),
            pubkey: quote.pubkey,
        };

        self.pubsub.broadcast_mint_quote(&quote);

        Ok(response)
    }

    /// Whether the invoice behind a quote has been settled, promoting the
    /// stored state when it has
    pub async fn check_mint_quote_paid(&self, quote: &MintQuote) -> Result<MintQuoteState, Error> {
        if quote.state != MintQuoteState::Unpaid {
            return Ok(quote.state);
        }

        if self.ln.invoice_settled(&quote.request_lookup_id).await? {
            self.localstore
                .update_mint_quote_state(&quote.id, MintQuoteState::Paid)
                .await?;

            let mut paid_quote = quote.clone();
            paid_quote.state = MintQuoteState::Paid;
            self.pubsub.broadcast_mint_quote(&paid_quote);

            return Ok(MintQuoteState::Paid);
        }

        Ok(MintQuoteState::Unpaid)
    }

    /// Look up the state of a mint quote
    pub async fn check_mint_quote(&self, quote_id: &str) -> Result<MintQuoteBolt11Response, Error> {
        let quote = self
            .localstore
            .get_mint_quote(quote_id)
            .await?
            .ok_or(Error::UnknownQuote)?;

        let state = self.check_mint_quote_paid(&quote).await?;

        Ok(MintQuoteBolt11Response {
            quote: quote.id,
            request: quote.request,
            state,
            expiry: Some(quote.expiry),
            pubkey: quote.pubkey,
        })
    }

    /// Redeem a paid mint quote for blind signatures
    pub async fn process_mint_request(
        &self,
        mint_request: MintBolt11Request,
    ) -> Result<MintBolt11Response, Error> {
        let mint_quote = self
            .localstore
            .get_mint_quote(&mint_request.quote)
            .await?
            .ok_or(Error::UnknownQuote)?;

        let state = self.check_mint_quote_paid(&mint_quote).await?;

        match state {
            MintQuoteState::Unpaid => return Err(Error::UnpaidQuote),
            MintQuoteState::Issued => return Err(Error::IssuedQuote),
            MintQuoteState::Paid => (),
        }

        if mint_quote.expiry.ne(&0) && mint_quote.expiry.lt(&unix_time()) {
            return Err(Error::ExpiredQuote(mint_quote.expiry, unix_time()));
        }

        // A locked quote requires a signature from the registered key
        if let Some(pubkey) = mint_quote.pubkey {
            mint_request.verify_signature(pubkey)?;
        }

        let verification = self.verify_outputs(&mint_request.outputs).await?;

        // The outputs must sum to exactly the quote amount
        if verification.amount != mint_quote.amount {
            return Err(Error::TransactionUnbalanced(
                mint_quote.amount.into(),
                verification.amount.into(),
                0,
            ));
        }

        if verification.unit != mint_quote.unit {
            return Err(Error::UnitMismatch);
        }

        // Claim the quote before signing so a concurrent request cannot be
        // issued twice
        let previous = self
            .localstore
            .update_mint_quote_state(&mint_request.quote, MintQuoteState::Issued)
            .await?;

        if previous == MintQuoteState::Issued {
            return Err(Error::IssuedQuote);
        }

        let mut blind_signatures = Vec::with_capacity(mint_request.outputs.len());

        for blinded_message in mint_request.outputs.iter() {
            let blind_signature = match self.blind_sign(blinded_message).await {
                Ok(signature) => signature,
                Err(err) => {
                    self.localstore
                        .update_mint_quote_state(&mint_request.quote, previous)
                        .await?;
                    return Err(err);
                }
            };
            blind_signatures.push(blind_signature);
        }

        let blinded_secrets: Vec<PublicKey> = mint_request
            .outputs
            .iter()
            .map(|o| o.blinded_secret)
            .collect();

        if let Err(err) = self
            .localstore
            .add_blind_signatures(
                &blinded_secrets,
                &blind_signatures,
                Some(mint_request.quote.clone()),
            )
            .await
        {
            self.localstore
                .update_mint_quote_state(&mint_request.quote, previous)
                .await?;
            return Err(err.into());
        }

        let mut issued_quote = mint_quote.clone();
        issued_quote.state = MintQuoteState::Issued;
        self.pubsub.broadcast_mint_quote(&issued_quote);

        Ok(MintBolt11Response {
            signatures: blind_signatures,
        })
    }
}
