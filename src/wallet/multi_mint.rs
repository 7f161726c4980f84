//! Multi mint wallet
//!
//! Container over per-mint wallets sharing one seed and store. Receiving
//! from a mint the user does not trust can be routed through two chained
//! quotes so the funds end up at a trusted mint.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{ReceiveOptions, Wallet};
use crate::amount::SplitTarget;
use crate::database::{self, WalletDatabase};
use crate::error::Error;
use crate::mint_url::MintUrl;
use crate::nuts::{CurrencyUnit, MintQuoteState, Token};
use crate::Amount;

/// Configuration for a multi mint receive
#[derive(Debug, Clone, Default)]
pub struct MultiMintReceiveOptions {
    /// Add unknown mints to the wallet and keep the funds there
    pub allow_untrusted: bool,
    /// Move the received funds to this mint through a melt and mint pair
    pub transfer_to_mint: Option<MintUrl>,
    /// Options forwarded to the receiving wallet
    pub receive: ReceiveOptions,
}

/// Wallet over multiple mints with a shared seed and store
#[derive(Debug, Clone)]
pub struct MultiMintWallet {
    /// Unit all wallets operate in
    pub unit: CurrencyUnit,
    localstore: Arc<dyn WalletDatabase<Err = database::Error> + Send + Sync>,
    seed: Vec<u8>,
    wallets: Arc<RwLock<HashMap<MintUrl, Wallet>>>,
}

impl MultiMintWallet {
    /// Create new [`MultiMintWallet`]
    pub fn new(
        localstore: Arc<dyn WalletDatabase<Err = database::Error> + Send + Sync>,
        seed: &[u8],
        unit: CurrencyUnit,
    ) -> Self {
        Self {
            unit,
            localstore,
            seed: seed.to_vec(),
            wallets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a wallet to the trusted set
    pub async fn add_wallet(&self, wallet: Wallet) {
        self.wallets
            .write()
            .await
            .insert(wallet.mint_url.clone(), wallet);
    }

    /// Create a wallet for a mint and add it to the trusted set
    pub async fn create_and_add_wallet(&self, mint_url: &str) -> Result<Wallet, Error> {
        let wallet = Wallet::new(
            mint_url,
            self.unit.clone(),
            Arc::clone(&self.localstore),
            &self.seed,
        )?;

        self.add_wallet(wallet.clone()).await;

        Ok(wallet)
    }

    /// Get the wallet for a mint, if trusted
    pub async fn get_wallet(&self, mint_url: &MintUrl) -> Option<Wallet> {
        self.wallets.read().await.get(mint_url).cloned()
    }

    /// Balance per mint
    pub async fn get_balances(&self) -> Result<HashMap<MintUrl, Amount>, Error> {
        let mut balances = HashMap::new();

        for (mint_url, wallet) in self.wallets.read().await.iter() {
            balances.insert(mint_url.clone(), wallet.total_balance().await?);
        }

        Ok(balances)
    }

    /// Receive a serialized token
    ///
    /// Tokens from unknown mints are rejected unless `allow_untrusted`
    /// admits the mint or `transfer_to_mint` routes the funds to a trusted
    /// one.
    pub async fn receive(
        &self,
        token: &str,
        opts: MultiMintReceiveOptions,
    ) -> Result<Amount, Error> {
        let token = Token::from_str(token)?;
        let token_mint = token.mint_url()?;

        if let Some(target) = &opts.transfer_to_mint {
            return self.receive_and_transfer(&token, target.clone(), opts.receive).await;
        }

        if let Some(wallet) = self.get_wallet(&token_mint).await {
            return wallet.receive_token(&token, opts.receive).await;
        }

        if !opts.allow_untrusted {
            return Err(Error::UntrustedMint(token_mint.to_string()));
        }

        let wallet = self.create_and_add_wallet(&token_mint.to_string()).await?;
        wallet.receive_token(&token, opts.receive).await
    }

    /// Receive at the token's mint, then move the funds to `target` via
    /// two chained quotes: a mint quote at the target whose invoice is
    /// paid by melting at the source
    async fn receive_and_transfer(
        &self,
        token: &Token,
        target: MintUrl,
        receive_opts: ReceiveOptions,
    ) -> Result<Amount, Error> {
        let token_mint = token.mint_url()?;

        let target_wallet = self
            .get_wallet(&target)
            .await
            .ok_or_else(|| Error::UntrustedMint(target.to_string()))?;

        let source_wallet = match self.get_wallet(&token_mint).await {
            Some(wallet) => wallet,
            None => Wallet::new(
                &token_mint.to_string(),
                self.unit.clone(),
                Arc::clone(&self.localstore),
                &self.seed,
            )?,
        };

        // Claim at the source first so the sender cannot double-spend while
        // the transfer is in flight
        source_wallet.receive_token(token, receive_opts).await?;

        let balance = source_wallet.total_balance().await?;

        // First pass sizes the transfer optimistically, the second corrects
        // for the actual fee reserve quoted by the source mint
        let mut mint_amount = balance
            .checked_sub(std::cmp::max(
                Amount::from(u64::from(balance) / 100),
                Amount::ONE,
            ))
            .ok_or(Error::InsufficientFunds)?;

        for _attempt in 0..2 {
            let mint_quote = target_wallet.mint_quote(mint_amount, None).await?;
            let melt_quote = source_wallet.melt_quote(&mint_quote.request).await?;

            let needed = melt_quote
                .amount
                .checked_add(melt_quote.fee_reserve)
                .ok_or(Error::AmountOverflow)?;

            if needed > balance {
                // Shrink by the deficit and try once more
                let deficit = needed - balance;
                mint_amount = mint_amount
                    .checked_sub(deficit)
                    .ok_or(Error::InsufficientFunds)?;
                continue;
            }

            source_wallet.melt(&melt_quote.id).await?;

            let state = target_wallet.mint_quote_state(&mint_quote.id).await?;
            if state.state != MintQuoteState::Paid {
                tracing::warn!(
                    "Transfer quote {} not paid after melt, reconcile later",
                    mint_quote.id
                );
                return Err(Error::UnpaidQuote);
            }

            let proofs = target_wallet
                .mint(&mint_quote.id, SplitTarget::default(), None)
                .await?;

            return Ok(Amount::try_sum(proofs.iter().map(|p| p.amount))?);
        }

        Err(Error::InsufficientFunds)
    }
}
