//! End to end tests over an in-process mint

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bip39::Mnemonic;

use chestnut::amount::SplitTarget;
use chestnut::database::{MintMemoryDatabase, WalletMemoryDatabase};
use chestnut::error::{Error, ErrorResponse};
use chestnut::lightning::{FakeLightning, MintLightning};
use chestnut::mint::Mint;
use chestnut::nuts::{
    CheckStateRequest, CheckStateResponse, CurrencyUnit, Id, KeysResponse, KeysetResponse,
    MeltBolt11Request, MeltQuoteBolt11Request, MeltQuoteBolt11Response, MintBolt11Request,
    MintBolt11Response, MintInfo, MintQuoteBolt11Request, MintQuoteBolt11Response, PreMintSecrets,
    ProofsMethods, RestoreRequest, RestoreResponse, SecretKey, SpendingConditions, SwapRequest,
    SwapResponse,
};
use chestnut::wallet::{
    DirectMintConnector, MintConnector, MultiMintReceiveOptions, MultiMintWallet, ReceiveOptions,
    SendOptions, Wallet,
};
use chestnut::{Amount, Bolt11Invoice, MintUrl};

const MINT_URL: &str = "http://localhost:3338";

fn wallet_seed() -> [u8; 64] {
    let mnemonic = Mnemonic::from_str(
        "half depart obvious quality work element tank gorilla view sugar picture humble",
    )
    .unwrap();
    mnemonic.to_seed("")
}

async fn new_mint(ln: Arc<FakeLightning>) -> Mint {
    let mut supported_units = HashMap::new();
    supported_units.insert(CurrencyUnit::Sat, (0, 32));

    Mint::new(
        &[0xab; 64],
        MintInfo::default(),
        Arc::new(MintMemoryDatabase::new()),
        ln,
        supported_units,
    )
    .await
    .unwrap()
}

async fn setup() -> (Wallet, DirectMintConnector, Arc<FakeLightning>) {
    let ln = Arc::new(FakeLightning::new());
    let mint = new_mint(Arc::clone(&ln)).await;
    let connector = DirectMintConnector::new(mint);

    let mut wallet = Wallet::new(
        MINT_URL,
        CurrencyUnit::Sat,
        Arc::new(WalletMemoryDatabase::new()),
        &wallet_seed(),
    )
    .unwrap();
    wallet.set_client(Arc::new(connector.clone()));

    (wallet, connector, ln)
}

/// Pay a wallet's mint quote out of band and redeem it
async fn fund_wallet(wallet: &Wallet, ln: &FakeLightning, amount: u64) -> Amount {
    let quote = wallet.mint_quote(Amount::from(amount), None).await.unwrap();

    let invoice = Bolt11Invoice::from_str(&quote.request).unwrap();
    ln.settle_invoice(&invoice.payment_hash().to_string()).await;

    let proofs = wallet
        .mint(&quote.id, SplitTarget::default(), None)
        .await
        .unwrap();

    proofs.total_amount().unwrap()
}

#[tokio::test]
async fn test_mint_and_balance() {
    let (wallet, _connector, ln) = setup().await;

    let minted = fund_wallet(&wallet, &ln, 64).await;

    assert_eq!(minted, Amount::from(64));
    assert_eq!(wallet.total_balance().await.unwrap(), Amount::from(64));
    assert_eq!(
        wallet.total_pending_balance().await.unwrap(),
        Amount::ZERO
    );
}

#[tokio::test]
async fn test_mint_before_payment_rejected() {
    let (wallet, _connector, _ln) = setup().await;

    let quote = wallet.mint_quote(Amount::from(10), None).await.unwrap();

    // Invoice has not been paid
    let err = wallet
        .mint(&quote.id, SplitTarget::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnpaidQuote));
}

// S1: roundtrip mint, send, receive into the same wallet
#[tokio::test]
async fn test_roundtrip_send_receive() {
    let (wallet, _connector, ln) = setup().await;

    fund_wallet(&wallet, &ln, 64).await;

    let send = wallet
        .send(Amount::from(23), SendOptions::default())
        .await
        .unwrap();

    assert_eq!(send.actual_amount, Amount::from(23));
    assert_eq!(send.overpayment, Amount::ZERO);
    assert!(!send.was_offline);

    // The sent amount is reserved, the rest remains spendable
    assert_eq!(wallet.total_balance().await.unwrap(), Amount::from(41));
    assert_eq!(
        wallet.total_pending_balance().await.unwrap(),
        Amount::from(23)
    );

    let received = wallet
        .receive(&send.token.to_string(), ReceiveOptions::default())
        .await
        .unwrap();

    assert_eq!(received, Amount::from(23));
    assert_eq!(wallet.total_balance().await.unwrap(), Amount::from(64));
    assert_eq!(
        wallet.total_pending_balance().await.unwrap(),
        Amount::ZERO
    );
}

// S2: a send that needs change splits the pool but preserves total value
#[tokio::test]
async fn test_send_with_change() {
    let (wallet, _connector, ln) = setup().await;

    fund_wallet(&wallet, &ln, 32).await;
    fund_wallet(&wallet, &ln, 32).await;

    let send = wallet
        .send(Amount::from(11), SendOptions::default())
        .await
        .unwrap();

    let sent_amounts = {
        let mut amounts: Vec<u64> = send
            .token
            .proofs()
            .remove(&MintUrl::from_str(MINT_URL).unwrap())
            .unwrap()
            .iter()
            .map(|p| p.amount.into())
            .collect();
        amounts.sort_unstable();
        amounts
    };
    assert_eq!(sent_amounts, vec![1, 2, 8]);

    let mut remaining: Vec<u64> = wallet
        .get_unspent_proofs()
        .await
        .unwrap()
        .iter()
        .map(|p| p.amount.into())
        .collect();
    remaining.sort_unstable();
    assert_eq!(remaining, vec![1, 4, 16, 32]);

    // Total value is preserved across the split
    assert_eq!(wallet.total_balance().await.unwrap(), Amount::from(53));
    assert_eq!(
        wallet.total_pending_balance().await.unwrap(),
        Amount::from(11)
    );
}

// S3: a swap carrying the same Y twice is rejected with the double-spend
// code and commits nothing
#[tokio::test]
async fn test_double_spend_rejected() {
    let (wallet, connector, ln) = setup().await;

    fund_wallet(&wallet, &ln, 4).await;

    let proofs = wallet.get_unspent_proofs().await.unwrap();
    let proof = proofs.first().unwrap().clone();

    let keyset_id = proof.keyset_id;

    let outputs =
        PreMintSecrets::random(keyset_id, Amount::from(8), &SplitTarget::default()).unwrap();

    let swap_request = SwapRequest::new(
        vec![proof.clone(), proof.clone()],
        outputs.blinded_messages(),
    );

    let err = connector.post_swap(swap_request).await.unwrap_err();

    let response = ErrorResponse::from(&err);
    assert_eq!(response.code.to_code(), 11001);

    // The spent set is unchanged: the proof can still be swapped
    let outputs =
        PreMintSecrets::random(keyset_id, proof.amount, &SplitTarget::default()).unwrap();
    let swap_request = SwapRequest::new(vec![proof.clone()], outputs.blinded_messages());
    assert!(connector.post_swap(swap_request).await.is_ok());

    // Now it is spent; a further swap is a double spend
    let outputs =
        PreMintSecrets::random(keyset_id, proof.amount, &SplitTarget::default()).unwrap();
    let swap_request = SwapRequest::new(vec![proof], outputs.blinded_messages());
    let err = connector.post_swap(swap_request).await.unwrap_err();
    assert!(matches!(err, Error::TokenAlreadySpent));
}

// S4: a token locked to a key can only be received with its signature
#[tokio::test]
async fn test_p2pk_send_receive() {
    let (wallet, connector, ln) = setup().await;

    fund_wallet(&wallet, &ln, 64).await;

    let receiver_key = SecretKey::generate();

    let send = wallet
        .send(
            Amount::from(16),
            SendOptions {
                conditions: Some(SpendingConditions::new_p2pk(
                    receiver_key.public_key(),
                    None,
                )),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut receiver = Wallet::new(
        MINT_URL,
        CurrencyUnit::Sat,
        Arc::new(WalletMemoryDatabase::new()),
        &[0x21; 64],
    )
    .unwrap();
    receiver.set_client(Arc::new(connector.clone()));

    let token = send.token.to_string();

    // Without the key the mint refuses the swap
    assert!(receiver
        .receive(&token, ReceiveOptions::default())
        .await
        .is_err());

    let received = receiver
        .receive(
            &token,
            ReceiveOptions {
                p2pk_signing_keys: vec![receiver_key],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(received, Amount::from(16));
    assert_eq!(receiver.total_balance().await.unwrap(), Amount::from(16));
}

// Melt pays an external invoice and returns unused reserve as change
#[tokio::test]
async fn test_melt() {
    let (wallet, _connector, ln) = setup().await;

    fund_wallet(&wallet, &ln, 64).await;

    let invoice = ln
        .create_invoice(Amount::from(50), &CurrencyUnit::Sat, String::new(), 0)
        .await
        .unwrap();

    let quote = wallet
        .melt_quote(&invoice.request.to_string())
        .await
        .unwrap();

    assert_eq!(quote.amount, Amount::from(50));
    assert_eq!(quote.fee_reserve, Amount::from(1));

    let melted = wallet.melt(&quote.id).await.unwrap();

    assert!(melted.preimage.is_some());
    assert_eq!(melted.amount, Amount::from(50));
    assert_eq!(melted.fee_paid, Amount::ZERO);

    // The fake backend charged no routing fee, the full reserve comes back
    assert_eq!(wallet.total_balance().await.unwrap(), Amount::from(14));
    assert_eq!(
        wallet.total_pending_balance().await.unwrap(),
        Amount::ZERO
    );
}

// An ambiguous melt keeps the quote pending and the proofs locked
#[tokio::test]
async fn test_melt_pending_keeps_proofs() {
    let (wallet, _connector, ln) = setup().await;

    fund_wallet(&wallet, &ln, 64).await;

    let invoice = ln
        .create_invoice(Amount::from(10), &CurrencyUnit::Sat, String::new(), 0)
        .await
        .unwrap();

    ln.set_pay_outcome(chestnut::lightning::fake::PayOutcome::Pending)
        .await;

    let quote = wallet
        .melt_quote(&invoice.request.to_string())
        .await
        .unwrap();

    let err = wallet.melt(&quote.id).await.unwrap_err();
    assert!(matches!(err, Error::PaymentPending));

    // Proofs must not be released while the outcome is unknown
    assert!(wallet.total_pending_balance().await.unwrap() > Amount::ZERO);

    let state = wallet.melt_quote_state(&quote.id).await.unwrap();
    assert_eq!(state.state, chestnut::nuts::MeltQuoteState::Pending);
}

// A definite melt failure releases the proofs
#[tokio::test]
async fn test_melt_failure_releases_proofs() {
    let (wallet, _connector, ln) = setup().await;

    fund_wallet(&wallet, &ln, 64).await;

    let invoice = ln
        .create_invoice(Amount::from(10), &CurrencyUnit::Sat, String::new(), 0)
        .await
        .unwrap();

    ln.set_pay_outcome(chestnut::lightning::fake::PayOutcome::Fail)
        .await;

    let quote = wallet
        .melt_quote(&invoice.request.to_string())
        .await
        .unwrap();

    let err = wallet.melt(&quote.id).await.unwrap_err();
    assert!(matches!(err, Error::PaymentFailed | Error::Custom(_)));

    assert_eq!(wallet.total_balance().await.unwrap(), Amount::from(64));
    assert_eq!(
        wallet.total_pending_balance().await.unwrap(),
        Amount::ZERO
    );
}

// Restore rebuilds the proof set from the seed alone, idempotently
#[tokio::test]
async fn test_restore() {
    let (wallet, connector, ln) = setup().await;

    fund_wallet(&wallet, &ln, 64).await;
    let balance = wallet.total_balance().await.unwrap();

    let mut recovered = Wallet::new(
        MINT_URL,
        CurrencyUnit::Sat,
        Arc::new(WalletMemoryDatabase::new()),
        &wallet_seed(),
    )
    .unwrap();
    recovered.set_client(Arc::new(connector.clone()));

    let restored = recovered.restore().await.unwrap();
    assert_eq!(restored, balance);
    assert_eq!(recovered.total_balance().await.unwrap(), balance);

    // Running restore again finds the same proofs and adds nothing
    let restored_again = recovered.restore().await.unwrap();
    assert_eq!(restored_again, balance);
    assert_eq!(recovered.total_balance().await.unwrap(), balance);
}

// Duplicate mint requests are served from the idempotency cache
#[tokio::test]
async fn test_mint_request_idempotent() {
    let (_wallet, connector, ln) = setup().await;

    let quote = connector
        .post_mint_quote(MintQuoteBolt11Request {
            amount: Amount::from(8),
            unit: CurrencyUnit::Sat,
            description: None,
            pubkey: None,
        })
        .await
        .unwrap();

    let invoice = Bolt11Invoice::from_str(&quote.request).unwrap();
    ln.settle_invoice(&invoice.payment_hash().to_string()).await;

    let keyset_id = connector
        .get_mint_keysets()
        .await
        .unwrap()
        .keysets
        .first()
        .unwrap()
        .id;

    let premint =
        PreMintSecrets::random(keyset_id, Amount::from(8), &SplitTarget::default()).unwrap();

    let request = MintBolt11Request {
        quote: quote.quote.clone(),
        outputs: premint.blinded_messages(),
        signature: None,
    };

    let first = connector.post_mint(request.clone()).await.unwrap();
    let second = connector.post_mint(request).await.unwrap();

    // Same signatures, not a double issuance error
    assert_eq!(first, second);
}

// S6: keyset lookups fall back to the cache offline and rotate once the
// mint is reachable again
#[derive(Debug, Clone)]
struct FlakyConnector {
    inner: DirectMintConnector,
    offline: Arc<AtomicBool>,
}

impl FlakyConnector {
    fn check(&self) -> Result<(), Error> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MintConnector for FlakyConnector {
    async fn get_mint_info(&self) -> Result<MintInfo, Error> {
        self.check()?;
        self.inner.get_mint_info().await
    }

    async fn get_mint_keys(&self) -> Result<KeysResponse, Error> {
        self.check()?;
        self.inner.get_mint_keys().await
    }

    async fn get_keyset(&self, keyset_id: Id) -> Result<KeysResponse, Error> {
        self.check()?;
        self.inner.get_keyset(keyset_id).await
    }

    async fn get_mint_keysets(&self) -> Result<KeysetResponse, Error> {
        self.check()?;
        self.inner.get_mint_keysets().await
    }

    async fn post_mint_quote(
        &self,
        request: MintQuoteBolt11Request,
    ) -> Result<MintQuoteBolt11Response, Error> {
        self.check()?;
        self.inner.post_mint_quote(request).await
    }

    async fn get_mint_quote_status(
        &self,
        quote_id: &str,
    ) -> Result<MintQuoteBolt11Response, Error> {
        self.check()?;
        self.inner.get_mint_quote_status(quote_id).await
    }

    async fn post_mint(&self, request: MintBolt11Request) -> Result<MintBolt11Response, Error> {
        self.check()?;
        self.inner.post_mint(request).await
    }

    async fn post_swap(&self, request: SwapRequest) -> Result<SwapResponse, Error> {
        self.check()?;
        self.inner.post_swap(request).await
    }

    async fn post_melt_quote(
        &self,
        request: MeltQuoteBolt11Request,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        self.check()?;
        self.inner.post_melt_quote(request).await
    }

    async fn get_melt_quote_status(
        &self,
        quote_id: &str,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        self.check()?;
        self.inner.get_melt_quote_status(quote_id).await
    }

    async fn post_melt(&self, request: MeltBolt11Request) -> Result<MeltQuoteBolt11Response, Error> {
        self.check()?;
        self.inner.post_melt(request).await
    }

    async fn post_check_state(
        &self,
        request: CheckStateRequest,
    ) -> Result<CheckStateResponse, Error> {
        self.check()?;
        self.inner.post_check_state(request).await
    }

    async fn post_restore(&self, request: RestoreRequest) -> Result<RestoreResponse, Error> {
        self.check()?;
        self.inner.post_restore(request).await
    }
}

#[tokio::test]
async fn test_offline_keyset_fallback_and_rotation() {
    let ln = Arc::new(FakeLightning::new());
    let mint = new_mint(Arc::clone(&ln)).await;
    let connector = DirectMintConnector::new(mint.clone());

    let offline = Arc::new(AtomicBool::new(false));
    let flaky = FlakyConnector {
        inner: connector,
        offline: Arc::clone(&offline),
    };

    let mut wallet = Wallet::new(
        MINT_URL,
        CurrencyUnit::Sat,
        Arc::new(WalletMemoryDatabase::new()),
        &wallet_seed(),
    )
    .unwrap();
    wallet.set_client(Arc::new(flaky));

    // Online sync
    let active = wallet.get_active_mint_keyset().await.unwrap();

    // Offline: the cached keyset is served without error
    offline.store(true, Ordering::SeqCst);
    let cached = wallet.get_active_mint_keyset().await.unwrap();
    assert_eq!(cached.id, active.id);

    // The mint rotates while we are away
    let rotated = mint
        .rotate_keyset(CurrencyUnit::Sat, 32, 0)
        .await
        .unwrap();

    // Back online: the wallet picks up the rotation and persists both
    offline.store(false, Ordering::SeqCst);
    let new_active = wallet.get_active_mint_keyset().await.unwrap();
    assert_eq!(new_active.id, rotated.id);
    assert_ne!(new_active.id, active.id);

    let stored = wallet.load_mint_keysets().await.unwrap();
    let old = stored.iter().find(|k| k.id == active.id).unwrap();
    let new = stored.iter().find(|k| k.id == rotated.id).unwrap();
    assert!(!old.active);
    assert!(new.active);
}

// Overpayment mode sends a set over the amount when the mint cannot be
// reached for a swap
#[tokio::test]
async fn test_offline_send_overpayment() {
    let ln = Arc::new(FakeLightning::new());
    let mint = new_mint(Arc::clone(&ln)).await;
    let connector = DirectMintConnector::new(mint);

    let offline = Arc::new(AtomicBool::new(false));
    let flaky = FlakyConnector {
        inner: connector,
        offline: Arc::clone(&offline),
    };

    let mut wallet = Wallet::new(
        MINT_URL,
        CurrencyUnit::Sat,
        Arc::new(WalletMemoryDatabase::new()),
        &wallet_seed(),
    )
    .unwrap();
    wallet.set_client(Arc::new(flaky));

    fund_wallet(&wallet, &ln, 32).await;

    offline.store(true, Ordering::SeqCst);

    // Bounded overpayment cannot cover 32 - 11
    let err = wallet
        .send(
            Amount::from(11),
            SendOptions {
                allow_overpayment: true,
                max_overpayment_absolute: 5,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds));

    // Without overpayment the unreachable swap surfaces as a network error
    // and the inputs stay reserved for reconciliation
    let err = wallet
        .send(Amount::from(11), SendOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_network());
    assert_eq!(
        wallet.total_pending_balance().await.unwrap(),
        Amount::from(32)
    );

    let reserved = wallet.get_reserved_proofs().await.unwrap();
    wallet
        .unreserve_proofs(reserved.ys().unwrap())
        .await
        .unwrap();

    // Unbounded overpayment ships the whole 32 sat proof
    let send = wallet
        .send(
            Amount::from(11),
            SendOptions {
                allow_overpayment: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(send.was_offline);
    assert_eq!(send.requested_amount, Amount::from(11));
    assert_eq!(send.actual_amount, Amount::from(32));
    assert_eq!(send.overpayment, Amount::from(21));
}

// Funds from an untrusted mint can be moved to a trusted one through two
// chained quotes
#[tokio::test]
async fn test_receive_untrusted_via_transfer() {
    // One Lightning node behind both mints so the melt of one settles the
    // invoice of the other
    let ln = Arc::new(FakeLightning::new());

    let source_mint = new_mint(Arc::clone(&ln)).await;
    let target_mint = new_mint(Arc::clone(&ln)).await;

    let source_connector = DirectMintConnector::new(source_mint);
    let target_connector = DirectMintConnector::new(target_mint);

    let seed = wallet_seed();

    // Sender holds funds at the source mint
    let mut sender = Wallet::new(
        "http://source.mint",
        CurrencyUnit::Sat,
        Arc::new(WalletMemoryDatabase::new()),
        &[0x77; 64],
    )
    .unwrap();
    sender.set_client(Arc::new(source_connector.clone()));
    fund_wallet(&sender, &ln, 64).await;

    let send = sender
        .send(Amount::from(32), SendOptions::default())
        .await
        .unwrap();

    // Receiver trusts only the target mint
    let localstore = Arc::new(WalletMemoryDatabase::new());
    let multi = MultiMintWallet::new(localstore.clone(), &seed, CurrencyUnit::Sat);

    let mut target_wallet = Wallet::new(
        "http://target.mint",
        CurrencyUnit::Sat,
        localstore.clone(),
        &seed,
    )
    .unwrap();
    target_wallet.set_client(Arc::new(target_connector));
    multi.add_wallet(target_wallet.clone()).await;

    let mut source_wallet = Wallet::new(
        "http://source.mint",
        CurrencyUnit::Sat,
        localstore,
        &seed,
    )
    .unwrap();
    source_wallet.set_client(Arc::new(source_connector));
    multi.add_wallet(source_wallet.clone()).await;

    // Plain receive of an unknown mint is refused
    let unknown = MultiMintWallet::new(
        Arc::new(WalletMemoryDatabase::new()),
        &seed,
        CurrencyUnit::Sat,
    );
    let err = unknown
        .receive(
            &send.token.to_string(),
            MultiMintReceiveOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UntrustedMint(_)));

    // Transfer routes the value to the trusted mint
    let received = multi
        .receive(
            &send.token.to_string(),
            MultiMintReceiveOptions {
                transfer_to_mint: Some(MintUrl::from_str("http://target.mint").unwrap()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(received >= Amount::from(30));
    assert_eq!(
        target_wallet.total_balance().await.unwrap(),
        received
    );

    // Only the returned fee reserve lingers at the source mint
    assert!(source_wallet.total_balance().await.unwrap() <= Amount::from(1));
}
