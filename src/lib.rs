//! Chestnut
//!
//! Cashu wallet and mint toolkit built on the BDHKE blind signature scheme
//! over secp256k1.

pub mod amount;
pub mod cache;
pub mod database;
pub mod dhke;
pub mod error;
pub mod fees;
pub mod lightning;
pub mod mint;
pub mod mint_url;
pub mod nuts;
pub mod secret;
pub mod types;
pub mod util;
pub mod wallet;

pub use amount::Amount;
pub use bitcoin::hashes::sha256::Hash as Sha256;
pub use error::Error;
pub use lightning_invoice::Bolt11Invoice;
pub use mint::Mint;
pub use mint_url::MintUrl;
pub use util::SECP256K1;
pub use wallet::Wallet;
