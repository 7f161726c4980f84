//! NUT-02: Keysets and keyset ID
//!
//! <https://github.com/cashubtc/nuts/blob/main/02.md>

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, VecSkipError};
use thiserror::Error;

use super::nut01::{Keys, PublicKey, SecretKey};
use super::CurrencyUnit;
use crate::util::hex;
use crate::Amount;

/// The highest power of two a keyset may carry a key for (`2^(MAX_ORDER-1)`)
pub const MAX_ORDER: u8 = 60;

/// NUT02 Error
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// Hex error
    #[error(transparent)]
    HexError(#[from] hex::Error),
    /// Keyset id length invalid
    #[error("Keyset id length invalid")]
    Length,
    /// Keyset id does not match derived id
    #[error("Keyset id does not match derived id")]
    IdMismatch,
    /// Bip32 error
    #[error("Derivation error")]
    Bip32,
}

/// Keyset version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySetVersion {
    /// Version 00
    Version00,
}

impl KeySetVersion {
    /// [`KeySetVersion`] to byte
    pub fn to_byte(&self) -> u8 {
        match self {
            Self::Version00 => 0,
        }
    }

    /// [`KeySetVersion`] from byte
    pub fn from_byte(byte: &u8) -> Result<Self, Error> {
        match byte {
            0 => Ok(Self::Version00),
            _ => Err(Error::Length),
        }
    }
}

impl fmt::Display for KeySetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySetVersion::Version00 => f.write_str("00"),
        }
    }
}

/// A keyset ID identifies a specific keyset. It can be derived by anyone who
/// knows the set of public keys of a mint, so a proof carrying an id pins the
/// keyset it was signed under.
///
/// `id = "00" || hex(SHA256(pubkeys concatenated in ascending amount order))[..14]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id {
    version: KeySetVersion,
    id: [u8; Self::BYTELEN],
}

impl Id {
    const STRLEN: usize = 14;
    const BYTELEN: usize = 7;

    /// [`Id`] to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        [vec![self.version.to_byte()], self.id.to_vec()].concat()
    }

    /// [`Id`] from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != Self::BYTELEN + 1 {
            return Err(Error::Length);
        }

        Ok(Self {
            version: KeySetVersion::from_byte(&bytes[0])?,
            id: bytes[1..].try_into().map_err(|_| Error::Length)?,
        })
    }
}

impl TryFrom<Id> for u64 {
    type Error = Error;

    fn try_from(value: Id) -> Result<Self, Self::Error> {
        let hex_bytes: [u8; 8] = value.to_bytes().try_into().map_err(|_| Error::Length)?;

        let int = u64::from_be_bytes(hex_bytes);

        Ok(int % (2_u64.pow(31) - 1))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.version, hex::encode(self.id))
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(Error::Length);
        }

        Ok(Self {
            version: KeySetVersion::from_byte(
                hex::decode(&s[..2])?.first().ok_or(Error::Length)?,
            )?,
            id: hex::decode(&s[2..])?.try_into().map_err(|_| Error::Length)?,
        })
    }
}

impl From<&Keys> for Id {
    /// As per NUT-02:
    ///   1. sort public keys by their amount in ascending order
    ///   2. concatenate all public keys to one byte array
    ///   3. HASH_SHA256 the concatenated public keys
    ///   4. take the first 14 characters of the hex-encoded hash
    ///   5. prefix it with a keyset ID version byte
    fn from(map: &Keys) -> Self {
        // Keys are a BTreeMap and already sorted by amount ascending
        let pubkeys_concat: Vec<u8> = map
            .iter()
            .map(|(_, pubkey)| pubkey.to_bytes())
            .collect::<Vec<[u8; 33]>>()
            .concat();

        let hash = sha256::Hash::hash(&pubkeys_concat);

        Self {
            version: KeySetVersion::Version00,
            id: hash.to_byte_array()[0..Self::BYTELEN]
                .try_into()
                .expect("hash is longer than id"),
        }
    }
}

impl serde::ser::Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::de::Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id: String = String::deserialize(deserializer)?;
        Id::from_str(&id).map_err(serde::de::Error::custom)
    }
}

/// Mint keysets [NUT-02]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetResponse {
    /// Keyset infos the mint advertises; invalid entries are skipped
    #[serde_as(as = "VecSkipError<_>")]
    pub keysets: Vec<KeySetInfo>,
}

/// Keyset with public keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    /// Keyset id
    pub id: Id,
    /// Keyset unit
    pub unit: CurrencyUnit,
    /// Keyset keys
    pub keys: Keys,
}

impl KeySet {
    /// Check that the stored id matches the id derived from the keys
    pub fn verify_id(&self) -> Result<(), Error> {
        let derived = Id::from(&self.keys);

        if derived != self.id {
            tracing::warn!(
                "Keyset id {} does not match derived id {}",
                self.id,
                derived
            );
            return Err(Error::IdMismatch);
        }

        Ok(())
    }
}

impl From<MintKeySet> for KeySet {
    fn from(keyset: MintKeySet) -> Self {
        Self {
            id: keyset.id,
            unit: keyset.unit,
            keys: Keys::from(keyset.keys),
        }
    }
}

/// Keyset metadata as advertised by `/v1/keysets`
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySetInfo {
    /// Keyset id
    pub id: Id,
    /// Keyset unit
    pub unit: CurrencyUnit,
    /// Whether the keyset is actively signing new outputs
    pub active: bool,
    /// Input fee in parts per thousand per proof spent from this keyset
    #[serde(default = "default_input_fee_ppk")]
    pub input_fee_ppk: u64,
}

fn default_input_fee_ppk() -> u64 {
    0
}

/// Keypair the mint signs a single amount with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintKeyPair {
    /// Public key
    pub public_key: PublicKey,
    /// Secret key
    pub secret_key: SecretKey,
}

impl MintKeyPair {
    /// [`MintKeyPair`] from secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        Self {
            public_key: secret_key.public_key(),
            secret_key,
        }
    }
}

/// Mint keys per amount, private halves included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintKeys(BTreeMap<Amount, MintKeyPair>);

impl MintKeys {
    /// Create new [`MintKeys`]
    pub fn new(map: BTreeMap<Amount, MintKeyPair>) -> Self {
        Self(map)
    }

    /// Get [`MintKeyPair`] for [`Amount`]
    pub fn amount_keypair(&self, amount: Amount) -> Option<&MintKeyPair> {
        self.0.get(&amount)
    }

    /// Iterate through the (`Amount`, `MintKeyPair`) entries in the map
    pub fn iter(&self) -> impl Iterator<Item = (&Amount, &MintKeyPair)> {
        self.0.iter()
    }
}

impl From<MintKeys> for Keys {
    fn from(keys: MintKeys) -> Self {
        Keys::new(
            keys.0
                .into_iter()
                .map(|(amount, keypair)| (amount, keypair.public_key))
                .collect(),
        )
    }
}

/// Keyset with signing keys, held by the mint only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintKeySet {
    /// Keyset id
    pub id: Id,
    /// Keyset unit
    pub unit: CurrencyUnit,
    /// Keyset keypairs
    pub keys: MintKeys,
}

impl MintKeySet {
    /// Generate a keyset from the mint master key
    ///
    /// One hardened child per amount order below `derivation_path`, so a
    /// keyset is fully recoverable from the master key and its path.
    pub fn generate<C: secp256k1::Signing>(
        secp: &secp256k1::Secp256k1<C>,
        xpriv: Xpriv,
        unit: CurrencyUnit,
        derivation_path: DerivationPath,
        max_order: u8,
    ) -> Self {
        let max_order = max_order.min(MAX_ORDER);

        let xpriv = xpriv
            .derive_priv(secp, &derivation_path)
            .expect("RNG busted");

        let mut map = BTreeMap::new();
        for i in 0..max_order {
            let amount = Amount::from(2_u64.pow(i as u32));
            let secret_key = xpriv
                .derive_priv(
                    secp,
                    &[ChildNumber::from_hardened_idx(i as u32).expect("order within bound")],
                )
                .expect("RNG busted")
                .private_key;

            map.insert(
                amount,
                MintKeyPair::from_secret_key(SecretKey::from(secret_key)),
            );
        }

        let keys = MintKeys::new(map);
        let pub_keys: Keys = keys.clone().into();

        Self {
            id: Id::from(&pub_keys),
            unit,
            keys,
        }
    }
}

impl From<&MintKeys> for Id {
    fn from(map: &MintKeys) -> Self {
        let keys: Keys = map.clone().into();
        Id::from(&keys)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bitcoin::Network;

    use super::*;
    use crate::SECP256K1;

    const SHORT_KEYSET_ID: &str = "00456a94ab4e1c46";
    const SHORT_KEYSET: &str = r#"
        {
            "1":"03a40f20667ed53513075dc51e715ff2046cad64eb68960632269ba7f0210e38bc",
            "2":"03fd4ce5a16b65576145949e6f99f445f8249fee17c606b688b504a849cdc452de",
            "4":"02648eccfa4c026960966276fa5a4cae46ce0fd432211a4f449bf84f13aa5f8303",
            "8":"02fdfd6796bfeac490cbee12f778f867f0a2c68f6508d17c649759ea0dc3547528"
        }
    "#;

    #[test]
    fn deserialization_and_id_generation() {
        let keys: Keys = serde_json::from_str(SHORT_KEYSET).unwrap();

        let id: Id = (&keys).into();

        assert_eq!(id, Id::from_str(SHORT_KEYSET_ID).unwrap());
    }

    #[test]
    fn de_keyset_info() {
        let h = r#"{"id":"009a1f293253e41e","unit":"sat","active":true}"#;

        let keyset_info: KeySetInfo = serde_json::from_str(h).unwrap();
        assert_eq!(keyset_info.input_fee_ppk, 0);

        let h = r#"{"id":"009a1f293253e41e","unit":"sat","active":true,"input_fee_ppk":100}"#;

        let keyset_info: KeySetInfo = serde_json::from_str(h).unwrap();
        assert_eq!(keyset_info.input_fee_ppk, 100);
    }

    #[test]
    fn keyset_response_skips_invalid_entries() {
        let h = r#"{"keysets":[{"id":"009a1f293253e41e","unit":"sat","active":true},{"id":"eGnEWtdJ0PIM","unit":"sat","active":true},{"id":"003dfdf4e5e35487","unit":"sat","active":true}]}"#;

        let keyset_response: KeysetResponse = serde_json::from_str(h).unwrap();

        // the base64-era id is not valid hex and is skipped
        assert_eq!(keyset_response.keysets.len(), 2);
    }

    #[test]
    fn test_id_to_int() {
        let id = Id::from_str("009a1f293253e41e").unwrap();

        let id_int = u64::try_from(id).unwrap();
        assert_eq!(864559728, id_int)
    }

    #[test]
    fn test_id_bytes_roundtrip() {
        let id = Id::from_str("009a1f293253e41e").unwrap();

        let bytes = id.to_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(Id::from_bytes(&bytes).unwrap(), id);
    }

    #[test]
    fn test_generated_keyset_id_verifies() {
        let seed = [7u8; 64];
        let xpriv = Xpriv::new_master(Network::Bitcoin, &seed).unwrap();

        let keyset = MintKeySet::generate(
            &SECP256K1,
            xpriv,
            CurrencyUnit::Sat,
            DerivationPath::from_str("m/0'/0'/0'").unwrap(),
            32,
        );

        let keyset: KeySet = keyset.into();
        assert!(keyset.verify_id().is_ok());
        assert_eq!(keyset.keys.len(), 32);
    }

    #[test]
    fn test_max_order_is_capped() {
        let seed = [3u8; 64];
        let xpriv = Xpriv::new_master(Network::Bitcoin, &seed).unwrap();

        let keyset = MintKeySet::generate(
            &SECP256K1,
            xpriv,
            CurrencyUnit::Sat,
            DerivationPath::from_str("m/0'/0'/0'").unwrap(),
            255,
        );

        let keyset: KeySet = keyset.into();
        assert_eq!(keyset.keys.len(), MAX_ORDER as usize);
    }
}
