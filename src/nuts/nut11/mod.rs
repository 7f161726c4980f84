//! NUT-11: Pay to Public Key (P2PK)
//!
//! <https://github.com/cashubtc/nuts/blob/main/11.md>

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::sha256::Hash as Sha256Hash;
use bitcoin::secp256k1::schnorr::Signature;
use serde::de::Error as DeserializerError;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::nut00::{BlindedMessage, Proof, Proofs, Witness};
use super::nut01::{PublicKey, SecretKey};
use super::{Kind, Nut10Secret};
use crate::util::{hex, unix_time};

pub mod serde_p2pk_witness;

/// NUT11 Error
#[derive(Debug, Error)]
pub enum Error {
    /// Secret is not a P2PK secret
    #[error("Secret is not a p2pk secret")]
    IncorrectSecretKind,
    /// Locktime is already passed at construction
    #[error("Locktime in past")]
    LocktimeInPast,
    /// Witness signature is not valid
    #[error("Invalid signature")]
    InvalidSignature,
    /// Unknown tag in secret
    #[error("Unknown tag in P2PK secret")]
    UnknownTag,
    /// Unknown sigflag
    #[error("Unknown sigflag")]
    UnknownSigFlag,
    /// Spending conditions not met
    #[error("Not enough valid signatures provided")]
    NotEnoughSignatures,
    /// Witness carries the same signature more than once
    #[error("Witness has duplicate signatures")]
    DuplicateSignatures,
    /// n_sigs tag without pubkeys to satisfy it
    #[error("Pubkeys tag cannot be empty if n_sigs tag is present")]
    EmptyPubkeys,
    /// Witness signatures not provided
    #[error("No signatures provided in witness")]
    SignaturesNotProvided,
    /// Inputs mix SIG_ALL with other flags or differing conditions
    #[error("All inputs must share SIG_ALL conditions")]
    SigAllMismatch,
    /// SIG_ALL is only permitted in swap
    #[error("SIG_ALL can only be used in swap")]
    SigAllOnlySwap,
    /// Tag kind not found
    #[error("Tag kind not found")]
    KindNotFound,
    /// Incomplete tag
    #[error("Tag requires at least one value")]
    TagMissingValue,
    /// Parse int error
    #[error(transparent)]
    ParseInt(#[from] std::num::ParseIntError),
    /// From hex error
    #[error(transparent)]
    HexError(#[from] hex::Error),
    /// Serde Json error
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
    /// Secp256k1 error
    #[error(transparent)]
    Secp256k1(#[from] bitcoin::secp256k1::Error),
    /// NUT01 error
    #[error(transparent)]
    Nut01(#[from] super::nut01::Error),
    /// Secret error
    #[error(transparent)]
    Secret(#[from] crate::secret::Error),
}

/// P2PK witness
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct P2PKWitness {
    /// Signatures
    pub signatures: Vec<String>,
}

impl P2PKWitness {
    /// Whether the witness carries no signatures
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl Proof {
    /// Sign [Proof] with the given key, appending to the existing witness
    pub fn sign_p2pk(&mut self, secret_key: SecretKey) -> Result<(), Error> {
        let msg: Vec<u8> = self.secret.to_bytes();
        let signature: Signature = secret_key.sign(&msg)?;

        let signatures = vec![signature.to_string()];

        match self.witness.as_mut() {
            Some(witness) => {
                witness.add_signatures(signatures);
            }
            None => {
                let mut p2pk_witness = Witness::P2PKWitness(P2PKWitness::default());
                p2pk_witness.add_signatures(signatures);
                self.witness = Some(p2pk_witness);
            }
        };

        Ok(())
    }

    /// Verify P2PK spending conditions on [Proof]
    pub fn verify_p2pk(&self) -> Result<(), Error> {
        let secret: Nut10Secret = self
            .secret
            .clone()
            .try_into()
            .map_err(|_| Error::IncorrectSecretKind)?;

        if secret.kind != Kind::P2PK {
            return Err(Error::IncorrectSecretKind);
        }

        let conditions: Conditions = secret
            .secret_data
            .tags
            .clone()
            .unwrap_or_default()
            .try_into()?;

        let witness_signatures = self
            .witness
            .as_ref()
            .and_then(|witness| witness.signatures());

        // Locktime fallback: once passed, the primary condition no longer
        // applies
        if let Some(locktime) = conditions.locktime {
            if locktime.lt(&unix_time()) {
                let refund_keys = conditions.refund_keys.clone().unwrap_or_default();

                // No refund keys means anyone can spend
                if refund_keys.is_empty() {
                    return Ok(());
                }

                let signatures = parse_signatures(
                    &witness_signatures.ok_or(Error::SignaturesNotProvided)?,
                )?;

                return match valid_signatures(self.secret.as_bytes(), &refund_keys, &signatures) >= 1
                {
                    true => Ok(()),
                    false => Err(Error::NotEnoughSignatures),
                };
            }
        }

        let mut pubkeys = conditions.pubkeys.clone().unwrap_or_default();
        pubkeys.push(PublicKey::from_str(&secret.secret_data.data)?);

        let required_sigs = match conditions.num_sigs {
            Some(num_sigs) => {
                if conditions.pubkeys.as_ref().map_or(true, |p| p.is_empty()) {
                    return Err(Error::EmptyPubkeys);
                }
                num_sigs
            }
            None => 1,
        };

        let witness_signatures = witness_signatures.ok_or(Error::SignaturesNotProvided)?;

        if has_duplicate_signatures(&witness_signatures) {
            return Err(Error::DuplicateSignatures);
        }

        let signatures = parse_signatures(&witness_signatures)?;

        if valid_signatures(self.secret.as_bytes(), &pubkeys, &signatures) < required_sigs {
            return Err(Error::NotEnoughSignatures);
        }

        Ok(())
    }
}

/// Whether a signature string occurs more than once
fn has_duplicate_signatures(signatures: &[String]) -> bool {
    let mut seen = HashSet::new();
    signatures.iter().any(|sig| !seen.insert(sig))
}

fn parse_signatures(signatures: &[String]) -> Result<Vec<Signature>, Error> {
    signatures
        .iter()
        .map(|s| Signature::from_str(s).map_err(|_| Error::InvalidSignature))
        .collect()
}

/// Count of valid signatures from distinct keys
///
/// Each key is counted at most once so a single key cannot satisfy a
/// multisig requirement with repeated signatures.
pub fn valid_signatures(msg: &[u8], pubkeys: &[PublicKey], signatures: &[Signature]) -> u64 {
    let mut remaining: Vec<&PublicKey> = pubkeys.iter().collect();
    let mut count: u64 = 0;

    for signature in signatures {
        if let Some(idx) = remaining
            .iter()
            .position(|pubkey| pubkey.verify(msg, signature).is_ok())
        {
            count += 1;
            remaining.swap_remove(idx);
        }
    }

    count
}

impl BlindedMessage {
    /// Sign [BlindedMessage] with the given key
    pub fn sign_p2pk(&mut self, secret_key: SecretKey) -> Result<(), Error> {
        let msg: [u8; 33] = self.blinded_secret.to_bytes();
        let signature: Signature = secret_key.sign(&msg)?;

        let signatures = vec![signature.to_string()];

        match self.witness.as_mut() {
            Some(witness) => {
                witness.add_signatures(signatures);
            }
            None => {
                let mut p2pk_witness = Witness::P2PKWitness(P2PKWitness::default());
                p2pk_witness.add_signatures(signatures);
                self.witness = Some(p2pk_witness);
            }
        };

        Ok(())
    }
}

/// Spending conditions for a locked output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpendingConditions {
    /// NUT11 spending conditions
    P2PKConditions {
        /// The public key the ecash is locked to
        data: PublicKey,
        /// Additional conditions
        conditions: Option<Conditions>,
    },
    /// NUT14 spending conditions
    HTLCConditions {
        /// Hash of preimage
        data: Sha256Hash,
        /// Additional conditions
        conditions: Option<Conditions>,
    },
}

impl SpendingConditions {
    /// New P2PK [SpendingConditions]
    pub fn new_p2pk(pubkey: PublicKey, conditions: Option<Conditions>) -> Self {
        Self::P2PKConditions {
            data: pubkey,
            conditions,
        }
    }

    /// New HTLC [SpendingConditions] from a preimage
    pub fn new_htlc(preimage: &str, conditions: Option<Conditions>) -> Result<Self, Error> {
        use bitcoin::hashes::Hash;
        let htlc = Sha256Hash::hash(preimage.as_bytes());

        Ok(Self::HTLCConditions {
            data: htlc,
            conditions,
        })
    }

    /// Kind of [SpendingConditions]
    pub fn kind(&self) -> Kind {
        match self {
            Self::P2PKConditions { .. } => Kind::P2PK,
            Self::HTLCConditions { .. } => Kind::HTLC,
        }
    }

    /// Number of required signatures
    pub fn num_sigs(&self) -> Option<u64> {
        match self {
            Self::P2PKConditions { conditions, .. } => conditions.as_ref().and_then(|c| c.num_sigs),
            Self::HTLCConditions { conditions, .. } => conditions.as_ref().and_then(|c| c.num_sigs),
        }
    }

    /// Keys that can sign
    pub fn pubkeys(&self) -> Option<Vec<PublicKey>> {
        match self {
            Self::P2PKConditions { data, conditions } => {
                let mut pubkeys = vec![*data];
                if let Some(conditions) = conditions {
                    pubkeys.extend(conditions.pubkeys.clone().unwrap_or_default());
                }
                Some(pubkeys)
            }
            Self::HTLCConditions { conditions, .. } => {
                conditions.as_ref().and_then(|c| c.pubkeys.clone())
            }
        }
    }

    /// Locktime unix timestamp
    pub fn locktime(&self) -> Option<u64> {
        match self {
            Self::P2PKConditions { conditions, .. } => conditions.as_ref().and_then(|c| c.locktime),
            Self::HTLCConditions { conditions, .. } => conditions.as_ref().and_then(|c| c.locktime),
        }
    }

    /// Refund keys
    pub fn refund_keys(&self) -> Option<Vec<PublicKey>> {
        match self {
            Self::P2PKConditions { conditions, .. } => {
                conditions.as_ref().and_then(|c| c.refund_keys.clone())
            }
            Self::HTLCConditions { conditions, .. } => {
                conditions.as_ref().and_then(|c| c.refund_keys.clone())
            }
        }
    }
}

impl TryFrom<Nut10Secret> for SpendingConditions {
    type Error = Error;

    fn try_from(secret: Nut10Secret) -> Result<SpendingConditions, Error> {
        match secret.kind {
            Kind::P2PK => Ok(SpendingConditions::P2PKConditions {
                data: PublicKey::from_str(&secret.secret_data.data)?,
                conditions: secret.secret_data.tags.and_then(|t| t.try_into().ok()),
            }),
            Kind::HTLC => Ok(Self::HTLCConditions {
                data: Sha256Hash::from_str(&secret.secret_data.data)
                    .map_err(|_| Error::IncorrectSecretKind)?,
                conditions: secret.secret_data.tags.and_then(|t| t.try_into().ok()),
            }),
        }
    }
}

impl From<SpendingConditions> for Nut10Secret {
    fn from(conditions: SpendingConditions) -> Nut10Secret {
        match conditions {
            SpendingConditions::P2PKConditions { data, conditions } => Nut10Secret::new(
                Kind::P2PK,
                data.to_hex(),
                conditions.map(Vec::<Vec<String>>::from),
            ),
            SpendingConditions::HTLCConditions { data, conditions } => Nut10Secret::new(
                Kind::HTLC,
                data.to_string(),
                conditions.map(Vec::<Vec<String>>::from),
            ),
        }
    }
}

/// P2PK and HTLC spending condition tags
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Conditions {
    /// Unix locktime after which refund keys can be used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locktime: Option<u64>,
    /// Additional public keys that can sign
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkeys: Option<Vec<PublicKey>>,
    /// Keys that can spend after the locktime
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_keys: Option<Vec<PublicKey>>,
    /// Number of required signatures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_sigs: Option<u64>,
    /// Signature flag
    pub sig_flag: SigFlag,
}

impl Conditions {
    /// Create new [`Conditions`]
    pub fn new(
        locktime: Option<u64>,
        pubkeys: Option<Vec<PublicKey>>,
        refund_keys: Option<Vec<PublicKey>>,
        num_sigs: Option<u64>,
        sig_flag: Option<SigFlag>,
    ) -> Result<Self, Error> {
        if let Some(locktime) = locktime {
            if locktime.lt(&unix_time()) {
                return Err(Error::LocktimeInPast);
            }
        }

        Ok(Self {
            locktime,
            pubkeys,
            refund_keys,
            num_sigs,
            sig_flag: sig_flag.unwrap_or_default(),
        })
    }
}

impl From<Conditions> for Vec<Vec<String>> {
    fn from(conditions: Conditions) -> Vec<Vec<String>> {
        let Conditions {
            locktime,
            pubkeys,
            refund_keys,
            num_sigs,
            sig_flag,
        } = conditions;

        let mut tags = Vec::new();

        if let Some(pubkeys) = pubkeys {
            tags.push(Tag::PubKeys(pubkeys).as_vec());
        }

        if let Some(locktime) = locktime {
            tags.push(Tag::LockTime(locktime).as_vec());
        }

        if let Some(num_sigs) = num_sigs {
            tags.push(Tag::NSigs(num_sigs).as_vec());
        }

        if let Some(refund_keys) = refund_keys {
            tags.push(Tag::Refund(refund_keys).as_vec())
        }

        tags.push(Tag::SigFlag(sig_flag).as_vec());
        tags
    }
}

impl TryFrom<Vec<Vec<String>>> for Conditions {
    type Error = Error;

    fn try_from(tags: Vec<Vec<String>>) -> Result<Conditions, Self::Error> {
        let tags: HashMap<TagKind, Tag> = tags
            .into_iter()
            .map(Tag::try_from)
            .collect::<Result<Vec<Tag>, _>>()?
            .into_iter()
            .map(|t| (t.kind(), t))
            .collect();

        let pubkeys = match tags.get(&TagKind::Pubkeys) {
            Some(Tag::PubKeys(pubkeys)) => Some(pubkeys.clone()),
            _ => None,
        };

        let locktime = match tags.get(&TagKind::Locktime) {
            Some(Tag::LockTime(locktime)) => Some(*locktime),
            _ => None,
        };

        let refund_keys = match tags.get(&TagKind::Refund) {
            Some(Tag::Refund(keys)) => Some(keys.clone()),
            _ => None,
        };

        let sig_flag = match tags.get(&TagKind::SigFlag) {
            Some(Tag::SigFlag(sigflag)) => *sigflag,
            _ => SigFlag::SigInputs,
        };

        let num_sigs = match tags.get(&TagKind::NSigs) {
            Some(Tag::NSigs(num_sigs)) => Some(*num_sigs),
            _ => None,
        };

        Ok(Conditions {
            locktime,
            pubkeys,
            refund_keys,
            num_sigs,
            sig_flag,
        })
    }
}

/// P2PK and HTLC spending condition tag kinds
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    /// Signature flag
    SigFlag,
    /// Number of signatures required
    #[serde(rename = "n_sigs")]
    NSigs,
    /// Locktime
    Locktime,
    /// Refund
    Refund,
    /// Pubkey
    Pubkeys,
    /// Custom tag kind
    Custom(String),
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SigFlag => write!(f, "sigflag"),
            Self::NSigs => write!(f, "n_sigs"),
            Self::Locktime => write!(f, "locktime"),
            Self::Refund => write!(f, "refund"),
            Self::Pubkeys => write!(f, "pubkeys"),
            Self::Custom(kind) => write!(f, "{kind}"),
        }
    }
}

impl<S> From<S> for TagKind
where
    S: AsRef<str>,
{
    fn from(tag: S) -> Self {
        match tag.as_ref() {
            "sigflag" => Self::SigFlag,
            "n_sigs" => Self::NSigs,
            "locktime" => Self::Locktime,
            "refund" => Self::Refund,
            "pubkeys" => Self::Pubkeys,
            t => Self::Custom(t.to_owned()),
        }
    }
}

/// Signature flag
///
/// Defines what a signature inside a witness commits to
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord, Hash,
)]
pub enum SigFlag {
    /// Signatures only commit to their own input
    #[default]
    SigInputs,
    /// Signatures commit to all inputs and all outputs of the transaction
    SigAll,
}

impl fmt::Display for SigFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SigAll => write!(f, "SIG_ALL"),
            Self::SigInputs => write!(f, "SIG_INPUTS"),
        }
    }
}

impl FromStr for SigFlag {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "SIG_ALL" => Ok(Self::SigAll),
            "SIG_INPUTS" => Ok(Self::SigInputs),
            _ => Err(Error::UnknownSigFlag),
        }
    }
}

/// The aggregate conditions a SIG_ALL transaction is checked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigAllConditions {
    /// Keys that can sign
    pub pubkeys: Vec<PublicKey>,
    /// Number of required signatures
    pub num_sigs: u64,
    /// Signatures found on the first input witness
    pub signatures: Vec<String>,
}

/// Extract and check the aggregate SIG_ALL conditions of a set of inputs
///
/// All inputs must be P2PK, flagged SIG_ALL, and carry an identical pubkey
/// set and `n_sigs`; anything else is a [`Error::SigAllMismatch`].
pub fn enforce_sig_all_conditions(proofs: &Proofs) -> Result<SigAllConditions, Error> {
    let mut aggregate: Option<(Vec<PublicKey>, u64)> = None;

    for proof in proofs {
        let secret: Nut10Secret = proof
            .secret
            .clone()
            .try_into()
            .map_err(|_| Error::SigAllMismatch)?;

        if secret.kind != Kind::P2PK {
            return Err(Error::SigAllMismatch);
        }

        let conditions: Conditions = secret
            .secret_data
            .tags
            .clone()
            .unwrap_or_default()
            .try_into()?;

        if conditions.sig_flag != SigFlag::SigAll {
            return Err(Error::SigAllMismatch);
        }

        let mut pubkeys = vec![PublicKey::from_str(&secret.secret_data.data)?];
        pubkeys.extend(conditions.pubkeys.unwrap_or_default());

        let num_sigs = conditions.num_sigs.unwrap_or(1);

        match &aggregate {
            None => aggregate = Some((pubkeys, num_sigs)),
            Some((agg_pubkeys, agg_num_sigs)) => {
                if agg_pubkeys != &pubkeys || *agg_num_sigs != num_sigs {
                    return Err(Error::SigAllMismatch);
                }
            }
        }
    }

    let (pubkeys, num_sigs) = aggregate.ok_or(Error::SigAllMismatch)?;

    let signatures = proofs
        .first()
        .and_then(|p| p.witness.as_ref())
        .and_then(|w| w.signatures())
        .ok_or(Error::SignaturesNotProvided)?;

    Ok(SigAllConditions {
        pubkeys,
        num_sigs,
        signatures,
    })
}

/// Whether any proof in the set is flagged SIG_ALL
pub fn proofs_sig_all(proofs: &Proofs) -> bool {
    proofs.iter().any(|proof| {
        let secret: Result<Nut10Secret, _> = proof.secret.clone().try_into();

        match secret.ok().and_then(|s| {
            s.secret_data
                .tags
                .unwrap_or_default()
                .try_into()
                .ok()
                .map(|c: Conditions| c.sig_flag)
        }) {
            Some(flag) => flag == SigFlag::SigAll,
            None => false,
        }
    })
}

/// The message a SIG_ALL signature commits to: every input secret followed
/// by every output `B_`
pub fn sig_all_msg(inputs: &Proofs, outputs: &[BlindedMessage]) -> Vec<u8> {
    let mut msg: Vec<u8> = Vec::new();

    for proof in inputs {
        msg.extend(proof.secret.as_bytes());
    }

    for output in outputs {
        msg.extend(output.blinded_secret.to_hex().into_bytes());
    }

    msg
}

/// Verify the aggregate SIG_ALL signature over a transaction
pub fn verify_sig_all(inputs: &Proofs, outputs: &[BlindedMessage]) -> Result<(), Error> {
    let conditions = enforce_sig_all_conditions(inputs)?;

    if has_duplicate_signatures(&conditions.signatures) {
        return Err(Error::DuplicateSignatures);
    }

    let msg = sig_all_msg(inputs, outputs);
    let signatures = parse_signatures(&conditions.signatures)?;

    if valid_signatures(&msg, &conditions.pubkeys, &signatures) < conditions.num_sigs {
        return Err(Error::NotEnoughSignatures);
    }

    Ok(())
}

/// Sign a SIG_ALL transaction, placing the signature on the first input
pub fn sign_sig_all(
    inputs: &mut Proofs,
    outputs: &[BlindedMessage],
    secret_key: &SecretKey,
) -> Result<(), Error> {
    let msg = sig_all_msg(inputs, outputs);
    let signature = secret_key.sign(&msg)?;

    let first = inputs.first_mut().ok_or(Error::SignaturesNotProvided)?;

    match first.witness.as_mut() {
        Some(witness) => witness.add_signatures(vec![signature.to_string()]),
        None => {
            let mut witness = Witness::P2PKWitness(P2PKWitness::default());
            witness.add_signatures(vec![signature.to_string()]);
            first.witness = Some(witness);
        }
    }

    Ok(())
}

/// Spending condition tag
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum Tag {
    /// Sigflag [`Tag`]
    SigFlag(SigFlag),
    /// Number of signatures [`Tag`]
    NSigs(u64),
    /// Locktime [`Tag`]
    LockTime(u64),
    /// Refund [`Tag`]
    Refund(Vec<PublicKey>),
    /// Pubkeys [`Tag`]
    PubKeys(Vec<PublicKey>),
}

impl Tag {
    /// Get [`Tag`] kind
    pub fn kind(&self) -> TagKind {
        match self {
            Self::SigFlag(_) => TagKind::SigFlag,
            Self::NSigs(_) => TagKind::NSigs,
            Self::LockTime(_) => TagKind::Locktime,
            Self::Refund(_) => TagKind::Refund,
            Self::PubKeys(_) => TagKind::Pubkeys,
        }
    }

    /// Get [`Tag`] as string vector
    pub fn as_vec(&self) -> Vec<String> {
        self.clone().into()
    }
}

impl<S> TryFrom<Vec<S>> for Tag
where
    S: AsRef<str>,
{
    type Error = Error;

    fn try_from(tag: Vec<S>) -> Result<Self, Self::Error> {
        let tag_kind: TagKind = match tag.first() {
            Some(kind) => TagKind::from(kind),
            None => return Err(Error::KindNotFound),
        };

        let value = tag.get(1).ok_or(Error::TagMissingValue)?;

        match tag_kind {
            TagKind::SigFlag => Ok(Tag::SigFlag(SigFlag::from_str(value.as_ref())?)),
            TagKind::NSigs => Ok(Tag::NSigs(value.as_ref().parse()?)),
            TagKind::Locktime => Ok(Tag::LockTime(value.as_ref().parse()?)),
            TagKind::Refund => {
                let pubkeys = tag
                    .iter()
                    .skip(1)
                    .map(|p| PublicKey::from_str(p.as_ref()))
                    .collect::<Result<Vec<PublicKey>, _>>()?;

                Ok(Self::Refund(pubkeys))
            }
            TagKind::Pubkeys => {
                let pubkeys = tag
                    .iter()
                    .skip(1)
                    .map(|p| PublicKey::from_str(p.as_ref()))
                    .collect::<Result<Vec<PublicKey>, _>>()?;

                Ok(Self::PubKeys(pubkeys))
            }
            _ => Err(Error::UnknownTag),
        }
    }
}

impl From<Tag> for Vec<String> {
    fn from(data: Tag) -> Self {
        match data {
            Tag::SigFlag(sigflag) => vec![TagKind::SigFlag.to_string(), sigflag.to_string()],
            Tag::NSigs(num_sig) => vec![TagKind::NSigs.to_string(), num_sig.to_string()],
            Tag::LockTime(locktime) => vec![TagKind::Locktime.to_string(), locktime.to_string()],
            Tag::PubKeys(pubkeys) => {
                let mut tag = vec![TagKind::Pubkeys.to_string()];
                for pubkey in pubkeys.into_iter() {
                    tag.push(pubkey.to_string())
                }
                tag
            }
            Tag::Refund(pubkeys) => {
                let mut tag = vec![TagKind::Refund.to_string()];
                for pubkey in pubkeys {
                    tag.push(pubkey.to_string())
                }
                tag
            }
        }
    }
}

impl Serialize for Tag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data: Vec<String> = self.as_vec();
        let mut seq = serializer.serialize_seq(Some(data.len()))?;
        for element in data.into_iter() {
            seq.serialize_element(&element)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let vec: Vec<String> = Vec::deserialize(deserializer)?;
        Self::try_from(vec).map_err(DeserializerError::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::nuts::Id;
    use crate::secret::Secret;
    use crate::Amount;

    #[test]
    fn test_secret_ser() {
        let data = PublicKey::from_str(
            "033281c37677ea273eb7183b783067f5244933ef78d8c3f15b1a77cb246099c26e",
        )
        .unwrap();

        let conditions = Conditions {
            locktime: Some(99999),
            pubkeys: Some(vec![
                PublicKey::from_str(
                    "02698c4e2b5f9534cd0687d87513c759790cf829aa5739184a3e3735471fbda904",
                )
                .unwrap(),
                PublicKey::from_str(
                    "023192200a0cfd3867e48eb63b03ff599c7e46c8f4e41146b2d281173ca6c50c54",
                )
                .unwrap(),
            ]),
            refund_keys: Some(vec![PublicKey::from_str(
                "033281c37677ea273eb7183b783067f5244933ef78d8c3f15b1a77cb246099c26e",
            )
            .unwrap()]),
            num_sigs: Some(2),
            sig_flag: SigFlag::SigAll,
        };

        let secret: Nut10Secret = SpendingConditions::new_p2pk(data, Some(conditions)).into();

        let secret_str = serde_json::to_string(&secret).unwrap();

        let secret_der: Nut10Secret = serde_json::from_str(&secret_str).unwrap();

        assert_eq!(secret_der, secret);
    }

    #[test]
    fn sign_and_verify_proof() {
        let secret_key = SecretKey::from_hex(
            "04918dfc36c93e7db6cc0d60f37e1522f1c36b64d3f4b424c532d7c595febbc5",
        )
        .unwrap();

        let pubkey = secret_key.public_key();

        let secret: Secret = Nut10Secret::new(Kind::P2PK, pubkey.to_hex(), None::<Vec<Vec<String>>>)
            .try_into()
            .unwrap();

        let mut proof = Proof {
            keyset_id: Id::from_str("009a1f293253e41e").unwrap(),
            amount: Amount::ZERO,
            secret,
            c: PublicKey::from_str(
                "02698c4e2b5f9534cd0687d87513c759790cf829aa5739184a3e3735471fbda904",
            )
            .unwrap(),
            witness: Some(Witness::P2PKWitness(P2PKWitness { signatures: vec![] })),
            dleq: None,
        };

        // Missing signature
        assert!(proof.verify_p2pk().is_err());

        proof.sign_p2pk(secret_key).unwrap();

        assert!(proof.verify_p2pk().is_ok());
    }

    #[test]
    fn verify_multi_sig() {
        let key_one =
            SecretKey::from_hex("0000000000000000000000000000000000000000000000000000000000000001")
                .unwrap();
        let key_two =
            SecretKey::from_hex("0000000000000000000000000000000000000000000000000000000000000002")
                .unwrap();
        let key_three =
            SecretKey::from_hex("7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f7f")
                .unwrap();

        let conditions = Conditions {
            locktime: None,
            pubkeys: Some(vec![key_two.public_key(), key_three.public_key()]),
            refund_keys: None,
            num_sigs: Some(2),
            sig_flag: SigFlag::SigInputs,
        };

        let secret: Secret = Nut10Secret::new(
            Kind::P2PK,
            key_one.public_key().to_hex(),
            Some(Vec::<Vec<String>>::from(conditions)),
        )
        .try_into()
        .unwrap();

        let mut proof = Proof::new(
            Amount::ZERO,
            Id::from_str("009a1f293253e41e").unwrap(),
            secret,
            PublicKey::from_str(
                "02698c4e2b5f9534cd0687d87513c759790cf829aa5739184a3e3735471fbda904",
            )
            .unwrap(),
        );

        // One valid signature is not enough for n_sigs = 2
        proof.sign_p2pk(key_one.clone()).unwrap();
        assert!(matches!(
            proof.verify_p2pk(),
            Err(Error::NotEnoughSignatures)
        ));

        // A second signature from a distinct key satisfies the condition
        proof.sign_p2pk(key_two).unwrap();
        assert!(proof.verify_p2pk().is_ok());
    }

    #[test]
    fn duplicate_signatures_rejected() {
        let key_one =
            SecretKey::from_hex("0000000000000000000000000000000000000000000000000000000000000001")
                .unwrap();
        let key_two =
            SecretKey::from_hex("0000000000000000000000000000000000000000000000000000000000000002")
                .unwrap();

        let conditions = Conditions {
            locktime: None,
            pubkeys: Some(vec![key_two.public_key()]),
            refund_keys: None,
            num_sigs: Some(2),
            sig_flag: SigFlag::SigInputs,
        };

        let secret: Secret = Nut10Secret::new(
            Kind::P2PK,
            key_one.public_key().to_hex(),
            Some(Vec::<Vec<String>>::from(conditions)),
        )
        .try_into()
        .unwrap();

        let mut proof = Proof::new(
            Amount::ZERO,
            Id::from_str("009a1f293253e41e").unwrap(),
            secret,
            PublicKey::from_str(
                "02698c4e2b5f9534cd0687d87513c759790cf829aa5739184a3e3735471fbda904",
            )
            .unwrap(),
        );

        let signature = key_one.sign(proof.secret.as_bytes()).unwrap().to_string();
        proof.witness = Some(Witness::P2PKWitness(P2PKWitness {
            signatures: vec![signature.clone(), signature],
        }));

        assert!(matches!(
            proof.verify_p2pk(),
            Err(Error::DuplicateSignatures)
        ));
    }

    #[test]
    fn locktime_refund_semantics() {
        let primary =
            SecretKey::from_hex("0000000000000000000000000000000000000000000000000000000000000001")
                .unwrap();
        let refund =
            SecretKey::from_hex("0000000000000000000000000000000000000000000000000000000000000002")
                .unwrap();

        let past = unix_time() - 1000;

        // Expired locktime with refund keys requires a refund signature
        let conditions = Conditions {
            locktime: Some(past),
            pubkeys: None,
            refund_keys: Some(vec![refund.public_key()]),
            num_sigs: None,
            sig_flag: SigFlag::SigInputs,
        };

        let secret: Secret = Nut10Secret::new(
            Kind::P2PK,
            primary.public_key().to_hex(),
            Some(Vec::<Vec<String>>::from(conditions)),
        )
        .try_into()
        .unwrap();

        let mut proof = Proof::new(
            Amount::ZERO,
            Id::from_str("009a1f293253e41e").unwrap(),
            secret,
            PublicKey::from_str(
                "02698c4e2b5f9534cd0687d87513c759790cf829aa5739184a3e3735471fbda904",
            )
            .unwrap(),
        );

        proof.sign_p2pk(primary.clone()).unwrap();
        assert!(proof.verify_p2pk().is_err());

        proof.witness = None;
        proof.sign_p2pk(refund).unwrap();
        assert!(proof.verify_p2pk().is_ok());

        // Expired locktime without refund keys is anyone-can-spend
        let conditions = Conditions {
            locktime: Some(past),
            pubkeys: None,
            refund_keys: None,
            num_sigs: None,
            sig_flag: SigFlag::SigInputs,
        };

        let secret: Secret = Nut10Secret::new(
            Kind::P2PK,
            primary.public_key().to_hex(),
            Some(Vec::<Vec<String>>::from(conditions)),
        )
        .try_into()
        .unwrap();

        let proof = Proof::new(
            Amount::ZERO,
            Id::from_str("009a1f293253e41e").unwrap(),
            secret,
            PublicKey::from_str(
                "02698c4e2b5f9534cd0687d87513c759790cf829aa5739184a3e3735471fbda904",
            )
            .unwrap(),
        );

        assert!(proof.verify_p2pk().is_ok());
    }

    #[test]
    fn sig_all_aggregate_round_trip() {
        let key =
            SecretKey::from_hex("0000000000000000000000000000000000000000000000000000000000000001")
                .unwrap();

        let conditions = Conditions {
            locktime: None,
            pubkeys: None,
            refund_keys: None,
            num_sigs: None,
            sig_flag: SigFlag::SigAll,
        };

        let keyset_id = Id::from_str("009a1f293253e41e").unwrap();

        let mut inputs: Proofs = (0..2)
            .map(|_| {
                let secret: Secret = Nut10Secret::new(
                    Kind::P2PK,
                    key.public_key().to_hex(),
                    Some(Vec::<Vec<String>>::from(conditions.clone())),
                )
                .try_into()
                .unwrap();

                Proof::new(
                    Amount::from(1),
                    keyset_id,
                    secret,
                    key.public_key(),
                )
            })
            .collect();

        let outputs = vec![BlindedMessage::new(
            Amount::from(2),
            keyset_id,
            SecretKey::generate().public_key(),
        )];

        assert!(proofs_sig_all(&inputs));

        sign_sig_all(&mut inputs, &outputs, &key).unwrap();
        assert!(verify_sig_all(&inputs, &outputs).is_ok());

        // Changing the outputs invalidates the aggregate signature
        let other_outputs = vec![BlindedMessage::new(
            Amount::from(2),
            keyset_id,
            SecretKey::generate().public_key(),
        )];
        assert!(verify_sig_all(&inputs, &other_outputs).is_err());
    }
}
