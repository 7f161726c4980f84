//! NUT-06: Mint information
//!
//! <https://github.com/cashubtc/nuts/blob/main/06.md>

use serde::{Deserialize, Serialize};

use super::nut01::PublicKey;
use super::{nut04, nut05, nut17};

/// Mint version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintVersion {
    /// Mint software name
    pub name: String,
    /// Mint version
    pub version: String,
}

/// Mint info [NUT-06]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintInfo {
    /// name of the mint and should be recognizable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// hex pubkey of the mint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<PublicKey>,
    /// implementation name and the version running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<MintVersion>,
    /// short description of the mint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// long description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_long: Option<String>,
    /// message of the day that the wallet must display to the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motd: Option<String>,
    /// shows which NUTs the mint supports
    pub nuts: Nuts,
}

/// Supported nuts and settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nuts {
    /// NUT04 settings
    #[serde(default)]
    #[serde(rename = "4")]
    pub nut04: nut04::Settings,
    /// NUT05 settings
    #[serde(default)]
    #[serde(rename = "5")]
    pub nut05: nut05::Settings,
    /// NUT07 settings
    #[serde(default)]
    #[serde(rename = "7")]
    pub nut07: SupportedSettings,
    /// NUT08 settings
    #[serde(default)]
    #[serde(rename = "8")]
    pub nut08: SupportedSettings,
    /// NUT09 settings
    #[serde(default)]
    #[serde(rename = "9")]
    pub nut09: SupportedSettings,
    /// NUT10 settings
    #[serde(default)]
    #[serde(rename = "10")]
    pub nut10: SupportedSettings,
    /// NUT11 settings
    #[serde(default)]
    #[serde(rename = "11")]
    pub nut11: SupportedSettings,
    /// NUT12 settings
    #[serde(default)]
    #[serde(rename = "12")]
    pub nut12: SupportedSettings,
    /// NUT14 settings
    #[serde(default)]
    #[serde(rename = "14")]
    pub nut14: SupportedSettings,
    /// NUT17 settings
    #[serde(default)]
    #[serde(rename = "17")]
    pub nut17: nut17::SupportedSettings,
}

/// Whether a nut is supported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedSettings {
    /// Is supported
    pub supported: bool,
}
