//! NUT-17: WebSocket subscriptions
//!
//! <https://github.com/cashubtc/nuts/blob/main/17.md>
//!
//! JSON-RPC shaped frames exchanged over a single bidirectional connection.
//! The transport itself is out of scope; these are the wire types both
//! sides agree on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::nut00::{CurrencyUnit, PaymentMethod};
use super::nut04::MintQuoteBolt11Response;
use super::nut05::MeltQuoteBolt11Response;
use super::nut07::ProofState;

/// JSON RPC version
pub const JSON_RPC_VERSION: &str = "2.0";

/// NUT17 Error
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown subscription kind
    #[error("Unknown subscription kind")]
    UnknownKind,
}

/// What a subscription listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Mint quote state changes
    Bolt11MintQuote,
    /// Melt quote state changes
    Bolt11MeltQuote,
    /// Proof state changes
    ProofState,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bolt11MintQuote => "bolt11_mint_quote",
            Self::Bolt11MeltQuote => "bolt11_melt_quote",
            Self::ProofState => "proof_state",
        };
        f.write_str(s)
    }
}

impl FromStr for SubscriptionKind {
    type Err = Error;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "bolt11_mint_quote" => Ok(Self::Bolt11MintQuote),
            "bolt11_melt_quote" => Ok(Self::Bolt11MeltQuote),
            "proof_state" => Ok(Self::ProofState),
            _ => Err(Error::UnknownKind),
        }
    }
}

/// Subscription request parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Subscription kind
    pub kind: SubscriptionKind,
    /// Filters: quote ids or Ys depending on kind
    pub filters: Vec<String>,
    /// Client chosen subscription id
    #[serde(rename = "subId")]
    pub sub_id: String,
}

/// A state change pushed to a subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    /// Proof state change
    ProofState(ProofState),
    /// Melt quote state change
    MeltQuoteBolt11Response(MeltQuoteBolt11Response),
    /// Mint quote state change
    MintQuoteBolt11Response(MintQuoteBolt11Response),
}

impl From<ProofState> for NotificationPayload {
    fn from(state: ProofState) -> Self {
        Self::ProofState(state)
    }
}

impl From<MeltQuoteBolt11Response> for NotificationPayload {
    fn from(response: MeltQuoteBolt11Response) -> Self {
        Self::MeltQuoteBolt11Response(response)
    }
}

impl From<MintQuoteBolt11Response> for NotificationPayload {
    fn from(response: MintQuoteBolt11Response) -> Self {
        Self::MintQuoteBolt11Response(response)
    }
}

/// The request to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsUnsubscribeRequest {
    /// Subscription ID
    #[serde(rename = "subId")]
    pub sub_id: String,
}

/// The inner method of a websocket request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method", content = "params")]
pub enum WsMethodRequest {
    /// Subscribe method
    Subscribe(Params),
    /// Unsubscribe method
    Unsubscribe(WsUnsubscribeRequest),
}

/// Websocket request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsRequest {
    /// JSON RPC version
    pub jsonrpc: String,
    /// The method body
    #[serde(flatten)]
    pub method: WsMethodRequest,
    /// The request ID
    pub id: usize,
}

impl From<(WsMethodRequest, usize)> for WsRequest {
    fn from((method, id): (WsMethodRequest, usize)) -> Self {
        WsRequest {
            jsonrpc: JSON_RPC_VERSION.to_owned(),
            method,
            id,
        }
    }
}

/// The response to a subscription request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsSubscribeResponse {
    /// Status
    pub status: String,
    /// Subscription ID
    #[serde(rename = "subId")]
    pub sub_id: String,
}

/// Websocket response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsResponse {
    /// JSON RPC version
    pub jsonrpc: String,
    /// The result
    pub result: WsSubscribeResponse,
    /// The request ID
    pub id: usize,
}

/// Websocket error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsErrorBody {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
}

/// Websocket error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsErrorResponse {
    /// JSON RPC version
    pub jsonrpc: String,
    /// The error
    pub error: WsErrorBody,
    /// The request ID
    pub id: usize,
}

/// Notification body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationInner {
    /// The subscription ID
    #[serde(rename = "subId")]
    pub sub_id: String,
    /// The notification payload
    pub payload: NotificationPayload,
}

/// Notification from the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsNotification {
    /// JSON RPC version
    pub jsonrpc: String,
    /// The method
    pub method: String,
    /// The parameters
    pub params: NotificationInner,
}

impl WsNotification {
    /// New [`WsNotification`]
    pub fn new(sub_id: String, payload: NotificationPayload) -> Self {
        WsNotification {
            jsonrpc: JSON_RPC_VERSION.to_owned(),
            method: "subscribe".to_owned(),
            params: NotificationInner { sub_id, payload },
        }
    }
}

/// Message from the server to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsMessageOrResponse {
    /// A notification
    Notification(WsNotification),
    /// A response to a request
    Response(WsResponse),
    /// An error response
    ErrorResponse(WsErrorResponse),
}

impl From<(usize, Result<WsSubscribeResponse, WsErrorBody>)> for WsMessageOrResponse {
    fn from((id, result): (usize, Result<WsSubscribeResponse, WsErrorBody>)) -> Self {
        match result {
            Ok(result) => WsMessageOrResponse::Response(WsResponse {
                jsonrpc: JSON_RPC_VERSION.to_owned(),
                result,
                id,
            }),
            Err(err) => WsMessageOrResponse::ErrorResponse(WsErrorResponse {
                jsonrpc: JSON_RPC_VERSION.to_owned(),
                error: err,
                id,
            }),
        }
    }
}

/// A method/unit pair with the commands it supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedMethod {
    /// Payment method
    pub method: PaymentMethod,
    /// Currency unit
    pub unit: CurrencyUnit,
    /// Supported subscription commands
    pub commands: Vec<String>,
}

impl SupportedMethod {
    /// Bolt11 with every command supported
    pub fn default_bolt11(unit: CurrencyUnit) -> Self {
        Self {
            method: PaymentMethod::Bolt11,
            unit,
            commands: vec![
                "bolt11_mint_quote".to_owned(),
                "bolt11_melt_quote".to_owned(),
                "proof_state".to_owned(),
            ],
        }
    }
}

/// NUT17 settings advertised in mint info
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedSettings {
    /// Supported methods
    pub supported: Vec<SupportedMethod>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_round_trip() {
        let request: WsRequest = (
            WsMethodRequest::Subscribe(Params {
                kind: SubscriptionKind::Bolt11MintQuote,
                filters: vec!["quote-id".to_owned()],
                sub_id: "sub-1".to_owned(),
            }),
            0,
        )
            .into();

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"method\":\"subscribe\""));
        assert!(json.contains("\"kind\":\"bolt11_mint_quote\""));

        let parsed: WsRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn message_or_response_parses_both() {
        let ok: WsMessageOrResponse = (
            7,
            Ok(WsSubscribeResponse {
                status: "OK".to_owned(),
                sub_id: "sub-1".to_owned(),
            }),
        )
            .into();

        let json = serde_json::to_string(&ok).unwrap();
        let parsed: WsMessageOrResponse = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, WsMessageOrResponse::Response(r) if r.id == 7));

        let err: WsMessageOrResponse = (
            8,
            Err(WsErrorBody {
                code: -1,
                message: "bad request".to_owned(),
            }),
        )
            .into();

        let json = serde_json::to_string(&err).unwrap();
        let parsed: WsMessageOrResponse = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, WsMessageOrResponse::ErrorResponse(e) if e.id == 8));
    }
}
