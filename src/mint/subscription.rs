//! Subscription fan-out
//!
//! Quote and proof state changes are pushed to subscribers. Each connection
//! owns one channel which the transport drains, so there is exactly one
//! writer per connection and notifications for a subscription arrive in the
//! order they were produced.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use super::{MeltQuote, MintQuote};
use crate::nuts::nut17::{
    NotificationPayload, Params, WsErrorBody, WsMessageOrResponse, WsMethodRequest,
    WsNotification, WsRequest, WsSubscribeResponse,
};
use crate::nuts::{
    MeltQuoteBolt11Response, MintQuoteBolt11Response, ProofState, SubscriptionKind,
};

struct ActiveSub {
    kind: SubscriptionKind,
    filters: Vec<String>,
    sender: mpsc::UnboundedSender<WsMessageOrResponse>,
}

/// Subscription registry and broadcaster
#[derive(Default)]
pub struct PubSubManager {
    subscriptions: Mutex<HashMap<String, ActiveSub>>,
}

impl std::fmt::Debug for PubSubManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubManager").finish()
    }
}

impl PubSubManager {
    /// Handle a client request frame, registering or removing state as a
    /// side effect
    ///
    /// `sender` is the connection's single-writer queue; notifications for
    /// accepted subscriptions are pushed into it.
    pub fn handle_request(
        &self,
        request: WsRequest,
        sender: mpsc::UnboundedSender<WsMessageOrResponse>,
    ) -> WsMessageOrResponse {
        match request.method {
            WsMethodRequest::Subscribe(params) => self.subscribe(request.id, params, sender),
            WsMethodRequest::Unsubscribe(unsub) => {
                let removed = self
                    .subscriptions
                    .lock()
                    .expect("lock poisoned")
                    .remove(&unsub.sub_id)
                    .is_some();

                match removed {
                    true => (
                        request.id,
                        Ok(WsSubscribeResponse {
                            status: "OK".to_string(),
                            sub_id: unsub.sub_id,
                        }),
                    )
                        .into(),
                    false => (
                        request.id,
                        Err(WsErrorBody {
                            code: -1,
                            message: "Unknown subscription".to_string(),
                        }),
                    )
                        .into(),
                }
            }
        }
    }

    fn subscribe(
        &self,
        request_id: usize,
        params: Params,
        sender: mpsc::UnboundedSender<WsMessageOrResponse>,
    ) -> WsMessageOrResponse {
        if params.filters.is_empty() {
            return (
                request_id,
                Err(WsErrorBody {
                    code: -1,
                    message: "Filters cannot be empty".to_string(),
                }),
            )
                .into();
        }

        let mut subscriptions = self.subscriptions.lock().expect("lock poisoned");

        if subscriptions.contains_key(&params.sub_id) {
            return (
                request_id,
                Err(WsErrorBody {
                    code: -1,
                    message: "Subscription id already exists".to_string(),
                }),
            )
                .into();
        }

        subscriptions.insert(
            params.sub_id.clone(),
            ActiveSub {
                kind: params.kind,
                filters: params.filters,
                sender,
            },
        );

        (
            request_id,
            Ok(WsSubscribeResponse {
                status: "OK".to_string(),
                sub_id: params.sub_id,
            }),
        )
            .into()
    }

    /// Remove every subscription registered through the given connection
    /// queue, used when a connection goes away
    pub fn drop_closed(&self) {
        self.subscriptions
            .lock()
            .expect("lock poisoned")
            .retain(|_, sub| !sub.sender.is_closed());
    }

    fn broadcast(&self, kind: SubscriptionKind, filter: &str, payload: NotificationPayload) {
        let mut subscriptions = self.subscriptions.lock().expect("lock poisoned");

        let mut dead = Vec::new();

        for (sub_id, sub) in subscriptions.iter() {
            if sub.kind == kind && sub.filters.iter().any(|f| f == filter) {
                let notification = WsNotification::new(sub_id.clone(), payload.clone());

                if sub
                    .sender
                    .send(WsMessageOrResponse::Notification(notification))
                    .is_err()
                {
                    dead.push(sub_id.clone());
                }
            }
        }

        for sub_id in dead {
            subscriptions.remove(&sub_id);
        }
    }

    /// Broadcast a mint quote state change
    pub fn broadcast_mint_quote(&self, quote: &MintQuote) {
        let response = MintQuoteBolt11Response {
            quote: quote.id.clone(),
            request: quote.request.clone(),
            state: quote.state,
            expiry: Some(quote.expiry),
            pubkey: quote.pubkey,
        };

        self.broadcast(
            SubscriptionKind::Bolt11MintQuote,
            &quote.id,
            response.into(),
        );
    }

    /// Broadcast a melt quote state change
    pub fn broadcast_melt_quote(&self, quote: &MeltQuote) {
        let response = MeltQuoteBolt11Response {
            quote: quote.id.clone(),
            amount: quote.amount,
            fee_reserve: quote.fee_reserve,
            state: quote.state,
            expiry: quote.expiry,
            payment_preimage: quote.payment_preimage.clone(),
            change: None,
        };

        self.broadcast(
            SubscriptionKind::Bolt11MeltQuote,
            &quote.id,
            response.into(),
        );
    }

    /// Broadcast a proof state change
    pub fn broadcast_proof_state(&self, state: ProofState) {
        let filter = state.y.to_hex();
        self.broadcast(SubscriptionKind::ProofState, &filter, state.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nuts::MintQuoteState;

    fn subscribe_frame(id: usize, sub_id: &str, quote_id: &str) -> WsRequest {
        (
            WsMethodRequest::Subscribe(Params {
                kind: SubscriptionKind::Bolt11MintQuote,
                filters: vec![quote_id.to_string()],
                sub_id: sub_id.to_string(),
            }),
            id,
        )
            .into()
    }

    #[tokio::test]
    async fn subscribe_and_receive_in_order() {
        let manager = PubSubManager::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let response = manager.handle_request(subscribe_frame(0, "sub-1", "quote-1"), tx);
        assert!(matches!(response, WsMessageOrResponse::Response(_)));

        let mut quote = MintQuote::new(
            "lnbc1".to_string(),
            crate::nuts::CurrencyUnit::Sat,
            crate::Amount::from(10),
            0,
            "hash".to_string(),
            None,
        );
        quote.id = "quote-1".to_string();

        manager.broadcast_mint_quote(&quote);

        quote.state = MintQuoteState::Paid;
        manager.broadcast_mint_quote(&quote);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        match (first, second) {
            (
                WsMessageOrResponse::Notification(first),
                WsMessageOrResponse::Notification(second),
            ) => {
                assert_eq!(first.params.sub_id, "sub-1");
                assert_eq!(second.params.sub_id, "sub-1");

                match (first.params.payload, second.params.payload) {
                    (
                        NotificationPayload::MintQuoteBolt11Response(first),
                        NotificationPayload::MintQuoteBolt11Response(second),
                    ) => {
                        assert_eq!(first.state, MintQuoteState::Unpaid);
                        assert_eq!(second.state, MintQuoteState::Paid);
                    }
                    _ => panic!("Expected mint quote payloads"),
                }
            }
            _ => panic!("Expected notifications"),
        }
    }

    #[tokio::test]
    async fn duplicate_sub_id_rejected() {
        let manager = PubSubManager::default();
        let (tx, _rx) = mpsc::unbounded_channel();

        let response = manager.handle_request(subscribe_frame(0, "sub-1", "quote-1"), tx.clone());
        assert!(matches!(response, WsMessageOrResponse::Response(_)));

        let response = manager.handle_request(subscribe_frame(1, "sub-1", "quote-2"), tx);
        assert!(matches!(response, WsMessageOrResponse::ErrorResponse(_)));
    }

    #[tokio::test]
    async fn unsubscribed_receives_nothing() {
        let manager = PubSubManager::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager.handle_request(subscribe_frame(0, "sub-1", "quote-1"), tx.clone());

        let unsub: WsRequest = (
            WsMethodRequest::Unsubscribe(crate::nuts::nut17::WsUnsubscribeRequest {
                sub_id: "sub-1".to_string(),
            }),
            1,
        )
            .into();
        let response = manager.handle_request(unsub, tx);
        assert!(matches!(response, WsMessageOrResponse::Response(_)));

        let mut quote = MintQuote::new(
            "lnbc1".to_string(),
            crate::nuts::CurrencyUnit::Sat,
            crate::Amount::from(10),
            0,
            "hash".to_string(),
            None,
        );
        quote.id = "quote-1".to_string();
        manager.broadcast_mint_quote(&quote);

        assert!(rx.try_recv().is_err());
    }
}
