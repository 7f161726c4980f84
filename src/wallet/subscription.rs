//! Client-side subscriptions
//!
//! Transport-agnostic subscription manager. The caller wires the outgoing
//! queue to a socket writer and feeds every inbound frame to
//! [`SubscriptionManager::handle_incoming`]; there is exactly one writer
//! per connection since every frame goes through the queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitcoin::hashes::sha256::Hash as Sha256Hash;
use bitcoin::hashes::Hash;
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;
use crate::nuts::nut17::{
    NotificationPayload, Params, WsErrorBody, WsMessageOrResponse, WsMethodRequest, WsRequest,
    WsSubscribeResponse,
};
use crate::nuts::SubscriptionKind;
use crate::util::hex;

/// How long a subscribe waits for the mint before giving up
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct ActiveSub {
    notifications: mpsc::UnboundedSender<NotificationPayload>,
}

#[derive(Debug, Default)]
struct ManagerState {
    subs: HashMap<String, ActiveSub>,
    pending: HashMap<usize, oneshot::Sender<Result<WsSubscribeResponse, WsErrorBody>>>,
}

/// Subscription manager for one mint connection
#[derive(Debug)]
pub struct SubscriptionManager {
    /// Outgoing frames; the transport writer drains this queue
    send_queue: mpsc::UnboundedSender<String>,
    state: Arc<Mutex<ManagerState>>,
    id_counter: AtomicUsize,
}

/// An active subscription
#[derive(Debug)]
pub struct Subscription {
    sub_id: String,
    notifications: mpsc::UnboundedReceiver<NotificationPayload>,
}

impl Subscription {
    /// The subscription id
    pub fn sub_id(&self) -> &str {
        &self.sub_id
    }

    /// Wait for the next notification
    ///
    /// Notifications for one subscription arrive in the order the mint
    /// produced them.
    pub async fn recv(&mut self) -> Option<NotificationPayload> {
        self.notifications.recv().await
    }
}

impl SubscriptionManager {
    /// Create new [`SubscriptionManager`] writing frames into `send_queue`
    pub fn new(send_queue: mpsc::UnboundedSender<String>) -> Self {
        Self {
            send_queue,
            state: Arc::new(Mutex::new(ManagerState::default())),
            id_counter: AtomicUsize::new(0),
        }
    }

    /// Feed an inbound frame from the transport
    pub fn handle_incoming(&self, msg: &str) {
        let parsed: WsMessageOrResponse = match serde_json::from_str(msg) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!("Could not parse ws frame: {err}");
                return;
            }
        };

        let mut state = self.state.lock().expect("lock poisoned");

        match parsed {
            WsMessageOrResponse::Notification(notification) => {
                if let Some(sub) = state.subs.get(&notification.params.sub_id) {
                    let _ = sub.notifications.send(notification.params.payload);
                }
            }
            WsMessageOrResponse::Response(response) => {
                if let Some(waiter) = state.pending.remove(&response.id) {
                    let _ = waiter.send(Ok(response.result));
                }
            }
            WsMessageOrResponse::ErrorResponse(error) => {
                if let Some(waiter) = state.pending.remove(&error.id) {
                    let _ = waiter.send(Err(error.error));
                }
            }
        }
    }

    /// Subscribe to state changes
    ///
    /// Fails if the mint does not confirm within [`SUBSCRIBE_TIMEOUT`]; all
    /// local state for the attempt is dropped on failure.
    pub async fn subscribe(
        &self,
        kind: SubscriptionKind,
        filters: Vec<String>,
    ) -> Result<Subscription, Error> {
        if filters.is_empty() {
            return Err(Error::Custom("Filters cannot be empty".to_string()));
        }

        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);

        let sub_id = hex::encode(Sha256Hash::hash(filters[0].as_bytes()).to_byte_array());

        let (response_tx, response_rx) = oneshot::channel();
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();

        // Register before sending so neither the confirmation nor an early
        // notification can be lost
        {
            let mut state = self.state.lock().expect("lock poisoned");
            state.pending.insert(id, response_tx);
            state.subs.insert(
                sub_id.clone(),
                ActiveSub {
                    notifications: notification_tx,
                },
            );
        }

        let request: WsRequest = (
            WsMethodRequest::Subscribe(Params {
                kind,
                filters,
                sub_id: sub_id.clone(),
            }),
            id,
        )
            .into();

        let frame = serde_json::to_string(&request)?;

        if self.send_queue.send(frame).is_err() {
            self.remove_local(&sub_id, id);
            return Err(Error::Network("Subscription connection closed".to_string()));
        }

        match tokio::time::timeout(SUBSCRIBE_TIMEOUT, response_rx).await {
            Ok(Ok(Ok(response))) if response.status == "OK" => Ok(Subscription {
                sub_id,
                notifications: notification_rx,
            }),
            Ok(Ok(Ok(_))) => {
                self.remove_local(&sub_id, id);
                Err(Error::Custom("Could not set up subscription".to_string()))
            }
            Ok(Ok(Err(err))) => {
                self.remove_local(&sub_id, id);
                Err(Error::Custom(format!(
                    "Could not set up subscription: {}",
                    err.message
                )))
            }
            Ok(Err(_)) | Err(_) => {
                self.remove_local(&sub_id, id);
                Err(Error::Network(
                    "Timed out setting up subscription".to_string(),
                ))
            }
        }
    }

    /// Unsubscribe and drop local state
    pub fn unsubscribe(&self, sub_id: &str) -> Result<(), Error> {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);

        let request: WsRequest = (
            WsMethodRequest::Unsubscribe(crate::nuts::nut17::WsUnsubscribeRequest {
                sub_id: sub_id.to_string(),
            }),
            id,
        )
            .into();

        let frame = serde_json::to_string(&request)?;
        let _ = self.send_queue.send(frame);

        self.state
            .lock()
            .expect("lock poisoned")
            .subs
            .remove(sub_id);

        Ok(())
    }

    /// Invalidate every subscription, used when the connection drops
    ///
    /// Subscriptions do not survive a reconnect and must be re-issued.
    pub fn disconnected(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.subs.clear();
        state.pending.clear();
    }

    fn remove_local(&self, sub_id: &str, request_id: usize) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.subs.remove(sub_id);
        state.pending.remove(&request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nuts::nut17::{WsNotification, WsResponse, JSON_RPC_VERSION};
    use crate::nuts::{MintQuoteBolt11Response, MintQuoteState};

    fn confirm_subscription(manager: &SubscriptionManager, frame: &str) {
        let request: WsRequest = serde_json::from_str(frame).unwrap();

        let sub_id = match request.method {
            WsMethodRequest::Subscribe(params) => params.sub_id,
            _ => panic!("Expected subscribe"),
        };

        let response = WsResponse {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            result: WsSubscribeResponse {
                status: "OK".to_string(),
                sub_id,
            },
            id: request.id,
        };

        manager.handle_incoming(
            &serde_json::to_string(&WsMessageOrResponse::Response(response)).unwrap(),
        );
    }

    #[tokio::test]
    async fn subscribe_and_notify() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = Arc::new(SubscriptionManager::new(tx));

        let subscribe = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .subscribe(
                        SubscriptionKind::Bolt11MintQuote,
                        vec!["quote-1".to_string()],
                    )
                    .await
            })
        };

        // Play the mint: confirm the request we see on the wire
        let frame = rx.recv().await.unwrap();
        confirm_subscription(&manager, &frame);

        let mut subscription = subscribe.await.unwrap().unwrap();

        let notification = WsNotification::new(
            subscription.sub_id().to_string(),
            MintQuoteBolt11Response {
                quote: "quote-1".to_string(),
                request: "lnbc1".to_string(),
                state: MintQuoteState::Paid,
                expiry: None,
                pubkey: None,
            }
            .into(),
        );

        manager.handle_incoming(
            &serde_json::to_string(&WsMessageOrResponse::Notification(notification)).unwrap(),
        );

        match subscription.recv().await {
            Some(NotificationPayload::MintQuoteBolt11Response(response)) => {
                assert_eq!(response.state, MintQuoteState::Paid);
            }
            other => panic!("Unexpected notification: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_invalidates_subscriptions() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = Arc::new(SubscriptionManager::new(tx));

        let subscribe = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .subscribe(
                        SubscriptionKind::Bolt11MintQuote,
                        vec!["quote-1".to_string()],
                    )
                    .await
            })
        };

        let frame = rx.recv().await.unwrap();
        confirm_subscription(&manager, &frame);

        let mut subscription = subscribe.await.unwrap().unwrap();

        manager.disconnected();

        // The notification channel is closed; recv ends
        assert!(subscription.recv().await.is_none());
    }
}
