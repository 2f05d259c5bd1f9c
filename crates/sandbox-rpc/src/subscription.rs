//! Long-lived push subscriptions.
//!
//! A subscription goes through four states: Requesting (subscribe call in
//! flight under its numeric id), Active (waiter re-keyed to the
//! remote-issued token, events flowing), Unsubscribing (best-effort
//! handshake on its own deadline), Closed (entry removed, event channel
//! closed). Both directory watching and process-output streaming are this
//! one machine; only the subscribe method, its leading tag argument, and
//! the event payload shape differ.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;

use crate::client::RpcClient;
use crate::error::RpcError;
use crate::protocol::{CorrelationKey, EventFrame, Request, ResponseFrame};
use crate::router::WaiterGuard;

/// Buffered events between the consumer task and the subscriber. A slow
/// subscriber backs up through here into its waiter queue, stalling only
/// its own token.
const EVENT_CAPACITY: usize = 64;

/// Deadline for the unsubscribe handshake. Deliberately independent of
/// whatever cancelled the subscription, so teardown cannot be abandoned by
/// the very signal that triggered it.
const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Requesting,
    Active,
    Unsubscribing,
    Closed,
}

impl RpcClient {
    /// Establish a push subscription.
    ///
    /// Issues `method` through the call path, re-keys the waiter from the
    /// interim numeric id to the token the acknowledgment returns, and
    /// spawns a consumer task that forwards pushed events until the
    /// subscription is closed. `unsubscribe_method` is invoked with the
    /// token during teardown.
    ///
    /// # Errors
    /// Returns the subscribe call's application, decode, or transport
    /// error.
    pub async fn subscribe(
        &self,
        method: &str,
        params: Vec<Value>,
        unsubscribe_method: &str,
    ) -> Result<Subscription, RpcError> {
        let id = self.next_id();
        let frame = Request::new(method, id, params).encode()?;

        let (mut guard, mut rx) = WaiterGuard::register(self.table(), CorrelationKey::Id(id));
        self.connection().send_frame(frame).await?;

        let Some(ack) = rx.recv().await else {
            return Err(RpcError::ConnectionClosed);
        };
        let token: String = ResponseFrame::decode(&ack)?.into_result()?;

        // Atomic re-key: the same waiter now receives every frame pushed
        // for this token. An event that raced ahead of the ack is sitting
        // in the dispatcher's retry queue and lands here next round.
        if !guard.rekey(CorrelationKey::Token(token.clone())) {
            return Err(RpcError::ConnectionClosed);
        }
        tracing::debug!(method, %token, "subscription active");

        let (state_tx, state_rx) = watch::channel(SubscriptionState::Active);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(consume(
            rx,
            guard,
            token.clone(),
            events_tx,
            stop_rx,
            state_tx,
            self.clone(),
            unsubscribe_method.to_string(),
        ));

        Ok(Subscription {
            token,
            events: ReceiverStream::new(events_rx),
            state: state_rx,
            stop: Some(stop_tx),
            task: Some(task),
        })
    }
}

/// An active push subscription.
///
/// Yields raw event payloads; the call site decodes them into its own
/// shape. Closing, whether via [`Subscription::close`] or by dropping
/// the handle, always attempts the unsubscribe handshake and then closes
/// the event channel, so consumers observe end-of-stream.
#[derive(Debug)]
pub struct Subscription {
    token: String,
    events: ReceiverStream<Result<Value, RpcError>>,
    state: watch::Receiver<SubscriptionState>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    /// The remote-issued token this subscription is routed by.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Next pushed event payload, or an out-of-band subscription error.
    /// `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Result<Value, RpcError>> {
        self.events.next().await
    }

    /// Stop delivery, run the unsubscribe handshake, and wait for
    /// teardown to finish.
    pub async fn close(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::error!("subscription consumer failed: {e}");
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Dropping the stop sender signals the consumer, which finishes
        // teardown (including the unsubscribe call) in the background.
        self.stop.take();
    }
}

impl Stream for Subscription {
    type Item = Result<Value, RpcError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().events).poll_next(cx)
    }
}

/// Consumer half: decode pushed frames and forward them until told to
/// stop, then tear the subscription down.
#[allow(clippy::too_many_arguments)]
async fn consume(
    mut rx: mpsc::Receiver<Bytes>,
    guard: WaiterGuard,
    token: String,
    events: mpsc::Sender<Result<Value, RpcError>>,
    mut stop: oneshot::Receiver<()>,
    state: watch::Sender<SubscriptionState>,
    client: RpcClient,
    unsubscribe_method: String,
) {
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                None => {
                    // Transport gone; there is no connection left to
                    // unsubscribe over.
                    let _ = events.send(Err(RpcError::ConnectionClosed)).await;
                    let _ = state.send(SubscriptionState::Closed);
                    return;
                }
                Some(frame) => match EventFrame::decode(&frame) {
                    Ok(event) => {
                        if let Some(error) = event.error {
                            let _ = events.send(Err(RpcError::Subscription(error))).await;
                            break;
                        }
                        let Some(p) = event.params else { continue };
                        if p.subscription != token {
                            tracing::debug!(%token, got = %p.subscription, "discarding event for other token");
                            continue;
                        }
                        if events.send(Ok(p.result)).await.is_err() {
                            // Subscriber hung up without closing.
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = events.send(Err(e)).await;
                        break;
                    }
                },
            },
            _ = &mut stop => break,
        }
    }

    // Deregister before the handshake so no event can land after teardown
    // begins; a stray frame for this token is then dropped by the
    // dispatcher's retry ceiling.
    let _ = state.send(SubscriptionState::Unsubscribing);
    drop(guard);

    let unsubscribe = client.call::<bool>(&unsubscribe_method, vec![json!(token)]);
    match tokio::time::timeout(UNSUBSCRIBE_TIMEOUT, unsubscribe).await {
        Ok(Ok(true)) => tracing::debug!(%token, "unsubscribed"),
        Ok(Ok(false)) => tracing::debug!(%token, "unsubscribe refused by remote"),
        Ok(Err(e)) => tracing::debug!(%token, "unsubscribe failed: {e}"),
        Err(_) => tracing::debug!(%token, "unsubscribe timed out"),
    }
    let _ = state.send(SubscriptionState::Closed);
}
