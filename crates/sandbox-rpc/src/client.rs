//! One-shot request/response calls over the shared connection.

use std::sync::{Arc, Mutex as StdMutex};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::connection::{Connection, DispatcherHandle};
use crate::error::RpcError;
use crate::id::IdAllocator;
use crate::protocol::{CorrelationKey, Request, ResponseFrame};
use crate::router::{RoutingTable, WaiterGuard};

/// Client handle over one multiplexed connection.
///
/// Cheap to clone; clones share the id allocator, routing table, and
/// connection, so any number of tasks can issue calls and subscriptions
/// concurrently.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    ids: IdAllocator,
    table: Arc<RoutingTable>,
    conn: StdMutex<Connection>,
    dispatcher: StdMutex<Option<DispatcherHandle>>,
}

impl RpcClient {
    /// Dial `url` and start dispatching inbound frames.
    ///
    /// # Errors
    /// Returns a transport error if the WebSocket handshake fails.
    pub async fn connect(url: &str) -> Result<Self, RpcError> {
        let table = Arc::new(RoutingTable::new());
        let (conn, dispatcher) = Connection::connect(url, Arc::clone(&table)).await?;
        Ok(Self {
            inner: Arc::new(Inner {
                ids: IdAllocator::new(),
                table,
                conn: StdMutex::new(conn),
                dispatcher: StdMutex::new(Some(dispatcher)),
            }),
        })
    }

    /// Tear down the current connection and dial `url` again.
    ///
    /// Every in-flight call is unblocked with a connection-closed error and
    /// the routing table starts empty; active subscriptions do not survive
    /// and must be re-established by their owners.
    ///
    /// # Errors
    /// Returns a transport error if the new handshake fails.
    pub async fn reconnect(&self, url: &str) -> Result<(), RpcError> {
        let old = self.inner.dispatcher.lock().unwrap().take();
        if let Some(old) = old {
            old.shutdown().await;
        }
        let (conn, dispatcher) = Connection::connect(url, Arc::clone(&self.inner.table)).await?;
        *self.inner.conn.lock().unwrap() = conn;
        *self.inner.dispatcher.lock().unwrap() = Some(dispatcher);
        Ok(())
    }

    /// Stop the dispatcher and close the socket. Idempotent.
    pub async fn shutdown(&self) {
        let handle = self.inner.dispatcher.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        if let Err(e) = self.connection().close().await {
            tracing::debug!("closing connection: {e}");
        }
    }

    /// Issue `method` with positional `params` and wait for its reply.
    ///
    /// # Errors
    /// Returns an application error from the remote, a decode error if the
    /// result does not match `T`, or a transport error if the connection
    /// fails before the reply arrives.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        self.call_inner(method, params, None).await
    }

    /// Like [`RpcClient::call`], racing the reply against `cancel`.
    ///
    /// # Errors
    /// Additionally returns [`RpcError::Cancelled`] as soon as the signal
    /// fires; the pending entry is deregistered and a late reply is
    /// discarded by the dispatcher.
    pub async fn call_with_cancel<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        cancel: oneshot::Receiver<()>,
    ) -> Result<T, RpcError> {
        self.call_inner(method, params, Some(cancel)).await
    }

    async fn call_inner<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        cancel: Option<oneshot::Receiver<()>>,
    ) -> Result<T, RpcError> {
        let id = self.inner.ids.next_id();
        let frame = Request::new(method, id, params).encode()?;

        // Register before sending so a fast reply cannot slip past. The
        // guard deregisters on every exit path, including a dropped future.
        let (guard, mut rx) = WaiterGuard::register(&self.inner.table, CorrelationKey::Id(id));
        self.connection().send_frame(frame).await?;
        tracing::debug!(method, id, "request sent");

        let reply = match cancel {
            Some(mut cancel) => tokio::select! {
                reply = rx.recv() => reply,
                res = &mut cancel => {
                    if res.is_ok() {
                        tracing::debug!(method, id, "call cancelled");
                        return Err(RpcError::Cancelled);
                    }
                    // Cancellation handle dropped; it can no longer fire.
                    rx.recv().await
                }
            },
            None => rx.recv().await,
        };
        guard.release();

        let Some(reply) = reply else {
            return Err(RpcError::ConnectionClosed);
        };
        ResponseFrame::decode(&reply)?.into_result()
    }

    /// Diagnostics view of the routing table.
    #[must_use]
    pub fn routing_table(&self) -> &RoutingTable {
        &self.inner.table
    }

    pub(crate) fn connection(&self) -> Connection {
        self.inner.conn.lock().unwrap().clone()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.inner.ids.next_id()
    }

    pub(crate) fn table(&self) -> &Arc<RoutingTable> {
        &self.inner.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{read_request, scripted_server, send_json};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_out_of_order_replies_pair_by_id() {
        let url = scripted_server(|mut ws| async move {
            let first = read_request(&mut ws).await;
            let second = read_request(&mut ws).await;
            // Answer in reverse arrival order.
            send_json(
                &mut ws,
                json!({"id": second.id, "result": second.params[0]}),
            )
            .await;
            send_json(&mut ws, json!({"id": first.id, "result": first.params[0]})).await;
        })
        .await;

        let client = RpcClient::connect(&url).await.unwrap();
        let (a, b) = tokio::join!(
            client.call::<String>("echo", vec![json!("one")]),
            client.call::<String>("echo", vec![json!("two")]),
        );
        assert_eq!(a.unwrap(), "one");
        assert_eq!(b.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_cancel_returns_promptly_and_removes_entry() {
        let url = scripted_server(|mut ws| async move {
            let _req = read_request(&mut ws).await;
            // Never reply; keep the connection up while the client cancels.
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        let client = RpcClient::connect(&url).await.unwrap();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = cancel_tx.send(());
        });

        let started = std::time::Instant::now();
        let err = client
            .call_with_cancel::<String>("slow", vec![], cancel_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!client.routing_table().contains(&CorrelationKey::Id(1)));
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_break_later_replies() {
        let url = scripted_server(|mut ws| async move {
            let req = read_request(&mut ws).await;
            send_json(&mut ws, json!("this is not an envelope")).await;
            send_json(&mut ws, json!({"id": req.id, "result": "ok"})).await;
        })
        .await;

        let client = RpcClient::connect(&url).await.unwrap();
        let out: String = client.call("ping", vec![]).await.unwrap();
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn test_application_error_is_surfaced() {
        let url = scripted_server(|mut ws| async move {
            let req = read_request(&mut ws).await;
            send_json(
                &mut ws,
                json!({"id": req.id, "result": null, "error": {"code": 7, "message": "denied"}}),
            )
            .await;
        })
        .await;

        let client = RpcClient::connect(&url).await.unwrap();
        let err = client.call::<String>("guarded", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Application { code: 7, .. }));
    }

    #[tokio::test]
    async fn test_connection_loss_unblocks_pending_call() {
        let url = scripted_server(|mut ws| async move {
            let _req = read_request(&mut ws).await;
            // Drop the connection instead of replying.
            drop(ws);
        })
        .await;

        let client = RpcClient::connect(&url).await.unwrap();
        let err = client.call::<String>("doomed", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
        assert!(client.routing_table().is_empty());
    }
}
