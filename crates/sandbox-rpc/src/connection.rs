//! WebSocket connection: serialized writes and the frame dispatcher.
//!
//! The write half is shared behind a mutex so a frame is always written
//! whole; interleaved partial writes from two callers would corrupt the
//! stream. The read half belongs to exactly one task, the dispatcher,
//! which demultiplexes every inbound frame onto the routing table.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::RpcError;
use crate::protocol::{self, CorrelationKey};
use crate::router::{Deliver, RoutingTable};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// How many dispatch attempts an unmatched frame gets before it is dropped.
/// The legitimate race, a pushed event overtaking its subscribe ack,
/// resolves on the next table change; anything still unmatched after this
/// many rounds references a key that no longer exists.
const MAX_DELIVERY_ATTEMPTS: u32 = 64;

/// Backstop tick for redelivery. Table-change notifications drive the
/// common case; the tick covers notifications that land between two
/// dispatcher loop iterations.
const REDELIVERY_TICK: Duration = Duration::from_millis(25);

/// Shared write half of the duplex connection.
///
/// Clones share one sink; `send_frame` takes the sink lock for the whole
/// write, so concurrent senders queue and frames never interleave.
#[derive(Clone)]
pub struct Connection {
    sink: Arc<Mutex<WsSink>>,
}

impl Connection {
    /// Dial `url` and spawn the dispatcher against `table`.
    ///
    /// # Errors
    /// Returns a transport error if the WebSocket handshake fails.
    pub async fn connect(
        url: &str,
        table: Arc<RoutingTable>,
    ) -> Result<(Self, DispatcherHandle), RpcError> {
        let (ws, _response) = connect_async(url).await?;
        let (sink, stream) = ws.split();
        let conn = Self {
            sink: Arc::new(Mutex::new(sink)),
        };
        let handle = spawn_dispatcher(stream, table);
        Ok((conn, handle))
    }

    /// Send one complete text frame. Safe to call from many tasks.
    ///
    /// # Errors
    /// Returns a transport error if the physical write fails.
    pub async fn send_frame(&self, frame: String) -> Result<(), RpcError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::text(frame)).await?;
        Ok(())
    }

    /// Close the write half, which shuts the connection down cleanly.
    ///
    /// # Errors
    /// Returns a transport error if the close handshake fails.
    pub async fn close(&self) -> Result<(), RpcError> {
        let mut sink = self.sink.lock().await;
        sink.close().await?;
        Ok(())
    }
}

/// Owns the dispatcher task.
///
/// This is the governing lifetime scope of the read loop: dropping the
/// handle (or calling [`DispatcherHandle::shutdown`]) stops the dispatcher,
/// which then closes every live waiter so no caller blocks forever.
#[derive(Debug)]
pub struct DispatcherHandle {
    stop: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stop the dispatcher and wait for it to drain.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                tracing::error!("dispatcher task failed: {e}");
            }
        }
    }

    /// Whether the dispatcher has already exited (connection lost).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn spawn_dispatcher(stream: SplitStream<WsStream>, table: Arc<RoutingTable>) -> DispatcherHandle {
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(dispatch_loop(stream, table, stop_rx));
    DispatcherHandle {
        stop: Some(stop_tx),
        task,
    }
}

/// A frame that arrived before its waiter was registered, awaiting
/// redelivery.
struct PendingFrame {
    key: CorrelationKey,
    frame: Bytes,
    attempts: u32,
}

/// The sole reader of the connection.
///
/// Reads one frame at a time, extracts its correlation key, and hands it
/// to the matching waiter. Unmatched frames are requeued and retried when
/// the routing table changes or on the backstop tick, never in a spin
/// loop. On exit (read error, close, or shutdown) the routing table is
/// drained so every waiter observes end-of-channel.
async fn dispatch_loop(
    mut stream: SplitStream<WsStream>,
    table: Arc<RoutingTable>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut pending: VecDeque<PendingFrame> = VecDeque::new();
    let mut tick = tokio::time::interval(REDELIVERY_TICK);

    loop {
        flush_pending(&table, &mut pending);

        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                        route(&table, &mut pending, msg.into_data());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("connection closed by remote");
                        break;
                    }
                    // Ping/pong are handled inside tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("connection read failed: {e}");
                        break;
                    }
                }
            }
            () = table.changed(), if !pending.is_empty() => {}
            _ = tick.tick(), if !pending.is_empty() => {}
            _ = &mut stop => break,
        }
    }

    if !pending.is_empty() {
        tracing::warn!(count = pending.len(), "dropping undelivered frames at shutdown");
    }
    table.clear();
}

fn route(table: &RoutingTable, pending: &mut VecDeque<PendingFrame>, frame: Bytes) {
    match protocol::correlation_key(&frame) {
        Ok(Some(key)) => {
            tracing::trace!(%key, len = frame.len(), "frame received");
            // Frames already queued for this key must stay ahead;
            // delivering around them would reorder the key's stream.
            if pending.iter().any(|p| p.key == key) {
                pending.push_back(PendingFrame {
                    key,
                    frame,
                    attempts: 0,
                });
            } else {
                attempt(table, pending, key, frame, 0);
            }
        }
        Ok(None) => {
            tracing::warn!("dropping frame with no correlation key");
        }
        Err(e) => {
            tracing::warn!("dropping undecodable frame: {e}");
        }
    }
}

/// One delivery attempt. Returns false when the frame went back onto the
/// retry queue.
fn attempt(
    table: &RoutingTable,
    pending: &mut VecDeque<PendingFrame>,
    key: CorrelationKey,
    frame: Bytes,
    attempts: u32,
) -> bool {
    let back = match table.deliver(&key, frame) {
        Deliver::Delivered => return true,
        Deliver::Busy(frame) | Deliver::NoWaiter(frame) => frame,
    };
    if attempts + 1 >= MAX_DELIVERY_ATTEMPTS {
        tracing::warn!(%key, "dropping frame with no matching waiter");
        return true;
    }
    pending.push_back(PendingFrame {
        key,
        frame: back,
        attempts: attempts + 1,
    });
    false
}

fn flush_pending(table: &RoutingTable, pending: &mut VecDeque<PendingFrame>) {
    // Keys whose head frame failed this round stay blocked so their later
    // frames are not attempted out of order.
    let mut blocked: Vec<CorrelationKey> = Vec::new();
    for _ in 0..pending.len() {
        let Some(p) = pending.pop_front() else { break };
        if blocked.contains(&p.key) {
            pending.push_back(p);
            continue;
        }
        let key = p.key.clone();
        if !attempt(table, pending, p.key, p.frame, p.attempts) {
            blocked.push(key);
        }
    }
}
