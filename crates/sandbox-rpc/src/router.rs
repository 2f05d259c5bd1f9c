//! Correlation-key → waiter routing table.
//!
//! The table is the only shared mutable structure in the transport. All
//! access goes through explicit register/rekey/remove/deliver operations;
//! the map itself is never exposed.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::{Notify, mpsc};

use crate::protocol::CorrelationKey;

/// Per-waiter inbound queue depth. A consumer that falls further behind
/// than this stalls redelivery of its own frames only; the dispatcher
/// never blocks on it.
pub(crate) const WAITER_CAPACITY: usize = 64;

/// Outcome of a non-blocking delivery attempt. Failed attempts hand the
/// frame back so the dispatcher can requeue it.
#[derive(Debug)]
pub(crate) enum Deliver {
    Delivered,
    /// Waiter exists but its queue is full.
    Busy(Bytes),
    /// No waiter registered under the key (yet).
    NoWaiter(Bytes),
}

/// Concurrency-safe mapping from correlation key to waiter.
///
/// Invariant: at most one live entry per key. Numeric ids are never reused
/// and tokens are unique per active subscription, so an insert can only
/// collide if a caller leaked an entry; that is a bug and gets logged.
#[derive(Debug, Default)]
pub struct RoutingTable {
    waiters: Mutex<HashMap<CorrelationKey, mpsc::Sender<Bytes>>>,
    changed: Notify,
}

impl RoutingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh waiter under `key` and return its receiving half.
    ///
    /// Must be called before the request frame is sent, so a fast reply
    /// cannot race past an unregistered waiter.
    pub(crate) fn register(&self, key: CorrelationKey) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(WAITER_CAPACITY);
        let old = self.waiters.lock().unwrap().insert(key.clone(), tx);
        if old.is_some() {
            tracing::warn!(%key, "replaced a live waiter; previous entry leaked");
        }
        self.changed.notify_waiters();
        rx
    }

    /// Move a live waiter from `from` to `to` in one table operation.
    ///
    /// Used when a subscription acknowledgment arrives and routing switches
    /// from the interim numeric id to the remote-issued token. Returns
    /// false if `from` holds no entry.
    pub(crate) fn rekey(&self, from: &CorrelationKey, to: CorrelationKey) -> bool {
        let mut waiters = self.waiters.lock().unwrap();
        let Some(tx) = waiters.remove(from) else {
            return false;
        };
        waiters.insert(to, tx);
        drop(waiters);
        self.changed.notify_waiters();
        true
    }

    /// Remove the entry under `key`. Returns true if one was present.
    pub(crate) fn remove(&self, key: &CorrelationKey) -> bool {
        let removed = self.waiters.lock().unwrap().remove(key).is_some();
        if removed {
            self.changed.notify_waiters();
        }
        removed
    }

    /// Whether a waiter is currently registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.waiters.lock().unwrap().contains_key(key)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking handoff of one frame to the waiter under `key`.
    pub(crate) fn deliver(&self, key: &CorrelationKey, frame: Bytes) -> Deliver {
        let tx = {
            let waiters = self.waiters.lock().unwrap();
            waiters.get(key).cloned()
        };
        let Some(tx) = tx else {
            return Deliver::NoWaiter(frame);
        };
        match tx.try_send(frame) {
            Ok(()) => Deliver::Delivered,
            Err(mpsc::error::TrySendError::Full(frame)) => Deliver::Busy(frame),
            // Receiver dropped without deregistering; entry is stale.
            Err(mpsc::error::TrySendError::Closed(frame)) => Deliver::NoWaiter(frame),
        }
    }

    /// Drop every waiter so each receiver observes end-of-channel.
    ///
    /// Called on dispatcher exit: no caller may block forever on a reply
    /// that can no longer arrive.
    pub(crate) fn clear(&self) {
        self.waiters.lock().unwrap().clear();
        self.changed.notify_waiters();
    }

    /// Wait until the set of registered waiters changes.
    pub(crate) async fn changed(&self) {
        self.changed.notified().await;
    }
}

/// Removes a routing entry exactly once, on every exit path.
///
/// Holding the guard keeps the entry owned; dropping it (normal return,
/// cancellation, panic) deregisters the key so no entry can leak. Owns an
/// `Arc` of the table so it can travel into spawned consumer tasks.
#[derive(Debug)]
pub(crate) struct WaiterGuard {
    table: std::sync::Arc<RoutingTable>,
    key: Option<CorrelationKey>,
}

impl WaiterGuard {
    /// Register a waiter under `key` and guard its entry.
    pub(crate) fn register(
        table: &std::sync::Arc<RoutingTable>,
        key: CorrelationKey,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let rx = table.register(key.clone());
        (
            Self {
                table: std::sync::Arc::clone(table),
                key: Some(key),
            },
            rx,
        )
    }

    /// Re-key the guarded entry, keeping the same waiter channel.
    pub(crate) fn rekey(&mut self, to: CorrelationKey) -> bool {
        let Some(from) = self.key.as_ref() else {
            return false;
        };
        let moved = self.table.rekey(from, to.clone());
        if moved {
            self.key = Some(to);
        }
        moved
    }

    /// Deregister now rather than at drop.
    pub(crate) fn release(mut self) {
        if let Some(key) = self.key.take() {
            self.table.remove(&key);
        }
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.table.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> CorrelationKey {
        CorrelationKey::Id(n)
    }

    fn token(t: &str) -> CorrelationKey {
        CorrelationKey::Token(t.to_string())
    }

    #[tokio::test]
    async fn test_register_deliver_remove() {
        let table = RoutingTable::new();
        let mut rx = table.register(id(1));

        assert!(matches!(
            table.deliver(&id(1), Bytes::from_static(b"a")),
            Deliver::Delivered
        ));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));

        assert!(table.remove(&id(1)));
        assert!(!table.contains(&id(1)));
        assert!(matches!(
            table.deliver(&id(1), Bytes::from_static(b"b")),
            Deliver::NoWaiter(_)
        ));
    }

    #[tokio::test]
    async fn test_rekey_keeps_waiter_channel() {
        let table = RoutingTable::new();
        let mut rx = table.register(id(4));

        assert!(table.rekey(&id(4), token("sub-1")));
        assert!(!table.contains(&id(4)));
        assert!(table.contains(&token("sub-1")));

        assert!(matches!(
            table.deliver(&token("sub-1"), Bytes::from_static(b"ev")),
            Deliver::Delivered
        ));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"ev"));
    }

    #[tokio::test]
    async fn test_full_waiter_reports_busy() {
        let table = RoutingTable::new();
        let _rx = table.register(id(9));
        for _ in 0..WAITER_CAPACITY {
            assert!(matches!(
                table.deliver(&id(9), Bytes::from_static(b"x")),
                Deliver::Delivered
            ));
        }
        assert!(matches!(
            table.deliver(&id(9), Bytes::from_static(b"x")),
            Deliver::Busy(_)
        ));
    }

    #[tokio::test]
    async fn test_clear_closes_every_waiter() {
        let table = RoutingTable::new();
        let mut rx1 = table.register(id(1));
        let mut rx2 = table.register(token("sub-1"));

        table.clear();
        assert!(table.is_empty());
        assert!(rx1.recv().await.is_none());
        assert!(rx2.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_guard_removes_entry_on_drop() {
        let table = std::sync::Arc::new(RoutingTable::new());
        {
            let (_guard, _rx) = WaiterGuard::register(&table, id(2));
            assert!(table.contains(&id(2)));
        }
        assert!(!table.contains(&id(2)));
    }

    #[tokio::test]
    async fn test_guard_tracks_rekeyed_entry() {
        let table = std::sync::Arc::new(RoutingTable::new());
        {
            let (mut guard, _rx) = WaiterGuard::register(&table, id(3));
            assert!(guard.rekey(token("sub-2")));
            assert!(table.contains(&token("sub-2")));
        }
        assert!(!table.contains(&token("sub-2")));
    }

    #[tokio::test]
    async fn test_changed_wakes_on_register() {
        let table = std::sync::Arc::new(RoutingTable::new());
        let waiter = {
            let table = std::sync::Arc::clone(&table);
            tokio::spawn(async move { table.changed().await })
        };
        // Give the waiter task time to park on the notification.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let _rx = table.register(id(1));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("changed() did not wake")
            .unwrap();
    }
}
