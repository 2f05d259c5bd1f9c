//! Multiplexed JSON-RPC transport over a single duplex connection.
//!
//! Many independent operations, one-shot calls as well as long-lived push
//! subscriptions, share one persistent WebSocket. This crate provides:
//! - `IdAllocator` - strictly increasing request ids
//! - `RoutingTable` - correlation key → waiter mapping
//! - `Connection` + dispatcher - serialized writes, single-reader demux
//! - `RpcClient` - the call path and subscription entry points
//! - `Subscription` - the subscribe → active → unsubscribe → closed machine

pub mod client;
pub mod connection;
pub mod error;
pub mod id;
pub mod protocol;
pub mod router;
pub mod subscription;

#[cfg(test)]
mod testutil;

pub use client::RpcClient;
pub use connection::{Connection, DispatcherHandle};
pub use error::RpcError;
pub use id::IdAllocator;
pub use protocol::{CorrelationKey, ErrorObject, Request, ResponseFrame};
pub use router::RoutingTable;
pub use subscription::{Subscription, SubscriptionState};
