//! Error taxonomy for the RPC transport.

use thiserror::Error;

/// Transport-level error.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The remote rejected the call; carries the remote code and message.
    #[error("remote error {code}: {message}")]
    Application { code: i64, message: String },

    /// A frame or payload could not be decoded into the expected shape.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The underlying socket failed.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection closed before a reply arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The caller's cancellation signal fired before a reply arrived.
    #[error("call cancelled")]
    Cancelled,

    /// The remote signalled end-of-stream for a subscription with an error.
    #[error("subscription error: {0}")]
    Subscription(String),
}

impl RpcError {
    /// True for errors that are fatal to the whole connection, as opposed to
    /// a single call.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectionClosed)
    }
}
