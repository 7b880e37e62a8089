//! Error types for broccoli-client.

use thiserror::Error;

/// Main error type for all connection and codec operations.
///
/// Every fatal variant (`Io`, `Decode`, `Frame`, `Handshake`, `Protocol`)
/// transitions the owning connection to `Closed`; the transport is released
/// exactly once.
#[derive(Debug, Error)]
pub enum BroError {
    /// I/O error on the underlying transport. Fatal to the connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A typed value could not be decoded (unrecognized tag, bad UTF-8,
    /// or not enough bytes for the declared length).
    #[error("decode error: {0}")]
    Decode(String),

    /// An event frame was structurally invalid (truncated header, declared
    /// lengths exceeding the buffer, or frame limits exceeded).
    #[error("frame error: {0}")]
    Frame(String),

    /// Handshake failed: bad magic, protocol version mismatch, or the peer
    /// closed before completing the hello exchange. The connection never
    /// reaches `Ready`.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Protocol violation outside the codec layer (reserved event name,
    /// unexpected control frame, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation attempted after the connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The outbound buffer stayed full past the configured timeout.
    #[error("send timed out waiting for outbound buffer space")]
    SendTimeout,
}

/// Result type alias using BroError.
pub type Result<T> = std::result::Result<T, BroError>;
