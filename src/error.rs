//! Error types for the chat server and client
//!
//! Separates fatal startup errors (bind/connect) from errors scoped to a
//! single connection. Uses thiserror for ergonomic error definitions.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Chat errors
///
/// Only the binaries decide to terminate the process; library code
/// returns these and lets the caller choose.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Listener could not bind (fatal for the server process)
    #[error("Unable to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Client could not reach the server (fatal for the client process)
    #[error("Unable to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Peer closed the stream, or the connection was closed locally
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O or framing failure on an established connection
    #[error("Connection error: {0}")]
    Connection(#[from] LinesCodecError),

    /// Frame was not a well-formed encoded message
    #[error("Invalid message: {0}")]
    Decode(#[source] serde_json::Error),

    /// Message could not be serialized
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Encoded frame is longer than a receiver will accept
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLong { len: usize, max: usize },

    /// Username is held by another active connection
    #[error("Username '{0}' is already taken")]
    RegistrationConflict(String),

    /// IO error outside of an established connection
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Errors that end one connection's lifecycle and nothing else.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ChatError::ConnectionClosed | ChatError::Connection(_) | ChatError::Decode(_)
        )
    }
}
