//! Connection wrapper
//!
//! Wraps one transport stream as newline-delimited frames. The write half
//! lives in a shared `Connection` (reachable from the registry for
//! broadcast); the read half is a `ConnectionReader` owned exclusively by
//! the task driving that connection's lifecycle.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ChatError;
use crate::types::ConnectionId;

/// Longest accepted frame in bytes (excluding the line terminator)
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Upper bound on the write-side shutdown during cleanup
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared send side of one connection
///
/// Sends are serialized by a per-connection lock so frames from concurrent
/// broadcasts never interleave on the wire.
pub struct Connection {
    id: ConnectionId,
    peer: String,
    /// Set once, on successful registration
    username: OnceLock<String>,
    writer: Mutex<FramedWrite<BoxedWriter, LinesCodec>>,
    closed: CancellationToken,
}

/// Exclusive receive side of one connection
pub struct ConnectionReader {
    id: ConnectionId,
    reader: FramedRead<BoxedReader, LinesCodec>,
    closed: CancellationToken,
}

impl Connection {
    /// Wrap a reader/writer pair.
    ///
    /// Cancelling `closed` (directly or through a parent token) closes the
    /// connection and unblocks any pending `send` or `receive`.
    pub fn new<R, W>(
        reader: R,
        writer: W,
        peer: impl Into<String>,
        closed: CancellationToken,
    ) -> (Arc<Self>, ConnectionReader)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = ConnectionId::new();
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);

        let connection = Arc::new(Self {
            id,
            peer: peer.into(),
            username: OnceLock::new(),
            writer: Mutex::new(FramedWrite::new(
                writer,
                LinesCodec::new_with_max_length(MAX_FRAME_LENGTH),
            )),
            closed: closed.clone(),
        });
        let reader = ConnectionReader {
            id,
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH)),
            closed,
        };
        (connection, reader)
    }

    /// Wrap an accepted or connected TCP stream.
    pub fn from_tcp(stream: TcpStream, closed: CancellationToken) -> (Arc<Self>, ConnectionReader) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, peer, closed)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Username bound at registration, if any
    pub fn username(&self) -> Option<&str> {
        self.username.get().map(String::as_str)
    }

    /// Bind the username. Returns false if one was already bound.
    pub fn bind_username(&self, username: &str) -> bool {
        self.username.set(username.to_string()).is_ok()
    }

    /// Write one frame, waiting until it is fully flushed.
    pub async fn send(&self, frame: &str) -> Result<(), ChatError> {
        if self.closed.is_cancelled() {
            return Err(ChatError::ConnectionClosed);
        }

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(ChatError::ConnectionClosed),
            result = async {
                let mut writer = self.writer.lock().await;
                writer.send(frame).await
            } => result.map_err(ChatError::from),
        }
    }

    /// Close the connection. Idempotent and callable from any task.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!("Closing connection {} ({})", self.id, self.peer);
        }
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Close and shut down the write side so the peer observes EOF even
    /// while other tasks still hold a reference to this connection.
    pub async fn shutdown(&self) {
        self.close();
        let mut writer = self.writer.lock().await;
        let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.get_mut().shutdown()).await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("username", &self.username.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionReader {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for the next frame.
    ///
    /// Returns `ConnectionClosed` on orderly EOF or when the connection is
    /// closed locally, and `Connection` on I/O or framing failure.
    pub async fn receive(&mut self) -> Result<String, ChatError> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(ChatError::ConnectionClosed),
            frame = self.reader.next() => match frame {
                Some(Ok(line)) => Ok(line),
                Some(Err(e)) => Err(e.into()),
                None => Err(ChatError::ConnectionClosed),
            },
        }
    }
}
