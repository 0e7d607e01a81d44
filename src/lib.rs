//! Multi-client TCP Chat Library
//!
//! A line-based chat service built on tokio: the server registers each
//! connection under a unique username and rebroadcasts every message to
//! all connected clients.
//!
//! # Features
//! - Username registration with conflict replies
//! - Broadcast of chat messages with server timestamps
//! - Join/leave notices
//! - Disconnect cleanup and graceful shutdown
//! - A terminal client speaking the same protocol
//!
//! # Architecture
//! One task per connection, all sharing a lock-protected `Registry`:
//! - `ChatServer` accepts connections and spawns `handle_connection`
//! - `handle_connection` runs the per-connection lifecycle
//! - `broadcast` delivers a message to a snapshot of the registry
//! - `Connection` serializes writes so frames never interleave
//!
//! # Wire protocol
//! Newline-delimited frames. The first accepted frame from a client is its
//! raw username; every later frame is one JSON object
//! `{"username": ..., "message": ..., "timestamp": ...}`.
//!
//! # Example
//! ```ignore
//! use tcp_chat::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tcp_chat::ChatError> {
//!     let server = ChatServer::bind(&ServerConfig::default()).await?;
//!     let stop = server.shutdown_token();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         stop.cancel();
//!     });
//!     server.run().await
//! }
//! ```

pub mod broadcast;
pub mod client;
pub mod connection;
pub mod error;
pub mod handler;
pub mod logger;
pub mod message;
pub mod registry;
pub mod server;
pub mod time;
pub mod types;

// Re-export main types for convenience
pub use broadcast::{broadcast, broadcast_frame, BroadcastReport};
pub use client::{ClientConfig, SessionEnd};
pub use connection::{Connection, ConnectionReader, MAX_FRAME_LENGTH};
pub use error::ChatError;
pub use handler::{handle_connection, HandlerContext, LifecycleState};
pub use message::{
    Message, Notice, MAX_CLIENT_FRAME_LENGTH, MAX_USERNAME_LENGTH, SERVER_NAME, TIMESTAMP_HEADROOM,
};
pub use registry::Registry;
pub use server::{ChatServer, ServerConfig};
pub use time::{Clock, FixedClock, SystemClock};
pub use types::ConnectionId;
