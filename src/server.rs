//! Chat server listener
//!
//! Accepts TCP connections and spawns one lifecycle task per connection.
//! All tasks share a single `Registry`. Cancelling the shutdown token stops
//! the accept loop and closes every connection, since each connection's
//! close token is a child of it.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::connection::Connection;
use crate::error::ChatError;
use crate::handler::{handle_connection, HandlerContext};
use crate::registry::Registry;
use crate::time::{Clock, SystemClock};

/// Default bind host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port
pub const DEFAULT_PORT: u16 = 1234;

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` string used for binding
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

/// A bound chat server
pub struct ChatServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ChatServer {
    /// Bind the listening socket. No retry on failure.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ChatError> {
        let addr = config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ChatError::Bind { addr, source })?;

        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Replace the timestamp source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the accept loop until the shutdown token is cancelled.
    ///
    /// Returns once every connection task has finished its cleanup.
    pub async fn run(self) -> Result<(), ChatError> {
        let ChatServer {
            listener,
            registry,
            clock,
            shutdown,
            tracker,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!("Chat server listening on {}", addr);
        }
        let ctx = HandlerContext::new(Arc::clone(&registry), clock);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("Successfully connected to client {}", addr);
                        let (connection, reader) =
                            Connection::from_tcp(stream, shutdown.child_token());
                        tracker.spawn(handle_connection(connection, reader, ctx.clone()));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        info!("Shutting down: closing listener and {} client(s)", registry.len());
        drop(listener);
        registry.close_all();

        tracker.close();
        tracker.wait().await;

        info!("Server stopped");
        Ok(())
    }
}
