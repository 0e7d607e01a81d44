//! Connection lifecycle
//!
//! Drives one accepted connection through registration, message relay and
//! disconnect cleanup:
//!
//! `Accepted → Registering → Active → Disconnected`
//!
//! Every path ends in `Disconnected`, which removes the registry entry,
//! broadcasts the leave notice and closes the stream.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broadcast::{broadcast, broadcast_frame};
use crate::connection::{Connection, ConnectionReader};
use crate::error::ChatError;
use crate::message::{Message, Notice, MAX_USERNAME_LENGTH, SERVER_NAME};
use crate::registry::Registry;
use crate::time::Clock;

/// Shared state handed to every connection task
#[derive(Clone)]
pub struct HandlerContext {
    pub registry: Arc<Registry>,
    pub clock: Arc<dyn Clock>,
}

impl HandlerContext {
    pub fn new(registry: Arc<Registry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    fn notice(&self, notice: Notice) -> Message {
        Message::notice(&notice, self.clock.now())
    }
}

/// Lifecycle states of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// Stream exists, no username yet
    Accepted,
    /// Waiting for a free username
    Registering,
    /// Registered under the given username
    Active(String),
    /// Terminal
    Disconnected,
}

/// Removes the registry entry and closes the connection if the lifecycle
/// task unwinds before reaching its own cleanup.
struct RegistrationGuard<'a> {
    registry: &'a Registry,
    connection: &'a Connection,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        if let Some(username) = unregister(self.registry, self.connection) {
            warn!("Removed '{}' without a leave notice", username);
        }
        self.connection.close();
    }
}

/// Run the lifecycle of one connection to completion.
pub async fn handle_connection(
    connection: Arc<Connection>,
    mut reader: ConnectionReader,
    ctx: HandlerContext,
) {
    let _guard = RegistrationGuard {
        registry: &ctx.registry,
        connection: &connection,
    };

    let mut state = LifecycleState::Accepted;
    loop {
        debug!("Connection {} is {:?}", connection.id(), state);
        state = match state {
            LifecycleState::Accepted => LifecycleState::Registering,
            LifecycleState::Registering => register(&connection, &mut reader, &ctx).await,
            LifecycleState::Active(username) => relay(&username, &mut reader, &ctx).await,
            LifecycleState::Disconnected => break,
        };
    }

    disconnect(&connection, &ctx).await;
}

/// Read username candidates until one is accepted or the stream ends.
async fn register(
    connection: &Arc<Connection>,
    reader: &mut ConnectionReader,
    ctx: &HandlerContext,
) -> LifecycleState {
    loop {
        let frame = match reader.receive().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Connection {} ended before registering: {}", connection.id(), e);
                return LifecycleState::Disconnected;
            }
        };

        let candidate = frame.trim();
        if candidate.is_empty() {
            debug!("Ignoring empty username from {}", connection.peer());
            continue;
        }

        // Bounds every notice that carries the name
        if candidate.len() > MAX_USERNAME_LENGTH {
            warn!(
                "Rejected {} byte username from {}",
                candidate.len(),
                connection.peer()
            );
            if let Err(e) = send_to(connection, &ctx.notice(Notice::UsernameTooLong)).await {
                debug!("Could not deliver rejection to {}: {}", connection.peer(), e);
                return LifecycleState::Disconnected;
            }
            continue;
        }

        if candidate == SERVER_NAME || !ctx.registry.try_register(candidate, connection) {
            let conflict = ChatError::RegistrationConflict(candidate.to_string());
            warn!("Rejected registration from {}: {}", connection.peer(), conflict);

            let reply = ctx.notice(Notice::UsernameTaken(candidate.to_string()));
            if let Err(e) = send_to(connection, &reply).await {
                debug!("Could not deliver rejection to {}: {}", connection.peer(), e);
                return LifecycleState::Disconnected;
            }
            continue;
        }

        connection.bind_username(candidate);
        info!("User with username {} is active", candidate);

        broadcast(&ctx.registry, &ctx.notice(Notice::Joined(candidate.to_string()))).await;
        return LifecycleState::Active(candidate.to_string());
    }
}

/// Relay this peer's messages to everyone until the stream ends.
async fn relay(username: &str, reader: &mut ConnectionReader, ctx: &HandlerContext) -> LifecycleState {
    loop {
        let frame = match reader.receive().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Receive from '{}' ended: {}", username, e);
                return LifecycleState::Disconnected;
            }
        };

        // Malformed frames end the connection rather than being skipped
        let message = match Message::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Disconnecting '{}': {}", username, e);
                return LifecycleState::Disconnected;
            }
        };

        if message.username() != username {
            warn!(
                "Dropping message from '{}' claiming to be '{}'",
                username,
                message.username()
            );
            continue;
        }

        // Stamping grows the frame; drop what receivers could not read back
        let frame = match message.stamped(ctx.clock.now()).encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping message from '{}': {}", username, e);
                continue;
            }
        };
        broadcast_frame(&ctx.registry, &frame).await;
    }
}

/// Remove this connection's entry, by its bound username when it has one.
fn unregister(registry: &Registry, connection: &Connection) -> Option<String> {
    match connection.username() {
        Some(username) => registry
            .unregister(username, connection.id())
            .map(|_| username.to_string()),
        None => registry.unregister_by_connection(connection),
    }
}

/// Terminal cleanup: unregister, announce, close.
async fn disconnect(connection: &Connection, ctx: &HandlerContext) {
    if let Some(username) = unregister(&ctx.registry, connection) {
        info!("User with username {} has disconnected", username);
        broadcast(&ctx.registry, &ctx.notice(Notice::Left(username))).await;
    }
    connection.shutdown().await;
}

async fn send_to(connection: &Connection, message: &Message) -> Result<(), ChatError> {
    connection.send(&message.encode()?).await
}
