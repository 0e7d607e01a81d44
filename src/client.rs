//! Chat client session
//!
//! Mirrors the server protocol from the other side: register a username,
//! then print broadcasts on one task while the input loop sends lines.

use std::io::Write;

use tokio::io::{AsyncBufRead, Lines};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::{Connection, ConnectionReader};
use crate::error::ChatError;
use crate::message::{Message, Notice, MAX_CLIENT_FRAME_LENGTH, MAX_USERNAME_LENGTH};

/// Input line that ends the session
pub const EXIT_COMMAND: &str = "/exit";

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub address: String,
    pub port: u16,
}

impl ClientConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// User typed the exit command
    UserExit,
    /// Input stream reached EOF
    InputClosed,
    /// Server closed the connection or it failed
    ServerClosed,
}

/// Connect to the server.
pub async fn connect(config: &ClientConfig) -> Result<TcpStream, ChatError> {
    let addr = config.addr();
    println!(
        "[CONNECTING] Connecting server on host {} and port {}",
        config.address, config.port
    );
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| ChatError::Connect { addr, source })?;
    println!(
        "[CONNECTED] Connected to server on host {} and port {}",
        config.address, config.port
    );
    Ok(stream)
}

/// Run one session over `stream`, reading user input from `input`.
pub async fn run_session<I>(stream: TcpStream, mut input: Lines<I>) -> Result<SessionEnd, ChatError>
where
    I: AsyncBufRead + Unpin,
{
    let (connection, mut reader) = Connection::from_tcp(stream, CancellationToken::new());

    let Some(username) = register(&connection, &mut reader, &mut input).await? else {
        connection.shutdown().await;
        return Ok(SessionEnd::InputClosed);
    };

    let mut receive_task = tokio::spawn(receive_loop(reader, username.clone()));

    let end = tokio::select! {
        end = send_loop(&connection, &username, &mut input) => end?,
        _ = &mut receive_task => SessionEnd::ServerClosed,
    };

    connection.shutdown().await;
    receive_task.abort();
    if end != SessionEnd::ServerClosed {
        println!("Disconnected from the server.");
    }
    Ok(end)
}

/// Prompt until the server accepts a username.
///
/// Returns `None` if input ends first.
async fn register<I>(
    connection: &Connection,
    reader: &mut ConnectionReader,
    input: &mut Lines<I>,
) -> Result<Option<String>, ChatError>
where
    I: AsyncBufRead + Unpin,
{
    loop {
        prompt("Enter a username: ");
        let Some(line) = input.next_line().await? else {
            return Ok(None);
        };

        let username = line.trim();
        if username.is_empty() {
            println!("[ERROR] username cannot be empty");
            continue;
        }
        if username.len() > MAX_USERNAME_LENGTH {
            println!("[ERROR] {}", Notice::UsernameTooLong);
            continue;
        }

        connection.send(username).await?;
        let reply = Message::decode(&reader.receive().await?)?;

        if reply.is_notice(&Notice::UsernameTaken(username.to_string()))
            || reply.is_notice(&Notice::UsernameTooLong)
        {
            println!("[ERROR] {}", reply.body());
            continue;
        }

        // Anything else means we are registered; usually our own join notice
        println!("{}", format_incoming(&reply, username));
        return Ok(Some(username.to_string()));
    }
}

async fn receive_loop(mut reader: ConnectionReader, username: String) {
    loop {
        let message = match reader.receive().await {
            Ok(frame) => Message::decode(&frame),
            Err(e) => Err(e),
        };
        match message {
            Ok(message) => println!("{}", format_incoming(&message, &username)),
            Err(e) => {
                debug!("Receive loop ended: {}", e);
                println!("[ERROR] Disconnected from the server.");
                return;
            }
        }
    }
}

async fn send_loop<I>(
    connection: &Connection,
    username: &str,
    input: &mut Lines<I>,
) -> Result<SessionEnd, ChatError>
where
    I: AsyncBufRead + Unpin,
{
    while let Some(line) = input.next_line().await? {
        if line.is_empty() {
            println!("[ERROR] Message cannot be empty");
            continue;
        }
        if line == EXIT_COMMAND {
            return Ok(SessionEnd::UserExit);
        }

        // Leave room for the timestamp the server adds
        let frame = match Message::new(username, line).encode() {
            Ok(frame) if frame.len() <= MAX_CLIENT_FRAME_LENGTH => frame,
            Ok(_) | Err(ChatError::FrameTooLong { .. }) => {
                println!("[ERROR] Message is too long");
                continue;
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = connection.send(&frame).await {
            debug!("Send failed: {}", e);
            return Ok(SessionEnd::ServerClosed);
        }
    }
    Ok(SessionEnd::InputClosed)
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

/// Render an incoming message; the user's own messages show as `you`.
pub fn format_incoming(message: &Message, own_username: &str) -> String {
    let sender = if message.username() == own_username {
        "you"
    } else {
        message.username()
    };
    match message.timestamp() {
        Some(timestamp) => format!("[{}] {}: {}", timestamp, sender, message.body()),
        None => format!("{}: {}", sender, message.body()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_own_message_as_you() {
        let msg = Message::new("alice", "hi").stamped("ts");
        assert_eq!(format_incoming(&msg, "alice"), "[ts] you: hi");
    }

    #[test]
    fn test_format_other_message() {
        let msg = Message::new("bob", "hey");
        assert_eq!(format_incoming(&msg, "alice"), "bob: hey");
    }

    #[test]
    fn test_format_server_notice() {
        let msg = Message::notice(&Notice::Joined("bob".to_string()), "ts");
        assert_eq!(format_incoming(&msg, "alice"), "[ts] SERVER: User bob has joined");
    }

    #[test]
    fn test_client_config_addr() {
        let config = ClientConfig {
            address: "localhost".to_string(),
            port: 1234,
        };
        assert_eq!(config.addr(), "localhost:1234");
    }
}
