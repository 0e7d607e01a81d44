//! Message protocol definitions
//!
//! One JSON object per frame. The same record travels in both directions;
//! `timestamp` is only present on server → client frames.

use serde::{Deserialize, Serialize};

use crate::connection::MAX_FRAME_LENGTH;
use crate::error::ChatError;

/// Sender identity of synthetic server notices
pub const SERVER_NAME: &str = "SERVER";

/// Longest accepted username in bytes
pub const MAX_USERNAME_LENGTH: usize = 32;

/// Bytes reserved on a client frame for the server-assigned timestamp
pub const TIMESTAMP_HEADROOM: usize = 128;

/// Longest client frame that still fits once the server stamps it
pub const MAX_CLIENT_FRAME_LENGTH: usize = MAX_FRAME_LENGTH - TIMESTAMP_HEADROOM;

/// A chat message
///
/// Immutable once constructed; the server produces a stamped copy
/// instead of mutating the received one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    username: String,
    #[serde(rename = "message")]
    body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

impl Message {
    /// Client → server message (no timestamp)
    pub fn new(username: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            body: body.into(),
            timestamp: None,
        }
    }

    /// Server notice, stamped at creation
    pub fn notice(notice: &Notice, timestamp: impl Into<String>) -> Self {
        Self {
            username: SERVER_NAME.to_string(),
            body: notice.to_string(),
            timestamp: Some(timestamp.into()),
        }
    }

    /// Copy of this message carrying the server-assigned timestamp.
    /// Any timestamp supplied by the client is replaced.
    pub fn stamped(self, timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: Some(timestamp.into()),
            ..self
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    /// Whether this is the given server notice
    pub fn is_notice(&self, notice: &Notice) -> bool {
        self.username == SERVER_NAME && self.body == notice.to_string()
    }

    /// Serialize into a single wire frame.
    ///
    /// JSON escapes control characters inside strings, so the frame never
    /// contains a raw line break. Frames a receiver could not read back
    /// (longer than `MAX_FRAME_LENGTH`) are refused.
    pub fn encode(&self) -> Result<String, ChatError> {
        let frame = serde_json::to_string(self).map_err(ChatError::Encode)?;
        if frame.len() > MAX_FRAME_LENGTH {
            return Err(ChatError::FrameTooLong {
                len: frame.len(),
                max: MAX_FRAME_LENGTH,
            });
        }
        Ok(frame)
    }

    /// Parse one wire frame.
    pub fn decode(frame: &str) -> Result<Self, ChatError> {
        serde_json::from_str(frame).map_err(ChatError::Decode)
    }
}

/// Synthetic notices generated by the server itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Joined(String),
    Left(String),
    UsernameTaken(String),
    UsernameTooLong,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::Joined(username) => write!(f, "User {} has joined", username),
            Notice::Left(username) => write!(f, "User {} has left", username),
            Notice::UsernameTaken(username) => {
                write!(f, "Username {} is already taken", username)
            }
            Notice::UsernameTooLong => {
                write!(f, "Username must be at most {} bytes", MAX_USERNAME_LENGTH)
            }
        }
    }
}
