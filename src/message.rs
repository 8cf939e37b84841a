//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization, plus the chat message
//! record shared with the message store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::types::RoomId;

/// Sender id used for engine-generated messages
pub const SYSTEM_SENDER: &str = "system";

/// Kind of chat message content
///
/// For `Image` and `File` the content is a reference (URL) produced by an
/// upload service; the server never inspects file bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

/// One chat event, as broadcast to rooms and persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Username of the author, or `"system"`
    pub sender_id: String,
    pub room: RoomId,
    pub content: String,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Assigned by the server at receipt
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Build an engine-generated notice for a room
    pub fn system(room: RoomId, content: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender_id: SYSTEM_SENDER.to_string(),
            room,
            content,
            kind: MessageKind::System,
            filename: None,
            timestamp,
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }
}

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with camelCase naming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join a room under a username
    JoinRoom { username: String, room: String },
    /// Send a chat message to the current room
    SendMessage {
        content: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        filename: Option<String>,
    },
    /// Indicate typing started (or is still going on)
    Typing,
    /// Indicate typing stopped
    StopTyping,
    /// Leave the current room
    LeaveRoom,
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with camelCase naming.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Connection accepted, connection ID issued
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
    /// Join accepted
    JoinSuccess { room: RoomId, username: String },
    /// Persisted room history, sent only to the joiner
    MessageHistory { messages: Vec<ChatMessage> },
    /// Chat message (user or system)
    Message(ChatMessage),
    /// Current presence list of the room, in join order
    UserList { users: Vec<String> },
    /// Another member started typing
    Typing { username: String },
    /// Another member stopped typing
    StopTyping { username: String },
    /// Explicit leave acknowledged; the connection closes afterwards
    LeftRoom { room: RoomId },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

/// Error codes for ServerMessage::Error
///
/// Represents different error scenarios that can be communicated to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    /// Missing or too-short field
    Validation,
    /// Username already active in the room
    DuplicateUsername,
    /// Attempted action without joining a room
    NotInRoom,
    /// Already in a room
    AlreadyInRoom,
    /// Invalid message format
    InvalidMessage,
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let (code, message) = match &err {
            AppError::Validation(reason) => (ErrorCode::Validation, reason.clone()),
            AppError::DuplicateUsername => (
                ErrorCode::DuplicateUsername,
                "Username is already taken in this room".to_string(),
            ),
            AppError::NotInRoom => (ErrorCode::NotInRoom, "You are not in a room".to_string()),
            AppError::AlreadyInRoom => (
                ErrorCode::AlreadyInRoom,
                "You are already in a room".to_string(),
            ),
            AppError::InvalidMessage(reason) => (
                ErrorCode::InvalidMessage,
                format!("Invalid message format: {}", reason),
            ),
            AppError::Json(e) => (
                ErrorCode::InvalidMessage,
                format!("Invalid message format: {}", e),
            ),
            // Fatal errors are not typically converted (connection closes)
            _ => (ErrorCode::InvalidMessage, "Internal error".to_string()),
        };
        ServerMessage::Error { code, message }
    }
}
