//! Error types for the chat server
//!
//! Defines application-level errors, per-connection send errors,
//! and message store errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (send error message to client).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Missing or malformed request field
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Username is already active in the target room
    #[error("Username already taken")]
    DuplicateUsername,

    /// Client is not in any room
    #[error("Not in room")]
    NotInRoom,

    /// Client is already in (or joining) a room
    #[error("Already in room")]
    AlreadyInRoom,

    /// Client frame could not be understood
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Message send errors
///
/// Occurs when a single connection cannot accept a delivery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The receiver did not make room within the send timeout
    #[error("Send timed out")]
    Timeout,
}

/// Message store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is not reachable
    #[error("Store unavailable")]
    Unavailable,
}
