//! Connection record
//!
//! Represents one live client link: its per-connection state machine, its
//! outbound message channel and the signal that closes its transport. The
//! socket itself stays in the handler task; the engine only holds the send
//! capability. The room a connection belongs to lives in the presence
//! registry.

use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};

use crate::error::SendError;
use crate::message::ServerMessage;

/// Session state of a connection
///
/// `Connected → Joining → Active → Disconnected`. A rejected join returns to
/// `Connected`; `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, not in a room
    Connected,
    /// Username reserved, waiting for the room history
    Joining,
    /// Registered and subscribed to the room
    Active,
    /// Cleaned up; the record is about to be dropped
    Disconnected,
}

/// Connected client information
#[derive(Debug)]
pub struct Connection {
    /// Username (None until a join is accepted)
    pub username: Option<String>,
    pub state: ConnectionState,
    pub connected_at: Instant,
    /// Server → Client message channel
    pub sender: mpsc::Sender<ServerMessage>,
    /// Tells the handler to close the transport
    shutdown: Option<oneshot::Sender<()>>,
}

impl Connection {
    /// Create a new connection with its outbound channel and close signal
    pub fn new(sender: mpsc::Sender<ServerMessage>, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            username: None,
            state: ConnectionState::Connected,
            connected_at: Instant::now(),
            sender,
            shutdown: Some(shutdown),
        }
    }

    /// Deliver a message to this connection, waiting at most `timeout`
    ///
    /// Returns an error if the channel is closed (client disconnected) or
    /// stays full for the whole timeout (client too slow).
    pub async fn deliver(&self, msg: ServerMessage, timeout: Duration) -> Result<(), SendError> {
        deliver(&self.sender, msg, timeout).await
    }

    /// Record an accepted join; the connection waits for its history
    pub fn begin_join(&mut self, username: String) {
        self.username = Some(username);
        self.state = ConnectionState::Joining;
    }

    pub fn activate(&mut self) {
        self.state = ConnectionState::Active;
    }

    /// Mark the connection terminal, returning the state it was in
    pub fn close(&mut self) -> ConnectionState {
        std::mem::replace(&mut self.state, ConnectionState::Disconnected)
    }

    /// Ask the handler to close the transport, even if the peer is stalled
    pub fn shut_down(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // Handler already gone
            let _ = shutdown.send(());
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    /// Whether a join is accepted or in flight
    pub fn is_in_room(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Joining | ConnectionState::Active
        )
    }
}

/// Bounded delivery over a connection's channel
pub async fn deliver(
    sender: &mpsc::Sender<ServerMessage>,
    msg: ServerMessage,
    timeout: Duration,
) -> Result<(), SendError> {
    sender.send_timeout(msg, timeout).await.map_err(|e| match e {
        SendTimeoutError::Timeout(_) => SendError::Timeout,
        SendTimeoutError::Closed(_) => SendError::ChannelClosed,
    })
}
