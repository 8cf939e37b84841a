//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake,
//! message parsing, and bidirectional communication with the ChatServer.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::message::{ClientMessage, ServerMessage};
use crate::server::ServerCommand;
use crate::types::ConnectionId;

/// How long a connection the server has let go of may spend flushing its
/// queued messages before the transport is dropped
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Handle a new TCP connection
///
/// Performs WebSocket handshake, sets up bidirectional communication,
/// and manages the connection lifecycle. `buffer` bounds the outbound
/// queue; a client that lets it fill up is evicted by the server.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
    buffer: usize,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Generate connection ID
    let connection_id = ConnectionId::new();
    info!("Connection {} established from {}", connection_id, peer_addr);

    // Send connection success message before the server can queue anything
    let connected_msg = ServerMessage::Connected {
        connection_id: connection_id.to_string(),
    };
    let json = serde_json::to_string(&connected_msg)?;
    ws_sender.send(Message::Text(json.into())).await?;

    // Create channel for server -> client messages
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(buffer);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    // Register with ChatServer
    if cmd_tx
        .send(ServerCommand::Connect {
            connection_id,
            sender: msg_tx,
            shutdown: shutdown_tx,
        })
        .await
        .is_err()
    {
        error!(
            "Failed to register connection {} - server closed",
            connection_id
        );
        return Err(AppError::ChannelSend);
    }

    // Clone cmd_tx for read task
    let cmd_tx_read = cmd_tx.clone();

    // Spawn read task (WebSocket -> ServerCommand)
    let mut read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            let cmd = match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => client_message_to_command(connection_id, client_msg),
                    Err(e) => {
                        warn!("Invalid JSON from {}: {}", connection_id, e);
                        ServerCommand::Malformed {
                            connection_id,
                            reason: e.to_string(),
                        }
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Connection {} sent close frame", connection_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", connection_id);
                    continue;
                }
                Ok(_) => {
                    // Binary or other message types - ignore
                    continue;
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", connection_id, e);
                    break;
                }
            };

            if cmd_tx_read.send(cmd).await.is_err() {
                debug!("Server closed, ending read task for {}", connection_id);
                break;
            }
        }
        debug!("Read task ended for {}", connection_id);
    });

    // Spawn write task (ServerMessage -> WebSocket)
    // Ends once the server drops every sender for this connection
    // (leave, eviction or disconnect cleanup).
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
        debug!("Write task ended for connection");

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    // Wait for either task to complete or for the server to let go of the
    // connection, then stop whatever is still running
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", connection_id);
            write_task.abort();
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", connection_id);
            read_task.abort();
        }
        _ = &mut shutdown_rx => {
            debug!("Server closed connection {}", connection_id);
            read_task.abort();
            // Flush leftRoom and friends unless the peer has stopped reading
            if tokio::time::timeout(CLOSE_GRACE, &mut write_task).await.is_err() {
                warn!("Connection {} did not drain in time, dropping it", connection_id);
                write_task.abort();
            }
        }
    }

    // Cleanup is idempotent on the server side
    let _ = cmd_tx
        .send(ServerCommand::Disconnect { connection_id })
        .await;

    info!("Connection {} closed", connection_id);

    Ok(())
}

/// Convert a ClientMessage to a ServerCommand
fn client_message_to_command(connection_id: ConnectionId, msg: ClientMessage) -> ServerCommand {
    match msg {
        ClientMessage::JoinRoom { username, room } => ServerCommand::JoinRoom {
            connection_id,
            username,
            room,
        },
        ClientMessage::SendMessage {
            content,
            kind,
            filename,
        } => ServerCommand::SendMessage {
            connection_id,
            content,
            kind,
            filename,
        },
        ClientMessage::Typing => ServerCommand::Typing { connection_id },
        ClientMessage::StopTyping => ServerCommand::StopTyping { connection_id },
        ClientMessage::LeaveRoom => ServerCommand::LeaveRoom { connection_id },
    }
}
