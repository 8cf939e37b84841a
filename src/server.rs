//! ChatServer Actor implementation
//!
//! The session engine: the single owner of connections, presence, typing
//! state and room subscriptions. Handlers talk to it over an mpsc channel,
//! so every mutation is applied one command at a time and every room sees
//! its events in the order the actor produced them.
//!
//! Store calls (persist, history fetch) run in spawned tasks and never hold
//! up the actor; history results come back as an internal event.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::broadcast::RoomBroadcaster;
use crate::config::{JoinRejection, ServerConfig, MIN_NAME_LEN};
use crate::connection::{Connection, ConnectionState};
use crate::error::AppError;
use crate::message::{ChatMessage, MessageKind, ServerMessage};
use crate::presence::PresenceRegistry;
use crate::store::MessageStore;
use crate::typing::{TypingDebouncer, TypingExpired};
use crate::types::{ConnectionId, RoomId};

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New client connected
    ///
    /// `shutdown` fires when the server is done with the connection; the
    /// handler then closes the transport.
    Connect {
        connection_id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
        shutdown: oneshot::Sender<()>,
    },
    /// Transport closed
    Disconnect { connection_id: ConnectionId },
    /// Join a room under a username
    JoinRoom {
        connection_id: ConnectionId,
        username: String,
        room: String,
    },
    /// Send a chat message to the current room
    SendMessage {
        connection_id: ConnectionId,
        content: String,
        kind: MessageKind,
        filename: Option<String>,
    },
    /// Client started (or keeps) typing
    Typing { connection_id: ConnectionId },
    /// Client stopped typing
    StopTyping { connection_id: ConnectionId },
    /// Leave the current room (ends the connection)
    LeaveRoom { connection_id: ConnectionId },
    /// Client frame could not be parsed
    Malformed {
        connection_id: ConnectionId,
        reason: String,
    },
    /// Presence list of a room, in join order
    ListUsers {
        room: RoomId,
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Connection and room counts
    Stats { reply: oneshot::Sender<ServerStats> },
}

/// Snapshot of engine counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    pub connections: usize,
    pub rooms: usize,
}

/// History fetched for a joining connection
#[derive(Debug)]
struct HistoryLoaded {
    connection_id: ConnectionId,
    room: RoomId,
    history: Vec<ChatMessage>,
}

/// Why a connection is leaving its room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    /// Explicit leaveRoom
    Left,
    /// Transport closed or connection evicted
    Disconnected,
}

impl Departure {
    fn notice(self, username: &str) -> String {
        match self {
            Departure::Left => format!("{} has left the room", username),
            Departure::Disconnected => format!("{} has disconnected", username),
        }
    }
}

/// The main ChatServer actor
///
/// Manages all state and processes commands from connection handlers.
pub struct ChatServer {
    config: ServerConfig,
    /// All live connections: ConnectionId -> Connection
    connections: HashMap<ConnectionId, Connection>,
    presence: PresenceRegistry,
    typing: TypingDebouncer,
    broadcaster: RoomBroadcaster,
    store: Arc<dyn MessageStore>,
    /// Last issued message timestamp
    last_timestamp: DateTime<Utc>,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
    typing_rx: mpsc::UnboundedReceiver<TypingExpired>,
    history_tx: mpsc::UnboundedSender<HistoryLoaded>,
    history_rx: mpsc::UnboundedReceiver<HistoryLoaded>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(
        receiver: mpsc::Receiver<ServerCommand>,
        store: Arc<dyn MessageStore>,
        config: ServerConfig,
    ) -> Self {
        let (typing_tx, typing_rx) = mpsc::unbounded_channel();
        let (history_tx, history_rx) = mpsc::unbounded_channel();

        Self {
            presence: PresenceRegistry::new(config.uniqueness),
            typing: TypingDebouncer::new(config.typing_timeout, typing_tx),
            broadcaster: RoomBroadcaster::new(config.send_timeout),
            config,
            connections: HashMap::new(),
            store,
            last_timestamp: Utc::now(),
            receiver,
            typing_rx,
            history_tx,
            history_rx,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(expired) = self.typing_rx.recv() => {
                    self.handle_typing_expired(expired).await;
                }
                Some(loaded) = self.history_rx.recv() => {
                    self.handle_history_loaded(loaded).await;
                }
            }
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect {
                connection_id,
                sender,
                shutdown,
            } => {
                self.handle_connect(connection_id, sender, shutdown);
            }
            ServerCommand::Disconnect { connection_id } => {
                self.handle_disconnect(connection_id).await;
            }
            ServerCommand::JoinRoom {
                connection_id,
                username,
                room,
            } => {
                self.handle_join_room(connection_id, username, room).await;
            }
            ServerCommand::SendMessage {
                connection_id,
                content,
                kind,
                filename,
            } => {
                self.handle_send_message(connection_id, content, kind, filename)
                    .await;
            }
            ServerCommand::Typing { connection_id } => {
                self.handle_typing(connection_id).await;
            }
            ServerCommand::StopTyping { connection_id } => {
                self.handle_stop_typing(connection_id).await;
            }
            ServerCommand::LeaveRoom { connection_id } => {
                self.handle_leave_room(connection_id).await;
            }
            ServerCommand::Malformed {
                connection_id,
                reason,
            } => {
                self.notify(connection_id, AppError::InvalidMessage(reason).into())
                    .await;
            }
            ServerCommand::ListUsers { room, reply } => {
                let _ = reply.send(self.presence.list_usernames(&room));
            }
            ServerCommand::Stats { reply } => {
                let _ = reply.send(ServerStats {
                    connections: self.connections.len(),
                    rooms: self.presence.room_count(),
                });
            }
        }
    }

    /// Handle new client connection
    fn handle_connect(
        &mut self,
        connection_id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
        shutdown: oneshot::Sender<()>,
    ) {
        info!("Connection {} opened", connection_id);
        self.connections
            .insert(connection_id, Connection::new(sender, shutdown));
        debug!(
            "Total connections: {}, Total rooms: {}",
            self.connections.len(),
            self.presence.room_count()
        );
    }

    /// Handle transport disconnection
    async fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        if !self.connections.contains_key(&connection_id) {
            debug!("Connection {} already cleaned up", connection_id);
            return;
        }
        info!("Connection {} disconnected", connection_id);

        let failed = self.teardown(connection_id, Departure::Disconnected).await;
        self.evict(failed).await;
    }

    /// Handle a join request: validate, reserve the username, fetch history
    async fn handle_join_room(
        &mut self,
        connection_id: ConnectionId,
        username: String,
        room: String,
    ) {
        let Some(connection) = self.connections.get(&connection_id) else {
            return;
        };

        if connection.is_in_room() {
            self.notify(connection_id, AppError::AlreadyInRoom.into())
                .await;
            return;
        }

        let username = username.trim().to_string();
        let room = RoomId::new(room);

        let registered = validate_join(&username, &room)
            .and_then(|_| self.presence.register(&room, &username, connection_id));
        if let Err(e) = registered {
            info!(
                "Connection {} join to '{}' as '{}' rejected: {}",
                connection_id, room, username, e
            );
            self.reject_join(connection_id, e).await;
            return;
        }

        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.begin_join(username);
        }

        self.load_history(connection_id, room);
    }

    /// Report a rejected join and apply the rejection policy
    async fn reject_join(&mut self, connection_id: ConnectionId, err: AppError) {
        let delivered = self.notify(connection_id, err.into()).await;

        if delivered && self.config.join_rejection == JoinRejection::Disconnect {
            // Not in a room yet, so this only drops the record
            let failed = self.teardown(connection_id, Departure::Disconnected).await;
            self.evict(failed).await;
        }
    }

    /// Fetch room history off the actor; the result comes back as an event
    fn load_history(&self, connection_id: ConnectionId, room: RoomId) {
        let store = Arc::clone(&self.store);
        let history_tx = self.history_tx.clone();
        let limit = self.config.history_limit;

        tokio::spawn(async move {
            let history = match store.find_by_room(&room).await {
                Ok(mut messages) => {
                    if let Some(limit) = limit {
                        let skip = messages.len().saturating_sub(limit);
                        messages.drain(..skip);
                    }
                    messages
                }
                Err(e) => {
                    warn!("Failed to load history for room {}: {}", room, e);
                    Vec::new()
                }
            };

            let _ = history_tx.send(HistoryLoaded {
                connection_id,
                room,
                history,
            });
        });
    }

    /// Complete a join once its history is available
    async fn handle_history_loaded(&mut self, loaded: HistoryLoaded) {
        let HistoryLoaded {
            connection_id,
            room,
            history,
        } = loaded;

        // The connection may have gone away while the store was busy
        let Some(connection) = self.connections.get(&connection_id) else {
            debug!("Dropping history for closed connection {}", connection_id);
            return;
        };
        if connection.state != ConnectionState::Joining
            || self.presence.room_of(connection_id) != Some(&room)
        {
            return;
        }
        let Some(username) = connection.username.clone() else {
            return;
        };
        let sender = connection.sender.clone();

        let joined = ServerMessage::JoinSuccess {
            room: room.clone(),
            username: username.clone(),
        };
        if !self.notify(connection_id, joined).await {
            return;
        }
        let history = ServerMessage::MessageHistory { messages: history };
        if !self.notify(connection_id, history).await {
            return;
        }

        self.broadcaster.subscribe(room.clone(), connection_id, sender);
        self.presence.activate(connection_id);
        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.activate();
        }
        info!(
            "Connection {} joined room {} as '{}'",
            connection_id, room, username
        );

        let notice = self.system_message(&room, format!("{} has joined the room", username));
        self.persist(notice.clone());
        self.fan_out(&room, ServerMessage::Message(notice), None)
            .await;
        let users = self.user_list(&room);
        self.fan_out(&room, users, None).await;
    }

    /// Handle chat message
    async fn handle_send_message(
        &mut self,
        connection_id: ConnectionId,
        content: String,
        kind: MessageKind,
        filename: Option<String>,
    ) {
        if !self.connections.contains_key(&connection_id) {
            return;
        }

        let Some((room, username)) = self.membership(connection_id) else {
            self.notify(connection_id, AppError::NotInRoom.into()).await;
            return;
        };

        if let Err(e) = self.validate_content(&content, kind) {
            self.notify(connection_id, e.into()).await;
            return;
        }

        let message = ChatMessage {
            sender_id: username.clone(),
            room: room.clone(),
            content,
            kind,
            filename: filename.filter(|_| matches!(kind, MessageKind::Image | MessageKind::File)),
            timestamp: self.next_timestamp(),
        };
        self.persist(message.clone());

        // A sent message ends the typing indicator right away
        if self.typing.clear_typing(&room, &username) {
            self.fan_out(
                &room,
                ServerMessage::StopTyping { username },
                Some(connection_id),
            )
            .await;
        }

        self.fan_out(&room, ServerMessage::Message(message), None)
            .await;
    }

    /// Handle typing indicator start or renewal
    async fn handle_typing(&mut self, connection_id: ConnectionId) {
        let Some((room, username)) = self.membership(connection_id) else {
            return;
        };

        if self.typing.mark_typing(&room, &username) {
            self.fan_out(
                &room,
                ServerMessage::Typing { username },
                Some(connection_id),
            )
            .await;
        }
    }

    /// Handle typing indicator stop
    async fn handle_stop_typing(&mut self, connection_id: ConnectionId) {
        let Some((room, username)) = self.membership(connection_id) else {
            return;
        };

        if self.typing.clear_typing(&room, &username) {
            self.fan_out(
                &room,
                ServerMessage::StopTyping { username },
                Some(connection_id),
            )
            .await;
        }
    }

    /// Handle a debounce timer firing
    async fn handle_typing_expired(&mut self, expired: TypingExpired) {
        let Some(key) = self.typing.expire(expired) else {
            return;
        };

        debug!("Typing of '{}' in room {} expired", key.username, key.room);
        let except = self.presence.connection_of(&key.room, &key.username);
        self.fan_out(
            &key.room,
            ServerMessage::StopTyping {
                username: key.username.clone(),
            },
            except,
        )
        .await;
    }

    /// Handle voluntary room leaving
    async fn handle_leave_room(&mut self, connection_id: ConnectionId) {
        let Some(connection) = self.connections.get(&connection_id) else {
            return;
        };

        if !connection.is_in_room() {
            self.notify(connection_id, AppError::NotInRoom.into()).await;
            return;
        }

        info!("Connection {} left its room", connection_id);
        let failed = self.teardown(connection_id, Departure::Left).await;
        self.evict(failed).await;
    }

    /// Remove a connection and clean up everything it held
    ///
    /// Runs at most once per connection: later calls find no record and do
    /// nothing. Only an `Active` connection produces departure broadcasts.
    /// Returns the connections that failed to receive those broadcasts.
    async fn teardown(
        &mut self,
        connection_id: ConnectionId,
        departure: Departure,
    ) -> Vec<ConnectionId> {
        let Some(mut connection) = self.connections.remove(&connection_id) else {
            return Vec::new();
        };
        let previous = connection.close();
        let mut failed = Vec::new();

        if let Some((room, username)) = self.presence.unregister(connection_id) {
            self.broadcaster.unsubscribe(&room, connection_id);
            let was_typing = self.typing.clear_typing(&room, &username);

            if previous == ConnectionState::Active {
                if was_typing {
                    let stop = ServerMessage::StopTyping {
                        username: username.clone(),
                    };
                    failed.extend(self.broadcaster.publish(&room, &stop, None).await);
                }

                let notice = self.system_message(&room, departure.notice(&username));
                self.persist(notice.clone());
                failed.extend(
                    self.broadcaster
                        .publish(&room, &ServerMessage::Message(notice), None)
                        .await,
                );
                let users = self.user_list(&room);
                failed.extend(self.broadcaster.publish(&room, &users, None).await);
            }

            if departure == Departure::Left {
                let left = ServerMessage::LeftRoom { room };
                if let Err(e) = connection.deliver(left, self.config.send_timeout).await {
                    warn!("Delivery of leftRoom to {} failed: {}", connection_id, e);
                }
            }
        }

        connection.shut_down();
        debug!(
            "Connection {} closed after {:?}",
            connection_id,
            connection.connected_at.elapsed()
        );
        debug!(
            "Total connections: {}, Total rooms: {}",
            self.connections.len(),
            self.presence.room_count()
        );
        failed
    }

    /// Disconnect connections that could not keep up, and any that fail
    /// while their departures are broadcast
    async fn evict(&mut self, mut pending: Vec<ConnectionId>) {
        while let Some(connection_id) = pending.pop() {
            if !self.connections.contains_key(&connection_id) {
                continue;
            }
            warn!("Evicting connection {}: delivery failed", connection_id);
            let failed = self.teardown(connection_id, Departure::Disconnected).await;
            pending.extend(failed);
        }
    }

    /// Broadcast to a room and evict whoever could not receive it
    async fn fan_out(&mut self, room: &RoomId, msg: ServerMessage, except: Option<ConnectionId>) {
        let failed = self.broadcaster.publish(room, &msg, except).await;
        self.evict(failed).await;
    }

    /// Send a private message to one connection
    ///
    /// Returns false (and evicts the connection) if delivery failed.
    async fn notify(&mut self, connection_id: ConnectionId, msg: ServerMessage) -> bool {
        let Some(connection) = self.connections.get(&connection_id) else {
            return false;
        };

        let result = connection.deliver(msg, self.config.send_timeout).await;
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Delivery to {} failed: {}", connection_id, e);
                self.evict(vec![connection_id]).await;
                false
            }
        }
    }

    /// Persist a message without holding up the actor
    ///
    /// Failures are logged and never block or reject the broadcast.
    fn persist(&self, message: ChatMessage) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let room = message.room.clone();
            if let Err(e) = store.insert(message).await {
                error!("Failed to persist message for room {}: {}", room, e);
            }
        });
    }

    /// Room and username of an `Active` connection
    fn membership(&self, connection_id: ConnectionId) -> Option<(RoomId, String)> {
        let connection = self.connections.get(&connection_id)?;
        if !connection.is_active() {
            return None;
        }
        let room = self.presence.room_of(connection_id)?;
        Some((room.clone(), connection.username.clone()?))
    }

    fn user_list(&self, room: &RoomId) -> ServerMessage {
        ServerMessage::UserList {
            users: self.presence.list_usernames(room),
        }
    }

    fn system_message(&mut self, room: &RoomId, content: String) -> ChatMessage {
        ChatMessage::system(room.clone(), content, self.next_timestamp())
    }

    /// Receipt timestamp, never earlier than the previous one
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        if now > self.last_timestamp {
            self.last_timestamp = now;
        }
        self.last_timestamp
    }

    fn validate_content(&self, content: &str, kind: MessageKind) -> Result<(), AppError> {
        if kind == MessageKind::System {
            return Err(AppError::Validation(
                "System messages cannot be sent by clients".to_string(),
            ));
        }
        if content.trim().is_empty() {
            return Err(AppError::Validation("Message content is required".to_string()));
        }
        if content.chars().count() > self.config.max_message_len {
            return Err(AppError::Validation(format!(
                "Message must be at most {} characters long",
                self.config.max_message_len
            )));
        }
        Ok(())
    }
}

/// Check the trimmed username and room name
fn validate_join(username: &str, room: &RoomId) -> Result<(), AppError> {
    if username.chars().count() < MIN_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Username must be at least {} characters long",
            MIN_NAME_LEN
        )));
    }
    if room.as_str().chars().count() < MIN_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Room name must be at least {} characters long",
            MIN_NAME_LEN
        )));
    }
    Ok(())
}
