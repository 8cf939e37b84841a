//! Multi-room WebSocket Chat Server Library
//!
//! A WebSocket chat backend built with tokio-tungstenite: clients join
//! named rooms, exchange text/image/file messages, and see who else is
//! online and who is typing.
//!
//! # Features
//! - Implicit rooms, created on first join and dropped with the last member
//! - Per-room username uniqueness (or global, by configuration)
//! - Room history replay on join through a pluggable `MessageStore`
//! - Presence lists broadcast on every join and departure
//! - Debounced typing indicators that expire on their own
//! - Bounded per-connection sends; slow clients are evicted
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning connections, presence,
//!   typing timers and room subscriptions
//! - Each connection has a `handler` task communicating with the server
//! - No locks needed - all state access goes through message passing
//! - Store I/O runs in spawned tasks so it never stalls the actor
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use chat_rooms::{handle_connection, ChatServer, InMemoryMessageStore, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let listener = TcpListener::bind(&config.bind_addr).await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
//!     let buffer = config.connection_buffer;
//!
//!     let store = Arc::new(InMemoryMessageStore::new());
//!     tokio::spawn(ChatServer::new(cmd_rx, store, config).run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let cmd_tx = cmd_tx.clone();
//!         tokio::spawn(handle_connection(stream, cmd_tx, buffer));
//!     }
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod message;
pub mod presence;
pub mod server;
pub mod store;
pub mod types;
pub mod typing;

// Re-export main types for convenience
pub use broadcast::RoomBroadcaster;
pub use config::{JoinRejection, ServerConfig, UniquenessScope};
pub use connection::{Connection, ConnectionState};
pub use error::{AppError, SendError, StoreError};
pub use handler::handle_connection;
pub use message::{ChatMessage, ClientMessage, ErrorCode, MessageKind, ServerMessage};
pub use presence::PresenceRegistry;
pub use server::{ChatServer, ServerCommand, ServerStats};
pub use store::{InMemoryMessageStore, MessageStore};
pub use types::{ConnectionId, RoomId};
pub use typing::TypingDebouncer;
