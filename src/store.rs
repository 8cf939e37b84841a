//! Message store collaborator
//!
//! The session engine hands every chat message to a `MessageStore` and
//! replays a room's stored messages to each joiner. Durable backends plug
//! in behind the trait; `InMemoryMessageStore` is the built-in default.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::message::ChatMessage;
use crate::types::RoomId;

/// Append-only, room-scoped message log
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message
    async fn insert(&self, message: ChatMessage) -> Result<(), StoreError>;

    /// All messages of a room, ordered by timestamp
    async fn find_by_room(&self, room: &RoomId) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Process-local message log
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    rooms: RwLock<HashMap<RoomId, Vec<ChatMessage>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: ChatMessage) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().await;
        let log = rooms.entry(message.room.clone()).or_default();

        // Inserts may land out of order; keep the log sorted, equal stamps
        // in arrival order
        let index = log.partition_point(|m| m.timestamp <= message.timestamp);
        log.insert(index, message);
        Ok(())
    }

    async fn find_by_room(&self, room: &RoomId) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(room)
            .cloned()
            .unwrap_or_default())
    }
}
