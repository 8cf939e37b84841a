//! Presence registry
//!
//! Tracks which (username, connection) pairs hold a name in which room.
//! Rooms are implicit: an entry list is created by the first registration
//! and dropped with the last one. A fresh entry only reserves its name; it
//! shows up in presence lists once activated.

use std::collections::HashMap;

use crate::config::UniquenessScope;
use crate::error::AppError;
use crate::types::{ConnectionId, RoomId};

/// One member of a room
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub username: String,
    pub connection_id: ConnectionId,
    /// False while the join is still in flight
    pub active: bool,
}

/// Room → members mapping
///
/// Each room's entries are kept in join order. A connection appears in at
/// most one room.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    rooms: HashMap<RoomId, Vec<PresenceEntry>>,
    /// Connection to room mapping for fast lookup
    connection_rooms: HashMap<ConnectionId, RoomId>,
    scope: UniquenessScope,
}

impl PresenceRegistry {
    pub fn new(scope: UniquenessScope) -> Self {
        Self {
            rooms: HashMap::new(),
            connection_rooms: HashMap::new(),
            scope,
        }
    }

    /// Reserve a username in a room for a connection
    ///
    /// Fails with `DuplicateUsername` if the name is already held (exact,
    /// case-sensitive match) within the uniqueness scope, and with
    /// `AlreadyInRoom` if the connection is registered anywhere. Reserved
    /// names count for uniqueness but are not listed until `activate`.
    pub fn register(
        &mut self,
        room: &RoomId,
        username: &str,
        connection_id: ConnectionId,
    ) -> Result<(), AppError> {
        if self.connection_rooms.contains_key(&connection_id) {
            return Err(AppError::AlreadyInRoom);
        }
        if self.is_taken(room, username) {
            return Err(AppError::DuplicateUsername);
        }

        self.rooms
            .entry(room.clone())
            .or_default()
            .push(PresenceEntry {
                username: username.to_string(),
                connection_id,
                active: false,
            });
        self.connection_rooms.insert(connection_id, room.clone());
        Ok(())
    }

    /// Make a reserved entry visible in presence lists
    ///
    /// Returns false for unknown connections.
    pub fn activate(&mut self, connection_id: ConnectionId) -> bool {
        let Some(room) = self.connection_rooms.get(&connection_id) else {
            return false;
        };
        match self
            .rooms
            .get_mut(room)
            .and_then(|entries| entries.iter_mut().find(|e| e.connection_id == connection_id))
        {
            Some(entry) => {
                entry.active = true;
                true
            }
            None => false,
        }
    }

    /// Remove a connection, returning the (room, username) it held
    ///
    /// Unknown connections are a no-op.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<(RoomId, String)> {
        let room = self.connection_rooms.remove(&connection_id)?;
        let entries = self.rooms.get_mut(&room)?;
        let index = entries
            .iter()
            .position(|e| e.connection_id == connection_id)?;
        let entry = entries.remove(index);

        if entries.is_empty() {
            self.rooms.remove(&room);
        }

        Some((room, entry.username))
    }

    /// Usernames of a room's active members in join order
    pub fn list_usernames(&self, room: &RoomId) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.active)
                    .map(|e| e.username.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn room_of(&self, connection_id: ConnectionId) -> Option<&RoomId> {
        self.connection_rooms.get(&connection_id)
    }

    /// Connection currently holding `username` in `room`
    pub fn connection_of(&self, room: &RoomId, username: &str) -> Option<ConnectionId> {
        self.rooms
            .get(room)?
            .iter()
            .find(|e| e.username == username)
            .map(|e| e.connection_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn is_taken(&self, room: &RoomId, username: &str) -> bool {
        match self.scope {
            UniquenessScope::Room => self.connection_of(room, username).is_some(),
            UniquenessScope::Global => self
                .rooms
                .values()
                .flatten()
                .any(|e| e.username == username),
        }
    }
}
