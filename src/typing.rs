//! Typing debouncer
//!
//! Keeps per (room, username) "is typing" entries, each backed by one
//! expiry timer task. Expiries are reported back to the session engine
//! over a channel; the engine decides what to broadcast.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::types::RoomId;

/// Identifies one typing indicator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypingKey {
    pub room: RoomId,
    pub username: String,
}

impl TypingKey {
    pub fn new(room: &RoomId, username: &str) -> Self {
        Self {
            room: room.clone(),
            username: username.to_string(),
        }
    }
}

/// Timer fired for a typing entry
///
/// The generation ties the event to the timer that produced it, so an
/// expiry that was already queued when the entry got renewed or cleared
/// is recognised as stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingExpired {
    pub key: TypingKey,
    pub generation: u64,
}

#[derive(Debug)]
struct TypingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Debounced typing state
#[derive(Debug)]
pub struct TypingDebouncer {
    timeout: Duration,
    timers: HashMap<TypingKey, TypingTimer>,
    next_generation: u64,
    expired_tx: mpsc::UnboundedSender<TypingExpired>,
}

impl TypingDebouncer {
    pub fn new(timeout: Duration, expired_tx: mpsc::UnboundedSender<TypingExpired>) -> Self {
        Self {
            timeout,
            timers: HashMap::new(),
            next_generation: 0,
            expired_tx,
        }
    }

    /// (Re)start the expiry timer for a user
    ///
    /// Returns true if the user was not typing before, i.e. a
    /// typing-started event should be emitted.
    pub fn mark_typing(&mut self, room: &RoomId, username: &str) -> bool {
        let key = TypingKey::new(room, username);
        let started = match self.timers.remove(&key) {
            Some(previous) => {
                previous.handle.abort();
                false
            }
            None => true,
        };

        let generation = self.next_generation;
        self.next_generation += 1;

        let handle = tokio::spawn(expire_at(
            Instant::now() + self.timeout,
            TypingExpired {
                key: key.clone(),
                generation,
            },
            self.expired_tx.clone(),
        ));
        self.timers.insert(key, TypingTimer { generation, handle });

        started
    }

    /// Cancel a user's timer
    ///
    /// Returns true if an entry existed, i.e. a typing-stopped event should
    /// be emitted. Clearing an absent entry is a no-op.
    pub fn clear_typing(&mut self, room: &RoomId, username: &str) -> bool {
        match self.timers.remove(&TypingKey::new(room, username)) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Apply a timer expiry
    ///
    /// Returns the cleared key if the expiry is current; stale expiries
    /// (entry renewed or already cleared) return None.
    pub fn expire(&mut self, expired: TypingExpired) -> Option<TypingKey> {
        match self.timers.get(&expired.key) {
            Some(timer) if timer.generation == expired.generation => {
                self.timers.remove(&expired.key);
                Some(expired.key)
            }
            _ => None,
        }
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.handle.abort();
        }
    }
}

async fn expire_at(
    deadline: Instant,
    expired: TypingExpired,
    tx: mpsc::UnboundedSender<TypingExpired>,
) {
    tokio::time::sleep_until(deadline).await;
    // Receiver gone means the engine shut down
    let _ = tx.send(expired);
}
