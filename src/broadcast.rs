//! Room broadcaster
//!
//! Owns the subscriber list of every room and fans events out to it.
//! Subscribers are added and removed only by the session engine on
//! join and departure.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::deliver;
use crate::message::ServerMessage;
use crate::types::{ConnectionId, RoomId};

#[derive(Debug)]
struct Subscriber {
    id: ConnectionId,
    sender: mpsc::Sender<ServerMessage>,
}

/// Per-room fan-out with a bounded per-connection send timeout
#[derive(Debug)]
pub struct RoomBroadcaster {
    /// Subscribers per room, in join order
    rooms: HashMap<RoomId, Vec<Subscriber>>,
    send_timeout: Duration,
}

impl RoomBroadcaster {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            rooms: HashMap::new(),
            send_timeout,
        }
    }

    /// Add a connection at the end of a room's delivery order
    pub fn subscribe(
        &mut self,
        room: RoomId,
        id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    ) {
        self.rooms
            .entry(room)
            .or_default()
            .push(Subscriber { id, sender });
    }

    /// Remove a connection; unknown connections are a no-op
    pub fn unsubscribe(&mut self, room: &RoomId, id: ConnectionId) {
        let Some(subscribers) = self.rooms.get_mut(room) else {
            return;
        };
        subscribers.retain(|s| s.id != id);

        if subscribers.is_empty() {
            self.rooms.remove(room);
        }
    }

    /// Deliver `msg` to every subscriber of `room` except `except`
    ///
    /// Sends run concurrently, so one slow subscriber delays the call by at
    /// most the send timeout and never delays the others. Returns the
    /// connections that could not accept the event; the caller is expected
    /// to disconnect them.
    pub async fn publish(
        &self,
        room: &RoomId,
        msg: &ServerMessage,
        except: Option<ConnectionId>,
    ) -> Vec<ConnectionId> {
        let Some(subscribers) = self.rooms.get(room) else {
            return Vec::new();
        };

        let timeout = self.send_timeout;
        let sends = subscribers
            .iter()
            .filter(|s| Some(s.id) != except)
            .map(|s| async move { (s.id, deliver(&s.sender, msg.clone(), timeout).await) });

        let mut failed = Vec::new();
        for (id, result) in join_all(sends).await {
            if let Err(e) = result {
                warn!("Delivery to {} in room {} failed: {}", id, room, e);
                failed.push(id);
            }
        }

        debug!(
            "Published to room {} ({} subscribers, {} failed)",
            room,
            subscribers.len(),
            failed.len()
        );
        failed
    }
}
