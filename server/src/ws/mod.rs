pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod session;

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Sockets hosted by this process, plus their conversation room subscriptions.
///
/// The cross-process question "which sockets does user X have" is answered by
/// the registry; the hub only knows how to reach the sockets it owns.
#[derive(Clone, Default)]
pub struct SocketHub {
    /// socket_id -> writer channel
    sockets: Arc<DashMap<String, ConnectionSender>>,
    /// room (conversation_id) -> socket ids
    rooms: Arc<DashMap<String, HashSet<String>>>,
    /// socket_id -> rooms it joined, for cleanup on disconnect
    memberships: Arc<DashMap<String, HashSet<String>>>,
}

impl SocketHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a socket reachable from this process.
    pub fn attach(&self, socket_id: &str, tx: ConnectionSender) {
        self.sockets.insert(socket_id.to_string(), tx);
        tracing::debug!(socket_id = %socket_id, sockets = self.sockets.len(), "Socket attached");
    }

    /// Forget a socket and drop it from every room it joined.
    pub fn detach(&self, socket_id: &str) {
        self.sockets.remove(socket_id);
        if let Some((_, rooms)) = self.memberships.remove(socket_id) {
            for room in rooms {
                self.remove_from_room(&room, socket_id);
            }
        }
        tracing::debug!(socket_id = %socket_id, "Socket detached");
    }

    pub fn join(&self, room: &str, socket_id: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(socket_id.to_string());
        self.memberships
            .entry(socket_id.to_string())
            .or_default()
            .insert(room.to_string());
    }

    pub fn leave(&self, room: &str, socket_id: &str) {
        self.remove_from_room(room, socket_id);
        if let Some(mut rooms) = self.memberships.get_mut(socket_id) {
            rooms.remove(room);
        }
    }

    pub fn is_attached(&self, socket_id: &str) -> bool {
        self.sockets.contains_key(socket_id)
    }

    pub fn room_sockets(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|entry| entry.value().iter().cloned().collect())
            .unwrap_or_default()
    }

    fn remove_from_room(&self, room: &str, socket_id: &str) {
        if let Some(mut sockets) = self.rooms.get_mut(room) {
            sockets.remove(socket_id);
        }
        self.rooms.remove_if(room, |_, sockets| sockets.is_empty());
    }

    pub(crate) fn sender(&self, socket_id: &str) -> Option<ConnectionSender> {
        self.sockets.get(socket_id).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_leave_rooms() {
        let hub = SocketHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.attach("s1", tx);

        hub.join("c1", "s1");
        hub.join("c2", "s1");
        assert_eq!(hub.room_sockets("c1"), vec!["s1".to_string()]);

        hub.leave("c1", "s1");
        assert!(hub.room_sockets("c1").is_empty());
        assert_eq!(hub.room_sockets("c2"), vec!["s1".to_string()]);
    }

    #[test]
    fn test_detach_leaves_all_rooms() {
        let hub = SocketHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.attach("s1", tx);
        hub.join("c1", "s1");
        hub.join("c2", "s1");

        hub.detach("s1");
        assert!(!hub.is_attached("s1"));
        assert!(hub.room_sockets("c1").is_empty());
        assert!(hub.room_sockets("c2").is_empty());
        // second detach is harmless
        hub.detach("s1");
    }
}
