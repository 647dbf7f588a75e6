use axum::extract::ws::Message;

use super::protocol::ServerEvent;
use super::{ConnectionSender, SocketHub};

/// Encode a server event as a JSON text frame.
pub fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "Failed to encode server event");
            None
        }
    }
}

/// Send an event down a single connection channel.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) -> bool {
    match encode(event) {
        Some(msg) => tx.send(msg).is_ok(),
        None => false,
    }
}

impl SocketHub {
    /// Emit to one socket hosted here. Returns false if the socket is not local
    /// or its writer has gone away.
    pub fn emit_to_socket(&self, socket_id: &str, event: &ServerEvent) -> bool {
        match self.sender(socket_id) {
            Some(tx) => send_event(&tx, event),
            None => false,
        }
    }

    /// Emit to every listed socket. Returns how many accepted the frame.
    pub fn emit_to_sockets<'a, I>(&self, socket_ids: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let Some(msg) = encode(event) else {
            return 0;
        };
        socket_ids
            .into_iter()
            .filter_map(|sid| self.sender(sid))
            .filter(|tx| tx.send(msg.clone()).is_ok())
            .count()
    }

    /// Emit to every socket in a conversation room, optionally skipping one.
    pub fn emit_to_room(&self, room: &str, event: &ServerEvent, except: Option<&str>) -> usize {
        let targets: Vec<String> = self
            .room_sockets(room)
            .into_iter()
            .filter(|sid| Some(sid.as_str()) != except)
            .collect();
        self.emit_to_sockets(&targets, event)
    }
}
