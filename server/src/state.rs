use std::sync::Arc;
use std::time::Duration;

use crate::chat::presence::PresenceTracker;
use crate::chat::store::MessageStore;
use crate::notify::{PushQueue, DEFAULT_PREVIEW_LENGTH};
use crate::registry::SocketRegistry;
use crate::ws::actor::{PING_INTERVAL, PONG_TIMEOUT};
use crate::ws::SocketHub;

/// Tunables that flow from config into handlers.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Characters of message text copied into push previews
    pub preview_length: usize,
    /// Handshake rate limit: seconds per replenished token, per IP
    pub handshake_per_second: u64,
    /// Handshake burst size per IP
    pub handshake_burst: u32,
    /// Time between server pings on each connection
    pub ping_interval: Duration,
    /// A connection that misses its pong within this window is dropped
    pub pong_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            preview_length: DEFAULT_PREVIEW_LENGTH,
            handshake_per_second: 1,
            handshake_burst: 20,
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// JWT verification secret (HS256)
    pub jwt_secret: Vec<u8>,
    /// Cross-process user <-> socket index and presence records
    pub registry: Arc<dyn SocketRegistry>,
    /// Durable messages, receipts and membership
    pub store: Arc<dyn MessageStore>,
    /// Push notification queue for offline recipients
    pub push_queue: Arc<dyn PushQueue>,
    /// Sockets hosted by this process and their rooms
    pub hub: SocketHub,
    /// Presence transitions and their fan-out channel
    pub presence: PresenceTracker,
    pub settings: GatewaySettings,
}

impl AppState {
    pub fn new(
        jwt_secret: Vec<u8>,
        registry: Arc<dyn SocketRegistry>,
        store: Arc<dyn MessageStore>,
        push_queue: Arc<dyn PushQueue>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            jwt_secret,
            presence: PresenceTracker::new(registry.clone()),
            registry,
            store,
            push_queue,
            hub: SocketHub::new(),
            settings,
        }
    }
}
