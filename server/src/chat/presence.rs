//! Online/offline tracking on top of the socket registry.
//!
//! A user is online while they hold at least one socket anywhere. Transitions
//! are detected from the registry's atomic add/remove results and fanned out
//! to every local connection through a broadcast channel.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::RegistryError;
use crate::registry::{ConnectionChange, PresenceStatus, SocketRegistry};

/// Capacity of the presence fan-out channel. Slow receivers skip ahead.
const PRESENCE_CHANNEL_CAPACITY: usize = 1024;

/// Body of a `presence_update` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: String,
    pub status: PresenceStatus,
}

#[derive(Clone)]
pub struct PresenceTracker {
    registry: Arc<dyn SocketRegistry>,
    events: broadcast::Sender<PresenceUpdate>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<dyn SocketRegistry>) -> Self {
        let (events, _) = broadcast::channel(PRESENCE_CHANNEL_CAPACITY);
        Self { registry, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceUpdate> {
        self.events.subscribe()
    }

    /// Record a new socket. Publishes `online` only on the user's 0 -> 1 edge.
    pub async fn connected(
        &self,
        user_id: &str,
        socket_id: &str,
    ) -> Result<Option<PresenceUpdate>, RegistryError> {
        let change = self.registry.add_connection(user_id, socket_id).await?;
        tracing::debug!(
            user_id = %user_id,
            socket_id = %socket_id,
            sockets = change.remaining,
            "Socket registered"
        );
        if !change.went_online() {
            return Ok(None);
        }
        Ok(Some(self.transition(&change, PresenceStatus::Online).await))
    }

    /// Drop a socket. Publishes `offline` only on the 1 -> 0 edge; repeated
    /// calls for the same socket are no-ops.
    pub async fn disconnected(
        &self,
        socket_id: &str,
    ) -> Result<Option<PresenceUpdate>, RegistryError> {
        let Some(change) = self.registry.remove_connection(socket_id).await? else {
            return Ok(None);
        };
        tracing::debug!(
            user_id = %change.user_id,
            socket_id = %socket_id,
            sockets = change.remaining,
            "Socket unregistered"
        );
        if !change.went_offline() {
            return Ok(None);
        }
        Ok(Some(self.transition(&change, PresenceStatus::Offline).await))
    }

    async fn transition(&self, change: &ConnectionChange, status: PresenceStatus) -> PresenceUpdate {
        // The edge already happened in the registry; a failed presence write
        // must not swallow the broadcast.
        if let Err(e) = self.registry.set_presence(&change.user_id, status).await {
            tracing::warn!(
                user_id = %change.user_id,
                status = status.as_str(),
                error = %e,
                "Failed to store presence"
            );
        }

        let update = PresenceUpdate {
            user_id: change.user_id.clone(),
            status,
        };
        tracing::info!(user_id = %update.user_id, status = status.as_str(), "Presence changed");
        // No receivers just means no local connections are listening.
        let _ = self.events.send(update.clone());
        update
    }
}
