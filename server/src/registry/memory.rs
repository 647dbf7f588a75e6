use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{now_millis, ConnectionChange, PresenceRecord, PresenceStatus, SocketRegistry};
use crate::error::RegistryError;

/// In-process registry for single-node deployments and tests.
///
/// Uses DashMap entry locks for per-user atomicity, the same way the rest of
/// the server keeps its concurrent maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    /// user_id -> socket ids
    user_sockets: Arc<DashMap<String, HashSet<String>>>,
    /// socket_id -> user_id
    socket_owner: Arc<DashMap<String, String>>,
    presence: Arc<DashMap<String, PresenceRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SocketRegistry for MemoryRegistry {
    async fn add_connection(
        &self,
        user_id: &str,
        socket_id: &str,
    ) -> Result<ConnectionChange, RegistryError> {
        let (changed, remaining) = {
            let mut sockets = self.user_sockets.entry(user_id.to_string()).or_default();
            let changed = sockets.insert(socket_id.to_string());
            (changed, sockets.len())
        };
        self.socket_owner
            .insert(socket_id.to_string(), user_id.to_string());

        Ok(ConnectionChange {
            user_id: user_id.to_string(),
            changed,
            remaining,
        })
    }

    async fn remove_connection(
        &self,
        socket_id: &str,
    ) -> Result<Option<ConnectionChange>, RegistryError> {
        // Removing the reverse entry first makes duplicate disconnects race-free:
        // only one caller gets the owner back.
        let Some((_, user_id)) = self.socket_owner.remove(socket_id) else {
            return Ok(None);
        };

        let (changed, remaining) = match self.user_sockets.get_mut(&user_id) {
            Some(mut sockets) => {
                let changed = sockets.remove(socket_id);
                (changed, sockets.len())
            }
            None => (false, 0),
        };
        // An add may have landed in between; only drop the entry if still empty.
        self.user_sockets.remove_if(&user_id, |_, sockets| sockets.is_empty());

        Ok(Some(ConnectionChange {
            user_id,
            changed,
            remaining,
        }))
    }

    async fn get_sockets(&self, user_id: &str) -> Result<HashSet<String>, RegistryError> {
        Ok(self
            .user_sockets
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn get_owner(&self, socket_id: &str) -> Result<Option<String>, RegistryError> {
        Ok(self
            .socket_owner
            .get(socket_id)
            .map(|entry| entry.value().clone()))
    }

    async fn set_presence(
        &self,
        user_id: &str,
        status: PresenceStatus,
    ) -> Result<(), RegistryError> {
        self.presence.insert(
            user_id.to_string(),
            PresenceRecord {
                status,
                last_updated: now_millis(),
            },
        );
        Ok(())
    }

    async fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRecord>, RegistryError> {
        Ok(self.presence.get(user_id).map(|entry| entry.value().clone()))
    }
}
