//! Socket registry: the cross-process view of which sockets belong to which user.
//!
//! Two indexes are maintained side by side, `user -> set of sockets` and
//! `socket -> user`, plus a presence record per user. Every implementation
//! builds its keys through [`keys`] so the add and remove paths can never
//! disagree on a namespace.

pub mod memory;
pub mod redis_registry;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

pub use memory::MemoryRegistry;
pub use redis_registry::RedisRegistry;

/// Key builders shared by every registry path.
pub mod keys {
    pub fn user_sockets(user_id: &str) -> String {
        format!("user_sockets:{}", user_id)
    }

    pub fn socket_user(socket_id: &str) -> String {
        format!("socket_user:{}", socket_id)
    }

    pub fn presence(user_id: &str) -> String {
        format!("presence:{}", user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Stored presence for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub status: PresenceStatus,
    /// Unix millis of the last transition.
    pub last_updated: i64,
}

/// Outcome of an add or remove, observed atomically with the mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChange {
    pub user_id: String,
    /// Whether the socket set actually changed (false for a repeated add).
    pub changed: bool,
    /// Size of the user's socket set right after the mutation.
    pub remaining: usize,
}

impl ConnectionChange {
    /// 0 -> 1 edge.
    pub fn went_online(&self) -> bool {
        self.changed && self.remaining == 1
    }

    /// 1 -> 0 edge.
    pub fn went_offline(&self) -> bool {
        self.changed && self.remaining == 0
    }
}

#[async_trait]
pub trait SocketRegistry: Send + Sync {
    /// Associate `socket_id` with `user_id`. Safe to repeat.
    async fn add_connection(
        &self,
        user_id: &str,
        socket_id: &str,
    ) -> Result<ConnectionChange, RegistryError>;

    /// Drop `socket_id` from its owner's set. `None` when the socket is unknown,
    /// which includes a second call for the same socket.
    async fn remove_connection(
        &self,
        socket_id: &str,
    ) -> Result<Option<ConnectionChange>, RegistryError>;

    async fn get_sockets(&self, user_id: &str) -> Result<HashSet<String>, RegistryError>;

    async fn get_owner(&self, socket_id: &str) -> Result<Option<String>, RegistryError>;

    async fn set_presence(
        &self,
        user_id: &str,
        status: PresenceStatus,
    ) -> Result<(), RegistryError>;

    async fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRecord>, RegistryError>;
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
