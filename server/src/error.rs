//! Error types for the gateway's collaborator boundaries.
//!
//! Each collaborator (registry, message store, push queue) surfaces its own
//! error enum. The call sites in the delivery engine and the signaling relay
//! decide whether a failure aborts the operation or degrades it; those
//! decisions live next to the calls, not here.

use thiserror::Error;

/// Failure talking to the shared socket registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Failure in the message store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure writing to the notification queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Handshake credential failures. All of them are fatal to the connection.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingToken,

    #[error("token expired")]
    Expired,

    #[error("token invalid")]
    Invalid,
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid,
        }
    }
}

/// A `send_message` that was rejected before anything was broadcast.
///
/// Both variants carry the client's `tempId` so the rejection can be
/// correlated with the optimistic local message.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid message payload: {reason}")]
    Validation {
        temp_id: Option<String>,
        reason: &'static str,
    },

    #[error("failed to persist message: {source}")]
    Persistence {
        temp_id: Option<String>,
        #[source]
        source: StoreError,
    },
}

impl SendError {
    pub fn temp_id(&self) -> Option<&str> {
        match self {
            SendError::Validation { temp_id, .. } | SendError::Persistence { temp_id, .. } => {
                temp_id.as_deref()
            }
        }
    }

    /// Text shown to the client. Persistence details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            SendError::Validation { reason, .. } => reason.to_string(),
            SendError::Persistence { .. } => "Failed to save message".to_string(),
        }
    }
}
