use chrono::{DateTime, Utc};

/// Identity of one authenticated socket. Fixed for the life of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub socket_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, username: Option<String>) -> Self {
        Self {
            socket_id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            username,
            connected_at: Utc::now(),
        }
    }
}

/// Connection lifecycle: Unauthenticated -> Authenticated -> Closed.
/// An unauthenticated socket goes straight to Closed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unauthenticated,
    Authenticated(Session),
    Closed,
}

impl ConnectionState {
    /// Returns false if the connection was already authenticated or closed.
    pub fn authenticate(&mut self, session: Session) -> bool {
        match self {
            ConnectionState::Unauthenticated => {
                *self = ConnectionState::Authenticated(session);
                true
            }
            _ => false,
        }
    }

    /// Move to Closed. Yields the session only on the first close of an
    /// authenticated connection, so cleanup runs once.
    pub fn close(&mut self) -> Option<Session> {
        match std::mem::replace(self, ConnectionState::Closed) {
            ConnectionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            ConnectionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}
