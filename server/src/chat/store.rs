//! Message store collaborator: durable messages, receipt sets, membership lookup.
//!
//! The gateway never writes membership; `conversation_members` is owned by the
//! conversation service and only read here.

use async_trait::async_trait;
use rusqlite::OptionalExtension;

use crate::db::models::{Attachment, Message, MessageStatus, MessageType, NewMessage};
use crate::db::DbPool;
use crate::error::StoreError;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message. Assigns `id` and `created_at`.
    async fn create_message(&self, new: NewMessage) -> Result<Message, StoreError>;

    async fn find_conversation_members(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<String>, StoreError>;

    /// Add `user_id` to the delivered set (no-op if already present).
    async fn append_delivered(&self, message_id: &str, user_id: &str) -> Result<(), StoreError>;

    /// Add `user_id` to the read set (no-op if already present).
    async fn append_read(&self, message_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, StoreError>;
}

/// SQLite-backed store over the shared [`DbPool`].
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Record a membership row. Used when seeding a standalone deployment and in tests.
    pub async fn add_member(&self, conversation_id: &str, user_id: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let conv = conversation_id.to_string();
        let uid = user_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            conn.execute(
                "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![conv, uid],
            )?;
            Ok(())
        })
        .await?
    }

    /// Shared add-if-absent for both receipt tables.
    async fn append_receipt(
        &self,
        table: &'static str,
        message_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let db = self.db.clone();
        let mid = message_id.to_string();
        let uid = user_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;

            let exists: bool = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE id = ?1",
                rusqlite::params![mid],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )?;
            if !exists {
                return Err(StoreError::MessageNotFound(mid));
            }

            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (message_id, user_id) VALUES (?1, ?2)",
                    table
                ),
                rusqlite::params![mid, uid],
            )?;
            Ok(())
        })
        .await?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn create_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        let db = self.db.clone();
        let attachments_json = serde_json::to_string(&new.attachments)?;

        tokio::task::spawn_blocking(move || -> Result<Message, StoreError> {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let id = uuid::Uuid::now_v7().to_string();
            let created_at = chrono::Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, message_type, content, attachments, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, '{}', ?7)",
                rusqlite::params![
                    id,
                    new.conversation_id,
                    new.sender_id,
                    new.message_type.as_str(),
                    new.content,
                    attachments_json,
                    created_at,
                ],
            )?;

            Ok(Message {
                id,
                conversation_id: new.conversation_id,
                sender_id: new.sender_id,
                message_type: new.message_type,
                content: new.content,
                attachments: new.attachments,
                metadata: serde_json::json!({}),
                status: MessageStatus::default(),
                created_at,
            })
        })
        .await?
    }

    async fn find_conversation_members(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let db = self.db.clone();
        let conv = conversation_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, StoreError> {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let mut stmt = conn.prepare(
                "SELECT user_id FROM conversation_members WHERE conversation_id = ?1 ORDER BY joined_at, user_id",
            )?;
            let members = stmt
                .query_map(rusqlite::params![conv], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(members)
        })
        .await?
    }

    async fn append_delivered(&self, message_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.append_receipt("message_delivered", message_id, user_id)
            .await
    }

    async fn append_read(&self, message_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.append_receipt("message_read", message_id, user_id).await
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, StoreError> {
        let db = self.db.clone();
        let mid = message_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Message>, StoreError> {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;

            let row = conn
                .query_row(
                    "SELECT id, conversation_id, sender_id, message_type, content, attachments, metadata, created_at
                     FROM messages WHERE id = ?1",
                    rusqlite::params![mid],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, String>(7)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, conversation_id, sender_id, kind, content, attachments, metadata, created_at)) =
                row
            else {
                return Ok(None);
            };

            let delivered_to = receipt_users(&conn, "message_delivered", &id)?;
            let read_by = receipt_users(&conn, "message_read", &id)?;

            Ok(Some(Message {
                id,
                conversation_id,
                sender_id,
                message_type: MessageType::parse(&kind).unwrap_or_default(),
                content,
                attachments: serde_json::from_str::<Vec<Attachment>>(&attachments)?,
                metadata: serde_json::from_str(&metadata)?,
                status: MessageStatus {
                    delivered_to,
                    read_by,
                },
                created_at,
            }))
        })
        .await?
    }
}

fn receipt_users(
    conn: &rusqlite::Connection,
    table: &'static str,
    message_id: &str,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT user_id FROM {} WHERE message_id = ?1 ORDER BY rowid",
        table
    ))?;
    let users = stmt
        .query_map(rusqlite::params![message_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}
