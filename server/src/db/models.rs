/// Row and domain types for the message store.
/// These correspond to the SQLite schema defined in migrations.rs.
use serde::{Deserialize, Serialize};

/// Kind of chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    System,
    Reaction,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::System => "system",
            Self::Reaction => "reaction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "system" => Some(Self::System),
            "reaction" => Some(Self::Reaction),
            _ => None,
        }
    }
}

/// File or media reference attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Delivery and read receipts. Both sets only grow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStatus {
    pub delivered_to: Vec<String>,
    pub read_by: Vec<String>,
}

/// Persisted chat message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// UUIDv7, so ids sort by creation time
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
    pub metadata: serde_json::Value,
    pub status: MessageStatus,
    /// RFC 3339
    pub created_at: String,
}

/// Input to `create_message`
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
}
