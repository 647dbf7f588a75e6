//! Producer side of the offline push-notification queue.
//!
//! When a conversation member has no live socket, the delivery engine writes a
//! [`PushJob`] here. A separate worker drains the queue; this crate only
//! appends (and can peek for inspection).

pub mod memory;
pub mod redis_queue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::models::{Message, MessageType};
use crate::error::QueueError;

pub use memory::MemoryPushQueue;
pub use redis_queue::RedisPushQueue;

/// Default queue key, shared with the push worker.
pub const DEFAULT_QUEUE_KEY: &str = "push:queue";

/// Default preview cap, in characters.
pub const DEFAULT_PREVIEW_LENGTH: usize = 140;

const PUSH_TITLE: &str = "New message";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushJob {
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    /// Set by the queue at enqueue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[async_trait]
pub trait PushQueue: Send + Sync {
    /// Append a job. Returns the job as stored, with `created_at` filled in.
    async fn enqueue(&self, job: PushJob) -> Result<PushJob, QueueError>;

    /// Up to `n` most recently enqueued jobs, newest first.
    async fn peek_pending(&self, n: usize) -> Result<Vec<PushJob>, QueueError>;
}

/// Build the push job for one offline member of the message's conversation.
pub fn build_push_job(recipient_id: &str, message: &Message, preview_length: usize) -> PushJob {
    PushJob {
        user_id: recipient_id.to_string(),
        title: PUSH_TITLE.to_string(),
        body: preview_body(message, preview_length),
        data: serde_json::json!({
            "conversationId": message.conversation_id,
            "messageId": message.id,
            "senderId": message.sender_id,
        }),
        created_at: None,
    }
}

/// Message text capped at `max_chars` characters, or a type placeholder when
/// there is no text.
pub fn preview_body(message: &Message, max_chars: usize) -> String {
    match message.content.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => truncate_chars(text, max_chars),
        _ => placeholder(message.message_type).to_string(),
    }
}

fn placeholder(kind: MessageType) -> &'static str {
    match kind {
        MessageType::Text => "",
        MessageType::Image => "[image]",
        MessageType::System => "[system]",
        MessageType::Reaction => "[reaction]",
    }
}

/// Truncate on char boundaries, never inside a UTF-8 sequence.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
