//! JSON wire protocol and inbound event dispatch.
//!
//! Every frame is a text frame of the form `{"event": "<name>", "data": {...}}`.
//! Field names inside `data` are camelCase.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::chat::{delivery, presence::PresenceUpdate, rooms};
use crate::db::models::{Attachment, Message as StoredMessage, MessageType};
use crate::rtc::signaling;
use crate::state::AppState;
use crate::ws::broadcast::send_event;
use crate::ws::session::Session;

// --- Inbound ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation(ConversationRef),
    LeaveConversation(ConversationRef),
    SendMessage(SendMessagePayload),
    Typing(TypingPayload),
    RtcOffer(RtcSdpPayload),
    RtcAnswer(RtcSdpPayload),
    RtcIce(RtcIcePayload),
    MessageRead(MessageReadPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: String,
}

/// `send_message` body. Required fields are checked by the delivery engine so
/// a rejection can still echo `tempId`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RtcSdpPayload {
    pub to: String,
    pub sdp: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RtcIcePayload {
    pub to: String,
    pub candidate: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadPayload {
    pub conversation_id: String,
    pub message_id: String,
}

// --- Outbound ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Message(ServerMessage),
    MessageStatus(DeliveryReport),
    MessageError(MessageErrorPayload),
    MessageRead(MessageReadEvent),
    Typing(TypingEvent),
    RtcOffer(RtcSdpRelay),
    RtcAnswer(RtcSdpRelay),
    RtcIce(RtcIceRelay),
    PresenceUpdate(PresenceUpdate),
    Joined(ConversationRef),
    Left(ConversationRef),
    AuthError(ErrorPayload),
    Error(ErrorPayload),
}

/// Persisted message as clients see it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
    pub metadata: serde_json::Value,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

impl ServerMessage {
    pub fn from_stored(message: &StoredMessage, temp_id: Option<String>) -> Self {
        Self {
            id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            message_type: message.message_type,
            content: message.content.clone(),
            attachments: message.attachments.clone(),
            metadata: message.metadata.clone(),
            created_at: message.created_at.clone(),
            temp_id,
        }
    }
}

/// Outcome of one `send_message`, sent back to the sender as `message_status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub message_id: String,
    pub delivered_to: Vec<String>,
    pub push_queued_for: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageErrorPayload {
    pub temp_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadEvent {
    pub conversation_id: String,
    pub message_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub conversation_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RtcSdpRelay {
    pub from: String,
    pub sdp: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RtcIceRelay {
    pub from: String,
    pub candidate: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => "message",
            ServerEvent::MessageStatus(_) => "message_status",
            ServerEvent::MessageError(_) => "message_error",
            ServerEvent::MessageRead(_) => "message_read",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::RtcOffer(_) => "rtc_offer",
            ServerEvent::RtcAnswer(_) => "rtc_answer",
            ServerEvent::RtcIce(_) => "rtc_ice",
            ServerEvent::PresenceUpdate(_) => "presence_update",
            ServerEvent::Joined(_) => "joined",
            ServerEvent::Left(_) => "left",
            ServerEvent::AuthError(_) => "auth_error",
            ServerEvent::Error(_) => "error",
        }
    }
}

// --- Dispatch ---

/// Handle an incoming text frame from an authenticated connection.
pub async fn handle_text_message(
    text: &str,
    tx: &mpsc::UnboundedSender<Message>,
    state: &AppState,
    session: &Session,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %session.user_id,
                socket_id = %session.socket_id,
                error = %e,
                "Failed to decode client event"
            );
            send_event(tx, &decode_failure_reply(text));
            return;
        }
    };

    dispatch_event(event, tx, state, session).await;
}

/// Only the outer frame; used when the typed decode fails.
#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Reply for a frame that did not decode as a `ClientEvent`.
///
/// A malformed `send_message` still answers with `message_error` carrying
/// whatever `tempId` the client sent, so its optimistic entry can be failed.
pub fn decode_failure_reply(text: &str) -> ServerEvent {
    match serde_json::from_str::<RawFrame>(text) {
        Ok(frame) if frame.event == "send_message" => {
            ServerEvent::MessageError(MessageErrorPayload {
                temp_id: frame
                    .data
                    .get("tempId")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
                error: "Invalid message payload".to_string(),
            })
        }
        _ => ServerEvent::error("Invalid event"),
    }
}

/// Dispatch a decoded event to the appropriate handler.
async fn dispatch_event(
    event: ClientEvent,
    tx: &mpsc::UnboundedSender<Message>,
    state: &AppState,
    session: &Session,
) {
    match event {
        ClientEvent::JoinConversation(payload) => {
            rooms::handle_join(payload, tx, state, session);
        }
        ClientEvent::LeaveConversation(payload) => {
            rooms::handle_leave(payload, tx, state, session);
        }
        ClientEvent::Typing(payload) => {
            rooms::handle_typing(payload, state, session);
        }
        ClientEvent::SendMessage(payload) => {
            if let Err(err) = delivery::send_message(state, session, payload).await {
                send_event(
                    tx,
                    &ServerEvent::MessageError(MessageErrorPayload {
                        temp_id: err.temp_id().map(str::to_string),
                        error: err.client_message(),
                    }),
                );
            }
        }
        ClientEvent::MessageRead(payload) => {
            if let Err(e) = delivery::mark_read(state, session, payload).await {
                tracing::warn!(
                    user_id = %session.user_id,
                    error = %e,
                    "Failed to record read receipt"
                );
                send_event(tx, &ServerEvent::error("Failed to record read receipt"));
            }
        }
        ClientEvent::RtcOffer(payload) => {
            signaling::handle_rtc_offer(payload, state, session).await;
        }
        ClientEvent::RtcAnswer(payload) => {
            signaling::handle_rtc_answer(payload, state, session).await;
        }
        ClientEvent::RtcIce(payload) => {
            signaling::handle_rtc_ice(payload, state, session).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_send_message() {
        let raw = r#"{"event":"send_message","data":{"conversationId":"c1","type":"text","content":"hi","tempId":"t1"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::SendMessage(payload) => {
                assert_eq!(payload.conversation_id.as_deref(), Some("c1"));
                assert_eq!(payload.message_type, MessageType::Text);
                assert_eq!(payload.temp_id.as_deref(), Some("t1"));
                assert!(payload.attachments.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_send_message_missing_conversation_keeps_temp_id() {
        let raw = r#"{"event":"send_message","data":{"tempId":"t9"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage(SendMessagePayload {
                temp_id: Some("t9".to_string()),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_decode_rtc_ice_keeps_candidate_opaque() {
        let raw = r#"{"event":"rtc_ice","data":{"to":"bob","candidate":{"candidate":"a=1","sdpMid":"0"}}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::RtcIce(payload) => {
                assert_eq!(payload.to, "bob");
                assert_eq!(payload.candidate["sdpMid"], "0");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let raw = r#"{"event":"drop_tables","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_encode_message_uses_wire_names() {
        let event = ServerEvent::Message(ServerMessage {
            id: "m1".to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "alice".to_string(),
            message_type: MessageType::Text,
            content: Some("hi".to_string()),
            attachments: Vec::new(),
            metadata: serde_json::json!({}),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            temp_id: Some("t1".to_string()),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "message");
        assert_eq!(value["data"]["_id"], "m1");
        assert_eq!(value["data"]["conversationId"], "c1");
        assert_eq!(value["data"]["type"], "text");
        assert_eq!(value["data"]["tempId"], "t1");
        assert_eq!(event.name(), "message");
    }

    #[test]
    fn test_encode_message_status() {
        let event = ServerEvent::MessageStatus(DeliveryReport {
            message_id: "m1".to_string(),
            delivered_to: vec!["bob".to_string()],
            push_queued_for: vec![],
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "message_status");
        assert_eq!(value["data"]["deliveredTo"], serde_json::json!(["bob"]));
        assert_eq!(value["data"]["pushQueuedFor"], serde_json::json!([]));
    }

    #[test]
    fn test_bad_send_message_shape_keeps_temp_id() {
        let raw = r#"{"event":"send_message","data":{"conversationId":"c1","type":"video","tempId":"t7"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
        assert_eq!(
            decode_failure_reply(raw),
            ServerEvent::MessageError(MessageErrorPayload {
                temp_id: Some("t7".to_string()),
                error: "Invalid message payload".to_string(),
            })
        );

        let raw = r#"{"event":"send_message","data":{"content":42}}"#;
        match decode_failure_reply(raw) {
            ServerEvent::MessageError(payload) => assert_eq!(payload.temp_id, None),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_other_decode_failures_get_generic_error() {
        for raw in [
            "not json",
            r#"{"event":"drop_tables","data":{}}"#,
            r#"{"event":"typing","data":{"conversationId":"c1"}}"#,
        ] {
            assert_eq!(decode_failure_reply(raw), ServerEvent::error("Invalid event"));
        }
    }
}
