//! Message delivery engine.
//!
//! One `send_message` runs strictly in order: validate, check membership,
//! persist, broadcast to the conversation room, then walk the member list and
//! either push live to each member's sockets or enqueue a push notification.
//! The sender gets a `message_status` ack last.
//!
//! Only validation and persistence failures abort. Every other collaborator
//! failure degrades through one of the small helpers at the bottom of this
//! file, each named after what it falls back to.

use std::collections::HashSet;

use crate::db::models::{Message, NewMessage};
use crate::error::{SendError, StoreError};
use crate::notify::build_push_job;
use crate::state::AppState;
use crate::ws::protocol::{
    DeliveryReport, MessageReadEvent, MessageReadPayload, SendMessagePayload, ServerEvent,
    ServerMessage,
};
use crate::ws::session::Session;

/// Persist and fan out one message from `session`'s user.
pub async fn send_message(
    state: &AppState,
    session: &Session,
    payload: SendMessagePayload,
) -> Result<DeliveryReport, SendError> {
    let SendMessagePayload {
        conversation_id,
        message_type,
        content,
        attachments,
        temp_id,
    } = payload;

    // 1. validate
    let conversation_id = match conversation_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            return Err(SendError::Validation {
                temp_id,
                reason: "conversationId is required",
            })
        }
    };
    if session.user_id.trim().is_empty() {
        return Err(SendError::Validation {
            temp_id,
            reason: "senderId is required",
        });
    }

    // 2. membership (advisory); the same list drives fan-out below
    let members = members_leniently(state, &conversation_id, &session.user_id).await;

    // 3. persist
    let new = NewMessage {
        conversation_id: conversation_id.clone(),
        sender_id: session.user_id.clone(),
        message_type,
        content,
        attachments,
    };
    let message = match state.store.create_message(new).await {
        Ok(message) => message,
        Err(source) => {
            tracing::error!(
                user_id = %session.user_id,
                conversation_id = %conversation_id,
                error = %source,
                "Failed to persist message"
            );
            return Err(SendError::Persistence { temp_id, source });
        }
    };

    // 4. room broadcast
    let event = ServerEvent::Message(ServerMessage::from_stored(&message, temp_id));
    state.hub.emit_to_room(&conversation_id, &event, None);

    // 5-6. per-member delivery
    let mut report = DeliveryReport {
        message_id: message.id.clone(),
        ..Default::default()
    };
    let mut seen = HashSet::new();
    for member in members {
        if member == session.user_id || !seen.insert(member.clone()) {
            continue;
        }

        let sockets = sockets_or_offline(state, &member).await;
        if !sockets.is_empty() {
            state.hub.emit_to_sockets(&sockets, &event);
            record_delivered_or_log(state, &message.id, &member).await;
            report.delivered_to.push(member);
        } else if enqueue_push_or_log(state, &member, &message).await {
            report.push_queued_for.push(member);
        }
    }

    // 7. ack
    ack_sender(state, session, &report).await;

    tracing::debug!(
        user_id = %session.user_id,
        message_id = %report.message_id,
        delivered = report.delivered_to.len(),
        queued = report.push_queued_for.len(),
        "Message delivered"
    );

    Ok(report)
}

/// Record a read receipt and tell the conversation room.
pub async fn mark_read(
    state: &AppState,
    session: &Session,
    payload: MessageReadPayload,
) -> Result<(), StoreError> {
    state
        .store
        .append_read(&payload.message_id, &session.user_id)
        .await?;

    state.hub.emit_to_room(
        &payload.conversation_id,
        &ServerEvent::MessageRead(MessageReadEvent {
            conversation_id: payload.conversation_id.clone(),
            message_id: payload.message_id,
            user_id: session.user_id.clone(),
        }),
        None,
    );
    Ok(())
}

// --- Degrade helpers ---

/// Membership is advisory here. A non-member sender is logged and the send
/// proceeds. A failed lookup is logged and yields no members, so only the
/// room broadcast reaches anyone.
async fn members_leniently(state: &AppState, conversation_id: &str, user_id: &str) -> Vec<String> {
    match state.store.find_conversation_members(conversation_id).await {
        Ok(members) => {
            if !members.iter().any(|m| m == user_id) {
                tracing::warn!(
                    user_id = %user_id,
                    conversation_id = %conversation_id,
                    "Sender is not a conversation member, allowing"
                );
            }
            members
        }
        Err(e) => {
            tracing::error!(
                user_id = %user_id,
                conversation_id = %conversation_id,
                error = %e,
                "Failed to resolve conversation members, allowing"
            );
            Vec::new()
        }
    }
}

/// A member whose sockets cannot be looked up is treated as offline.
async fn sockets_or_offline(state: &AppState, user_id: &str) -> Vec<String> {
    match state.registry.get_sockets(user_id).await {
        Ok(sockets) => sockets.into_iter().collect(),
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Socket lookup failed, treating member as offline"
            );
            Vec::new()
        }
    }
}

async fn record_delivered_or_log(state: &AppState, message_id: &str, user_id: &str) {
    if let Err(e) = state.store.append_delivered(message_id, user_id).await {
        tracing::warn!(
            user_id = %user_id,
            message_id = %message_id,
            error = %e,
            "Failed to record delivery receipt"
        );
    }
}

/// Returns whether the job made it onto the queue.
async fn enqueue_push_or_log(state: &AppState, user_id: &str, message: &Message) -> bool {
    let job = build_push_job(user_id, message, state.settings.preview_length);
    match state.push_queue.enqueue(job).await {
        Ok(_) => true,
        Err(e) => {
            tracing::error!(
                user_id = %user_id,
                message_id = %message.id,
                error = %e,
                "Failed to enqueue push notification"
            );
            false
        }
    }
}

/// Ack every socket of the sender, or just the originating socket when the
/// registry has none or cannot be reached.
async fn ack_sender(state: &AppState, session: &Session, report: &DeliveryReport) {
    let event = ServerEvent::MessageStatus(report.clone());
    let sockets = match state.registry.get_sockets(&session.user_id).await {
        Ok(sockets) => sockets,
        Err(e) => {
            tracing::warn!(
                user_id = %session.user_id,
                error = %e,
                "Sender socket lookup failed, acking originating socket"
            );
            HashSet::new()
        }
    };

    if sockets.is_empty() {
        state.hub.emit_to_socket(&session.socket_id, &event);
    } else {
        state.hub.emit_to_sockets(&sockets, &event);
    }
}
