//! Conversation rooms: join, leave and typing indicators.
//! Rooms are local to this process and keyed by conversation id.

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::ws::broadcast::send_event;
use crate::ws::protocol::{ConversationRef, ServerEvent, TypingEvent, TypingPayload};
use crate::ws::session::Session;

pub fn handle_join(
    payload: ConversationRef,
    tx: &mpsc::UnboundedSender<Message>,
    state: &AppState,
    session: &Session,
) {
    state.hub.join(&payload.conversation_id, &session.socket_id);
    tracing::debug!(
        user_id = %session.user_id,
        socket_id = %session.socket_id,
        conversation_id = %payload.conversation_id,
        "Joined conversation"
    );
    send_event(tx, &ServerEvent::Joined(payload));
}

pub fn handle_leave(
    payload: ConversationRef,
    tx: &mpsc::UnboundedSender<Message>,
    state: &AppState,
    session: &Session,
) {
    state.hub.leave(&payload.conversation_id, &session.socket_id);
    send_event(tx, &ServerEvent::Left(payload));
}

/// Relay to everyone else in the room. The caller's own socket is skipped.
pub fn handle_typing(payload: TypingPayload, state: &AppState, session: &Session) {
    let event = ServerEvent::Typing(TypingEvent {
        conversation_id: payload.conversation_id.clone(),
        user_id: session.user_id.clone(),
        is_typing: payload.is_typing,
    });
    state
        .hub
        .emit_to_room(&payload.conversation_id, &event, Some(&session.socket_id));
}
