use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, timeout};

use crate::chat::presence::PresenceUpdate;
use crate::state::AppState;
use crate::ws::broadcast::send_event;
use crate::ws::protocol::{self, ServerEvent};
use crate::ws::session::{ConnectionState, Session};
use crate::ws::ConnectionSender;

/// Ping interval: server sends WebSocket ping every 30 seconds.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Presence task: forwards global presence transitions to this client
/// - Ping task: liveness check; a missed pong ends the reader loop
/// - Reader loop: decodes frames and dispatches to protocol handlers
pub async fn run_connection(socket: WebSocket, state: AppState, session: Session) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let mut lifecycle = ConnectionState::default();
    lifecycle.authenticate(session.clone());

    // Subscribe before registering so this client sees its own online edge.
    let presence_rx = state.presence.subscribe();
    state.hub.attach(&session.socket_id, tx.clone());

    if let Err(e) = state
        .presence
        .connected(&session.user_id, &session.socket_id)
        .await
    {
        // Room traffic on this instance still works without the registry.
        tracing::error!(
            user_id = %session.user_id,
            socket_id = %session.socket_id,
            error = %e,
            "Failed to register socket"
        );
    }

    tracing::info!(
        user_id = %session.user_id,
        socket_id = %session.socket_id,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let presence_handle = tokio::spawn(presence_task(presence_rx, tx.clone()));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Fired by the ping task when the peer stops answering. A silent peer
    // never ends the stream on its own, so the reader must be told.
    let (dead_tx, mut dead_rx) = oneshot::channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_socket_id = session.socket_id.clone();
    let ping_interval = state.settings.ping_interval;
    let pong_timeout = state.settings.pong_timeout;
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(socket_id = %ping_socket_id, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
        let _ = dead_tx.send(());
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = &mut dead_rx => {
                tracing::info!(
                    user_id = %session.user_id,
                    socket_id = %session.socket_id,
                    "Peer unresponsive, dropping connection"
                );
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &tx, &state, &session).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        socket_id = %session.socket_id,
                        "Ignoring binary frame"
                    );
                    send_event(&tx, &ServerEvent::error("Binary frames are not supported"));
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %session.user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %session.user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %session.user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer, presence and ping tasks
    writer_handle.abort();
    presence_handle.abort();
    ping_handle.abort();

    if let Some(session) = lifecycle.close() {
        close_session(&state, &session).await;
    }

    tracing::info!(
        user_id = %session.user_id,
        socket_id = %session.socket_id,
        "WebSocket actor stopped"
    );
}

/// Leave all rooms, drop the registry entry, evaluate the offline edge.
async fn close_session(state: &AppState, session: &Session) {
    state.hub.detach(&session.socket_id);
    if let Err(e) = state.presence.disconnected(&session.socket_id).await {
        tracing::error!(
            user_id = %session.user_id,
            socket_id = %session.socket_id,
            error = %e,
            "Failed to unregister socket"
        );
    }
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
    }
}

/// Forward presence transitions from the process-wide channel to this connection.
async fn presence_task(mut rx: broadcast::Receiver<PresenceUpdate>, tx: ConnectionSender) {
    loop {
        match rx.recv().await {
            Ok(update) => {
                if !send_event(&tx, &ServerEvent::PresenceUpdate(update)) {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Presence subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
