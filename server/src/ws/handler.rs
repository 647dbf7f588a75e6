use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::error::AuthError;
use crate::state::AppState;
use crate::ws::actor;
use crate::ws::protocol::{ErrorPayload, ServerEvent};
use crate::ws::session::Session;

/// Query parameters for WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid or missing
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT (or `Authorization: Bearer JWT`)
/// WebSocket upgrade endpoint.
/// On auth failure, upgrades, sends `auth_error` and closes with the matching code.
/// On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = extract_token(params.token.as_deref(), &headers)
        .ok_or(AuthError::MissingToken)
        .and_then(|token| jwt::validate_access_token(&state.jwt_secret, token));

    match claims {
        Ok(claims) => {
            let session = Session::new(claims.sub, claims.username);
            tracing::info!(
                user_id = %session.user_id,
                socket_id = %session.socket_id,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| handle_authenticated(socket, state, session))
        }
        Err(err) => {
            let close_code = close_code_for(&err);
            tracing::warn!(close_code = close_code, reason = %err, "WebSocket auth failed");
            ws.on_upgrade(move |socket| reject(socket, close_code, err))
        }
    }
}

/// Query parameter wins over the header when both are present.
fn extract_token<'a>(query: Option<&'a str>, headers: &'a HeaderMap) -> Option<&'a str> {
    query.filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    })
}

fn close_code_for(err: &AuthError) -> u16 {
    match err {
        AuthError::Expired => CLOSE_TOKEN_EXPIRED,
        AuthError::MissingToken | AuthError::Invalid => CLOSE_TOKEN_INVALID,
    }
}

/// Tell the client why, then close. No registry entry is ever made.
async fn reject(mut socket: WebSocket, close_code: u16, err: AuthError) {
    let event = ServerEvent::AuthError(ErrorPayload {
        message: err.to_string(),
    });
    if let Ok(json) = serde_json::to_string(&event) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code,
            reason: err.to_string().into(),
        })))
        .await;
}

/// Handle an authenticated WebSocket connection by spawning the actor.
async fn handle_authenticated(socket: WebSocket, state: AppState, session: Session) {
    actor::run_connection(socket, state, session).await;
}
