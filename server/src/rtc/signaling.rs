use crate::state::AppState;
use crate::ws::protocol::{RtcIcePayload, RtcIceRelay, RtcSdpPayload, RtcSdpRelay, ServerEvent};
use crate::ws::session::Session;

/// Handle an rtc_offer: relay to every socket of the target with the caller's user id.
pub async fn handle_rtc_offer(req: RtcSdpPayload, state: &AppState, session: &Session) -> usize {
    let event = ServerEvent::RtcOffer(RtcSdpRelay {
        from: session.user_id.clone(),
        sdp: req.sdp,
    });
    relay_to_user(state, session, &req.to, &event).await
}

/// Handle an rtc_answer: relay to every socket of the target with the caller's user id.
pub async fn handle_rtc_answer(req: RtcSdpPayload, state: &AppState, session: &Session) -> usize {
    let event = ServerEvent::RtcAnswer(RtcSdpRelay {
        from: session.user_id.clone(),
        sdp: req.sdp,
    });
    relay_to_user(state, session, &req.to, &event).await
}

/// Handle an rtc_ice: relay the candidate unchanged.
pub async fn handle_rtc_ice(req: RtcIcePayload, state: &AppState, session: &Session) -> usize {
    let event = ServerEvent::RtcIce(RtcIceRelay {
        from: session.user_id.clone(),
        candidate: req.candidate,
    });
    relay_to_user(state, session, &req.to, &event).await
}

/// Forward to all of `target`'s sockets. An offline target or a failed lookup
/// drops the signal; the caller is not told. Returns the number of sockets reached.
async fn relay_to_user(
    state: &AppState,
    session: &Session,
    target: &str,
    event: &ServerEvent,
) -> usize {
    let sockets = match state.registry.get_sockets(target).await {
        Ok(sockets) => sockets,
        Err(e) => {
            tracing::debug!(
                from = %session.user_id,
                to = %target,
                error = %e,
                "Signal target lookup failed, dropping"
            );
            return 0;
        }
    };

    if sockets.is_empty() {
        tracing::debug!(
            from = %session.user_id,
            to = %target,
            event = event.name(),
            "Signal target offline, dropping"
        );
        return 0;
    }

    state.hub.emit_to_sockets(&sockets, event)
}
