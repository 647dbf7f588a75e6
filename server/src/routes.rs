use axum::Router;
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Result<Router, Box<dyn std::error::Error>> {
    // Rate limiting on WebSocket handshakes, per client IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(state.settings.handshake_per_second)
            .burst_size(state.settings.handshake_burst)
            .finish()
            .ok_or("invalid handshake rate limit settings")?,
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // WebSocket endpoint (auth via query param or bearer header)
    let ws_routes = Router::new()
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Ok(Router::new()
        .merge(ws_routes)
        .merge(health)
        .with_state(state))
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
