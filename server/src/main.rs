use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use aalap_server::chat::store::{MessageStore, SqliteMessageStore};
use aalap_server::config::{generate_config_template, Config};
use aalap_server::notify::{MemoryPushQueue, PushQueue, RedisPushQueue};
use aalap_server::registry::{MemoryRegistry, RedisRegistry, SocketRegistry};
use aalap_server::state::{AppState, GatewaySettings};
use aalap_server::{auth, db, routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("aalap_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter())
            .init();
    }

    tracing::info!("Aalap gateway v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite message store
    let db = db::init_db(&config.data_dir)?;
    let store: Arc<dyn MessageStore> = Arc::new(SqliteMessageStore::new(db));

    // Shared HS256 secret from config, else a generated key in data_dir
    let jwt_secret = match &config.jwt_secret {
        Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
        _ => auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?,
    };

    // Registry and push queue: Redis when configured, process memory otherwise
    let (registry, push_queue): (Arc<dyn SocketRegistry>, Arc<dyn PushQueue>) =
        match &config.redis_url {
            Some(url) => {
                let registry: Arc<dyn SocketRegistry> =
                    Arc::new(RedisRegistry::connect(url).await?);
                let queue: Arc<dyn PushQueue> =
                    Arc::new(RedisPushQueue::connect(url, &config.push_queue_key).await?);
                tracing::info!("Socket registry and push queue backed by Redis");
                (registry, queue)
            }
            None => {
                tracing::warn!(
                    "No redis_url configured; registry and push queue are in-process (single instance only)"
                );
                let registry: Arc<dyn SocketRegistry> = Arc::new(MemoryRegistry::new());
                let queue: Arc<dyn PushQueue> = Arc::new(MemoryPushQueue::new());
                (registry, queue)
            }
        };

    let settings = GatewaySettings {
        preview_length: config.preview_length,
        handshake_per_second: config.handshake_per_second,
        handshake_burst: config.handshake_burst,
        ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
        pong_timeout: Duration::from_secs(config.pong_timeout_secs.max(1)),
    };
    let app_state = AppState::new(jwt_secret, registry, store, push_queue, settings);

    // Build router
    let app = routes::build_router(app_state)?;

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Aalap gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
