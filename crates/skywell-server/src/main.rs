//! Skywell AppView binary.
//!
//! Opens the index, starts the Jetstream consumer, and serves the XRPC API
//! with structured logging and graceful shutdown on SIGTERM/SIGINT.

use skywell_index::{
    HttpIdentityResolver, IdentityResolver, RecordIndexer, SlugAllocator, ViewMaterializer,
};
use skywell_server::auth::ServiceAuthGate;
use skywell_server::jetstream::StreamConsumer;
use skywell_server::middleware::RateLimiter;
use skywell_server::{app, config, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// How long the consumer gets to wind down after the server stops.
const STREAM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("SKYWELL_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // The configured subscriber needs the config, so loading logs through a
    // default one.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("info"))
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || {
        config::load_config(selected_config_path)
    })
    .expect("failed to load configuration, the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = skywell_db::open_index(
        &config.database.path,
        skywell_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to open index database, check database.path in config");

    let resolver: Arc<dyn IdentityResolver> = Arc::new(
        HttpIdentityResolver::new(config.identity.resolver_settings())
            .expect("failed to build identity resolver"),
    );
    let indexer = RecordIndexer::new(pool.clone(), resolver.clone(), SlugAllocator::default());
    let views = ViewMaterializer::new(pool, resolver.clone());
    let auth = Arc::new(ServiceAuthGate::new(
        config.auth.service_did.clone(),
        Duration::from_secs(config.auth.leeway_secs),
        resolver,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stream = if config.jetstream.enabled {
        let consumer = StreamConsumer::new(
            indexer.clone(),
            config.jetstream.url.clone(),
            config.jetstream.wanted_collections.clone(),
            Duration::from_secs(config.jetstream.reconnect_delay_secs),
        );
        Some(tokio::spawn(consumer.run(shutdown_rx)))
    } else {
        tracing::warn!("jetstream consumer disabled, index will not update");
        None
    };

    let state = AppState {
        indexer,
        views,
        auth,
        rate_limiter: RateLimiter::new(),
        rate_limit: config.rate_limit.requests_per_minute,
    };

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, service_did = %config.auth.service_did, "starting skywell appview");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address, is another process using this port?");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Some(handle) = stream {
        if tokio::time::timeout(STREAM_SHUTDOWN_TIMEOUT, handle).await.is_err() {
            tracing::warn!("jetstream consumer did not stop in time");
        }
    }

    tracing::info!("skywell appview shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
