//! Live Sources Service: binary entrypoint.
//! Loads config, starts the ingestion scheduler and serves the management
//! API plus `/metrics`.

use live_sources::{metrics::Metrics, EngineConfig, LiveSources};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON with LIVE_SOURCES_LOG_JSON=1.
/// `try_init` so a subscriber installed by the host runtime wins.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("live_sources=info,warn"));
    let json = std::env::var("LIVE_SOURCES_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = EngineConfig::load_default()?;
    let metrics = Metrics::init()?;
    let engine = LiveSources::new(config)?;
    // detached: lives as long as the service
    let _scheduler = engine.start();

    let router = engine.router().merge(metrics.router());
    Ok(router.into())
}
