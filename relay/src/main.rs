//! ==============================================================================
//! main.rs - soil telemetry relay entry point
//! ==============================================================================
//!
//! purpose:
//!     the always-on half of the system. it listens to the field sensors over
//!     mqtt, persists every reading and fans it out to connected dashboards,
//!     and serves the rest endpoints dashboards use for historical windows.
//!
//! responsibilities:
//!     - load configuration (config/relay.toml + env overrides)
//!     - open the reading store (sqlite or in-memory)
//!     - run the mqtt subscriber loop in the background
//!     - serve /api/data/*, /ws and the static dashboard
//!
//! relationships:
//!     - uses: config.rs, store.rs / sqlite.rs, ingest.rs, web.rs
//!     - served to: dashboard core (src/dashboard, src/bin/dashboard.rs)
//!
//! architecture:
//!
//!     ┌──────────────┐        ┌─────────────────────────────────────────┐
//!     │ mqtt broker  │──────► │ relay (this binary)                     │
//!     │ sensores/... │        │  ┌──────────┐   ┌───────────────────┐   │
//!     └──────────────┘        │  │ run_mqtt │──►│ Relay             │   │
//!                             │  └──────────┘   │  store + broadcast│   │
//!                             │                 └─────────┬─────────┘   │
//!                             │        ┌──────────────────┴──────┐      │
//!                             │        ▼                         ▼      │
//!                             │  ReadingStore             broadcast tx  │
//!                             │   (sqlite)                      │       │
//!                             │        ▲                        ▼       │
//!                             │   GET /api/data/*          GET /ws      │
//!                             └────────┼────────────────────────┼───────┘
//!                                      └──────── dashboards ────┘
//!
//! ==============================================================================

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use soil_relay::config::RelayConfig;
use soil_relay::ingest::{run_mqtt, Relay};
use soil_relay::store::open_store;
use soil_relay::web::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration
    let config = RelayConfig::load_or_default();

    // step 2: logging; RUST_LOG wins over the config level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("===========================================================");
    tracing::info!("  Soil Telemetry Relay");
    tracing::info!("===========================================================");
    config.log_summary();

    // step 3: open the store
    let store = open_store(&config.store.url)
        .await
        .with_context(|| format!("failed to open store {}", config.store.url))?;
    tracing::info!("[STARTUP] ✓ Store ready ({})", config.store.url);

    let relay = Relay::new(store, config.push.channel_capacity)
        .with_reading_log(config.logging.show_readings);

    // step 4: mqtt ingestion in background
    if config.mqtt.enabled {
        let mqtt = config.mqtt.clone();
        let mqtt_relay = relay.clone();
        tokio::spawn(async move {
            run_mqtt(mqtt, mqtt_relay).await;
        });
    } else {
        tracing::warn!("[STARTUP] MQTT disabled - serving stored data only");
    }

    // step 5: web server in foreground
    let state = AppState {
        relay,
        api: config.api.clone(),
        push: config.push.clone(),
    };
    let app = router(state, &config.web);

    let addr = format!("{}:{}", config.server.address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("[STARTUP] ✓ Listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
