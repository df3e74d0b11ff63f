//! ==============================================================================
//! web.rs - rest range api and websocket push channel
//! ==============================================================================
//!
//! endpoints:
//!     GET /health                          liveness
//!     GET /api/data/latest                 newest n readings, ascending
//!     GET /api/data/all                    newest first, bounded by api.all_limit
//!     GET /api/data/chunk?skip=&limit=     ascending page
//!     GET /api/data/range?var=&start=&end= ascending, [start, end), iso 8601
//!     GET /ws                              push channel (historico, nuevoDato)
//!     *                                    static assets from web.static_dir
//!
//! relationships:
//!     - used by: main.rs (binds the listener), tests/api.rs
//!     - uses: ingest.rs (Relay: store handle + broadcast), store.rs
//!
//! ==============================================================================

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::{ApiConfig, PushConfig, WebConfig};
use crate::domain::{Metric, PushEvent, SensorReading};
use crate::error::StoreError;
use crate::ingest::Relay;

// ==============================================================================
// shared state
// ==============================================================================

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub api: ApiConfig,
    pub push: PushConfig,
}

pub fn router(state: AppState, web: &WebConfig) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/data/latest", get(latest_handler))
        .route("/api/data/all", get(all_handler))
        .route("/api/data/chunk", get(chunk_handler))
        .route("/api/data/range", get(range_handler))
        .route("/ws", get(websocket_handler))
        .with_state(state);

    if web.static_dir.is_dir() {
        app = app.fallback_service(ServeDir::new(&web.static_dir));
    }
    if web.cors {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

// ==============================================================================
// errors
// ==============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Store(e) => {
                tracing::error!("[API] store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to read readings".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult = Result<Json<Vec<SensorReading>>, ApiError>;

// ==============================================================================
// rest handlers
// ==============================================================================

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn latest_handler(State(state): State<AppState>) -> ApiResult {
    let readings = state.relay.store().latest(state.api.latest_count).await?;
    Ok(Json(readings))
}

async fn all_handler(State(state): State<AppState>) -> ApiResult {
    let readings = state.relay.store().all(state.api.all_limit).await?;
    Ok(Json(readings))
}

#[derive(Deserialize)]
struct ChunkParams {
    skip: Option<usize>,
    limit: Option<usize>,
}

async fn chunk_handler(State(state): State<AppState>, Query(params): Query<ChunkParams>) -> ApiResult {
    let skip = params.skip.unwrap_or(0);
    let limit = params.limit.unwrap_or(state.api.max_chunk).min(state.api.max_chunk);
    let readings = state.relay.store().chunk(skip, limit).await?;
    Ok(Json(readings))
}

#[derive(Deserialize)]
struct RangeParams {
    var: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

fn parse_bound(name: &str, value: Option<&str>) -> Result<DateTime<Utc>, ApiError> {
    let value = value.ok_or_else(|| ApiError::BadRequest(format!("missing `{}`", name)))?;
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ApiError::BadRequest(format!("invalid `{}`: {}", name, e)))
}

async fn range_handler(State(state): State<AppState>, Query(params): Query<RangeParams>) -> ApiResult {
    let metric = match params.var.as_deref() {
        None | Some("") => None,
        Some(var) => Some(
            var.parse::<Metric>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        ),
    };
    let start = parse_bound("start", params.start.as_deref())?;
    let end = parse_bound("end", params.end.as_deref())?;

    if end <= start {
        return Ok(Json(Vec::new()));
    }
    let readings = state.relay.store().range(metric, start, end).await?;
    Ok(Json(readings))
}

// ==============================================================================
// push channel
// ==============================================================================

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_connection(socket, state))
}

async fn send_event(socket: &mut WebSocket, event: &PushEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::error!("[WS] failed to encode event: {}", e);
            true
        }
    }
}

async fn websocket_connection(mut socket: WebSocket, state: AppState) {
    tracing::info!("[WS] viewer connected");

    // subscribe before reading the seed so nothing falls in between
    let mut rx = state.relay.subscribe();

    match state.relay.store().latest(state.push.seed_count).await {
        Ok(seed) => {
            if !send_event(&mut socket, &PushEvent::Historico(seed)).await {
                return;
            }
        }
        Err(e) => tracing::warn!("[WS] could not load seed: {}", e),
    }

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(event) => {
                        if !send_event(&mut socket, &event).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("[WS] slow viewer skipped {} readings", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    tracing::info!("[WS] viewer disconnected");
}
