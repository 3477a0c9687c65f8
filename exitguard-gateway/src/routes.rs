//! HTTP routes for the device poll/ack gateway.
//!
//! Every `/client/*` handler authenticates first and only then parses the body,
//! so a rejected request never reaches the ledger. Storage calls are blocking
//! SQLite work and run on the blocking pool.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use exitguard_core::config::GatewayConfig;
use exitguard_core::domain::DeviceId;
use exitguard_core::{Database, DeviceRegistry, Ledger, PositionBook, Reconciler};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::auth::{DeviceAuthenticator, SignedHeaders};
use crate::error::GatewayError;
use crate::wire::{
    CloseAckRequest, CloseCommandView, HealthResponse, OkResponse, OpenAckRequest,
    PendingCommandsResponse, PositionView, PositionsResponse, ReceiptRequest,
};

/// Shared state behind every handler.
pub struct GatewayState {
    pub ledger: Ledger,
    pub book: PositionBook,
    pub reconciler: Reconciler,
    pub auth: DeviceAuthenticator,
    /// Default for `include_acknowledged` when the query does not set it.
    pub include_acknowledged: bool,
}

impl GatewayState {
    pub fn new(db: Arc<Database>, config: &GatewayConfig) -> Self {
        Self {
            ledger: Ledger::new(db.clone()),
            book: PositionBook::new(db.clone()),
            reconciler: Reconciler::new(db.clone()),
            auth: DeviceAuthenticator::new(DeviceRegistry::new(db), config.timestamp_window_secs),
            include_acknowledged: config.include_acknowledged,
        }
    }
}

pub fn router(state: Arc<GatewayState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/client/close-commands", get(list_close_commands))
        .route("/client/close-ack", post(close_ack))
        .route("/client/close-receipt", post(close_receipt))
        .route("/client/open-ack", post(open_ack))
        .route("/client/positions", get(list_positions))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: Arc<GatewayState>,
    config: &GatewayConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, router(state, config.max_body_bytes))
        .with_graceful_shutdown(shutdown)
        .await
}

// ─── Handlers ───────────────────────────────────────────────────────

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "exitguard".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn list_close_commands(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PendingCommandsResponse>, GatewayError> {
    // Reported only after the request authenticated.
    let include_param = include_acknowledged_param(uri.query());

    let commands: Vec<CloseCommandView> =
        blocking(state, method, uri, headers, body, move |state, device, _| {
            let include_acknowledged = include_param?.unwrap_or(state.include_acknowledged);
            let pending = state
                .ledger
                .pending_for_device(&device, include_acknowledged)?;
            debug!(device_id = %device, count = pending.len(), "close commands polled");
            Ok(pending.iter().map(CloseCommandView::from).collect())
        })
        .await?;

    Ok(Json(PendingCommandsResponse { commands }))
}

async fn close_ack(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<OkResponse>, GatewayError> {
    blocking(state, method, uri, headers, body, |state, device, body| {
        let request: CloseAckRequest = parse_body(&body)?;
        let (command_id, outcome) = request
            .into_outcome()
            .map_err(|msg| GatewayError::Validation(msg.to_string()))?;
        state
            .ledger
            .apply_ack(command_id, &device, outcome, Utc::now())?;
        Ok(())
    })
    .await?;
    Ok(Json(OkResponse::OK))
}

async fn close_receipt(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<OkResponse>, GatewayError> {
    blocking(state, method, uri, headers, body, |state, device, body| {
        let request: ReceiptRequest = parse_body(&body)?;
        state
            .ledger
            .mark_received(request.command_id, &device, Utc::now())?;
        Ok(())
    })
    .await?;
    Ok(Json(OkResponse::OK))
}

async fn open_ack(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<OkResponse>, GatewayError> {
    blocking(state, method, uri, headers, body, |state, device, body| {
        let request: OpenAckRequest = parse_body(&body)?;
        let (position_id, fill) = request.into_fill();
        state
            .reconciler
            .record_entry_fill(position_id, &device, fill, Utc::now())?;
        Ok(())
    })
    .await?;
    Ok(Json(OkResponse::OK))
}

async fn list_positions(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PositionsResponse>, GatewayError> {
    let positions: Vec<PositionView> =
        blocking(state, method, uri, headers, body, |state, device, _| {
            let positions = state.book.for_device(&device)?;
            Ok(positions.iter().map(PositionView::from).collect())
        })
        .await?;
    Ok(Json(PositionsResponse { positions }))
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Authenticate, then run `f` for the device on the blocking pool.
async fn blocking<T, F>(
    state: Arc<GatewayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    f: F,
) -> Result<T, GatewayError>
where
    T: Send + 'static,
    F: FnOnce(&GatewayState, DeviceId, Bytes) -> Result<T, GatewayError> + Send + 'static,
{
    let signed = SignedHeaders::from_headers(&headers)?;
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    tokio::task::spawn_blocking(move || {
        let device = state.auth.authenticate(
            method.as_str(),
            &path_and_query,
            &signed,
            &body,
            Utc::now(),
        )?;
        f(state.as_ref(), device, body)
    })
    .await
    .map_err(|e| GatewayError::Internal(format!("handler task failed: {e}")))?
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::Validation(format!("malformed body: {e}")))
}

fn include_acknowledged_param(query: Option<&str>) -> Result<Option<bool>, GatewayError> {
    let Some(query) = query else {
        return Ok(None);
    };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("include_acknowledged=") {
            return match value {
                "true" | "1" => Ok(Some(true)),
                "false" | "0" => Ok(Some(false)),
                _ => Err(GatewayError::Validation(
                    "include_acknowledged must be true or false".to_string(),
                )),
            };
        }
    }
    Ok(None)
}
