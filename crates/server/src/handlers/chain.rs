//! Public API handlers: health probe, chain queries, raw RPC proxy, and
//! per-key usage reporting.
//!
//! Everything under `/api/v1/` runs behind the gatekeeper, so handlers here
//! can assume an [`AdmittedKey`] extension is present on protected routes.

use crate::middleware::AdmittedKey;
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use ethgate_core::UpstreamError;
use serde_json::{json, Map, Value};
use tracing::{error, warn};

/// Upstream failure surfaced through a handler.
///
/// The raw proxy and the typed chain queries both end up here; the health
/// probe handles its own failure shape instead.
pub struct ApiError(UpstreamError);

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "upstream call failed");
        (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "Bad Gateway",
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

/// `GET /api/health`. Unauthenticated; reports upstream connectivity by
/// asking the node for its current block.
pub async fn health(State(state): State<AppState>) -> Response {
    let timestamp = Utc::now().timestamp_millis();
    match state.upstream.block_number().await {
        Ok(block_number) => Json(json!({
            "status": "healthy",
            "timestamp": timestamp,
            "ethereum": {
                "connected": true,
                "blockNumber": block_number,
            },
        }))
        .into_response(),
        Err(err) => {
            warn!(error = %err, "health check cannot reach upstream node");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": timestamp,
                    "ethereum": {
                        "connected": false,
                        "error": err.to_string(),
                    },
                })),
            )
                .into_response()
        }
    }
}

/// `POST /api/v1/rpc`. Forwards the caller's JSON-RPC payload verbatim and
/// returns the node's response, error objects included.
pub async fn rpc_proxy(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let body = state.upstream.raw(payload).await?;
    Ok(Json(body))
}

/// `GET /api/v1/block`.
pub async fn block(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let block_number = state.upstream.block_number().await?;
    Ok(Json(json!({ "blockNumber": block_number })))
}

/// `GET /api/v1/gas/price`. Reports wei as a string to avoid precision loss
/// in JSON consumers, gwei as a float for convenience.
pub async fn gas_price(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let wei = state.upstream.gas_price().await?;
    #[allow(clippy::cast_precision_loss)]
    let gwei = wei as f64 / 1e9;
    Ok(Json(json!({
        "wei": wei.to_string(),
        "gwei": gwei,
    })))
}

/// `GET /api/v1/usage`. Per-window counts and effective limits for the
/// calling key. Read-only against the engine; the only quota this request
/// consumes is its own admission through the gatekeeper.
pub async fn usage(
    State(state): State<AppState>,
    Extension(AdmittedKey(record)): Extension<AdmittedKey>,
) -> Json<Value> {
    let counts = state.engine.usage(&record.key);

    let mut windows = Map::new();
    for (window, used) in counts {
        let limit = state.engine.effective_limit(window, record.custom_limits.as_ref());
        windows.insert(
            window.field().to_string(),
            json!({
                "used": used,
                "limit": limit,
                "remaining": limit.saturating_sub(used),
            }),
        );
    }

    Json(json!({
        "key": record.masked_key(),
        "name": record.name,
        "usage": Value::Object(windows),
    }))
}
