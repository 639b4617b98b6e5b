//! Route table and layer stack for the gateway.

use crate::handlers::{chain, keys};
use crate::middleware::gatekeeper_middleware;
use crate::state::AppState;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer};

/// Builds the application router.
///
/// The gatekeeper middleware wraps every route; path classification inside
/// it decides which requests need a key, which need the admin secret, and
/// which pass freely. Body limit and concurrency caps sit outside it so
/// oversized or excess requests are shed before any store access.
pub fn create_app(state: AppState) -> Router {
    let body_limit = state.config.server.request_body_limit_bytes;
    let max_concurrent = state.config.server.max_concurrent_requests;

    Router::new()
        .route("/api/health", get(chain::health))
        .route("/api/v1/rpc", post(chain::rpc_proxy))
        .route("/api/v1/block", get(chain::block))
        .route("/api/v1/gas/price", get(chain::gas_price))
        .route("/api/v1/usage", get(chain::usage))
        .route("/api/admin/keys", get(keys::list_keys).post(keys::create_key))
        .route(
            "/api/admin/keys/:key",
            get(keys::get_key).patch(keys::update_key).delete(keys::delete_key),
        )
        .layer(axum_middleware::from_fn_with_state(state.clone(), gatekeeper_middleware))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CompressionLayer::new())
        .layer(ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state)
}
