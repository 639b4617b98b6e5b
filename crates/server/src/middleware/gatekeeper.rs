//! The gatekeeper as Axum middleware.
//!
//! Every request enters here first. Outcomes map to HTTP like so:
//!
//! - `Bypass` / `AdminGranted`: run the downstream handler untouched.
//! - `Denied`: `401` with `{"error": "Unauthorized", "message": <reason>}`.
//! - `Throttled`: `429` with the exceeded window, `Retry-After`, and
//!   per-window remaining quota as both body fields and headers.
//! - `Admitted`: run the handler, then append
//!   `X-RateLimit-Remaining-<Window>` and `X-RateLimit-Reset-<Window>`
//!   headers without disturbing the handler's status or body.

use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{HeaderName, HeaderValue, RETRY_AFTER},
        HeaderMap, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use ethgate_core::{gatekeeper::GateOutcome, ApiKeyRecord, DenyReason, RateLimitDecision};
use serde_json::{json, Map, Value};
use tracing::warn;

/// The validated key record for an admitted request, available to handlers
/// via request extensions.
#[derive(Debug, Clone)]
pub struct AdmittedKey(pub ApiKeyRecord);

/// Gatekeeper middleware applied to the whole router.
///
/// Path classification happens inside the gatekeeper, so non-API routes pay
/// only the cost of that check.
pub async fn gatekeeper_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    let api_key = header_str(request.headers(), "x-api-key");
    let admin_secret = header_str(request.headers(), "x-admin-secret");

    match state.gatekeeper.evaluate(&path, api_key.as_deref(), admin_secret.as_deref()) {
        GateOutcome::Bypass | GateOutcome::AdminGranted => next.run(request).await,
        GateOutcome::Denied(reason) => {
            warn!(path = %path, reason = %reason, "request rejected");
            unauthorized_response(&reason)
        }
        GateOutcome::Throttled(decision) => {
            warn!(
                path = %path,
                window = decision.exceeded.map_or("", |w| w.label()),
                "rate limit exceeded"
            );
            rate_limited_response(&decision)
        }
        GateOutcome::Admitted { record, decision } => {
            request.extensions_mut().insert(AdmittedKey(record));
            let mut response = next.run(request).await;
            append_quota_headers(response.headers_mut(), &decision, true);
            response
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(String::from)
}

fn unauthorized_response(reason: &DenyReason) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "Unauthorized",
            "message": reason.to_string(),
        })),
    )
        .into_response()
}

fn rate_limited_response(decision: &RateLimitDecision) -> Response {
    let retry_after = decision.retry_after_secs().unwrap_or(0);

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Rate limit exceeded",
            "limitExceeded": decision.exceeded.map(|w| w.label()),
            "retryAfter": retry_after,
            "remaining": remaining_map(decision),
        })),
    )
        .into_response();

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        headers.insert(RETRY_AFTER, value);
    }
    append_quota_headers(headers, decision, false);

    response
}

/// Per-window remaining quota keyed by field name, e.g.
/// `{"per10Min": 0, "perDay": 97, "perMonth": 997}`.
fn remaining_map(decision: &RateLimitDecision) -> Value {
    let mut map = Map::new();
    for status in &decision.windows {
        map.insert(status.window.field().to_string(), json!(status.remaining));
    }
    Value::Object(map)
}

fn append_quota_headers(headers: &mut HeaderMap, decision: &RateLimitDecision, with_reset: bool) {
    for status in &decision.windows {
        insert_numeric_header(
            headers,
            &format!("x-ratelimit-remaining-{}", status.window.label()),
            status.remaining,
        );
        if with_reset {
            insert_numeric_header(
                headers,
                &format!("x-ratelimit-reset-{}", status.window.label()),
                status.reset_secs,
            );
        }
    }
}

fn insert_numeric_header(headers: &mut HeaderMap, name: &str, value: u64) {
    // Names are fixed lowercase ASCII and values are decimal digits; these
    // conversions cannot fail for the inputs we produce.
    if let (Ok(name), Ok(value)) = (
        HeaderName::try_from(name.to_string()),
        HeaderValue::from_str(&value.to_string()),
    ) {
        headers.insert(name, value);
    }
}
