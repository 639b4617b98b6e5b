//! Admin key-management handlers under `/api/admin/keys`.
//!
//! The gatekeeper has already checked `x-admin-secret` before any of these
//! run. Responses carry masked keys everywhere except key creation, which is
//! the single place the plaintext key is handed out.

use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ethgate_core::{ApiKeyRecord, CustomLimits, KeyStoreError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{error, info};

const MAX_NAME_LEN: usize = 100;

#[derive(Debug)]
pub enum AdminKeyError {
    InvalidName(String),
    InvalidAction(String),
    UnknownKey,
    Store(KeyStoreError),
}

impl From<KeyStoreError> for AdminKeyError {
    fn from(err: KeyStoreError) -> Self {
        Self::Store(err)
    }
}

impl IntoResponse for AdminKeyError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            Self::InvalidName(msg) => (StatusCode::BAD_REQUEST, "Bad Request", msg),
            Self::InvalidAction(action) => (
                StatusCode::BAD_REQUEST,
                "Bad Request",
                format!("Unknown action '{action}'. Expected 'activate' or 'deactivate'."),
            ),
            Self::UnknownKey => {
                (StatusCode::NOT_FOUND, "Not Found", "No such API key".to_string())
            }
            Self::Store(err) => {
                error!(error = %err, "key store operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    "Key store operation failed".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": error, "message": message }))).into_response()
    }
}

/// An [`ApiKeyRecord`] with the key masked for display.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySummary {
    pub key: String,
    pub name: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_limits: Option<CustomLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl From<ApiKeyRecord> for KeySummary {
    fn from(record: ApiKeyRecord) -> Self {
        Self {
            key: record.masked_key(),
            name: record.name,
            created_at: record.created_at,
            last_used_at: record.last_used_at,
            is_active: record.is_active,
            custom_limits: record.custom_limits,
            metadata: record.metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
    pub name: String,
    pub custom_limits: Option<CustomLimits>,
    pub metadata: Option<HashMap<String, String>>,
}

/// PATCH body: either a lifecycle `action` or a partial `limits` update.
/// When both are present the action wins and the limits are ignored.
#[derive(Debug, Deserialize)]
pub struct UpdateKeyRequest {
    pub action: Option<String>,
    pub limits: Option<CustomLimits>,
}

/// `GET /api/admin/keys`.
pub async fn list_keys(State(state): State<AppState>) -> Json<Value> {
    let keys: Vec<KeySummary> = state.store.list().into_iter().map(KeySummary::from).collect();
    let total = keys.len();
    Json(json!({ "keys": keys, "total": total }))
}

/// `POST /api/admin/keys`. Returns the plaintext key exactly once.
pub async fn create_key(
    State(state): State<AppState>,
    Json(request): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<Value>), AdminKeyError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AdminKeyError::InvalidName("Key name is required".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(AdminKeyError::InvalidName(format!(
            "Key name must be at most {MAX_NAME_LEN} characters"
        )));
    }

    let record = state.store.create(name, request.custom_limits, request.metadata)?;
    info!(key = %record.masked_key(), name = %record.name, "API key created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "key": record.key,
            "name": record.name,
            "createdAt": record.created_at,
            "customLimits": record.custom_limits,
            "message": "Store this key securely. It will not be shown again.",
        })),
    ))
}

/// `GET /api/admin/keys/{key}`. Masked record plus current per-window usage.
pub async fn get_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, AdminKeyError> {
    let record = state.store.get(&key).ok_or(AdminKeyError::UnknownKey)?;

    let mut usage = Map::new();
    for (window, used) in state.engine.usage(&key) {
        let limit = state.engine.effective_limit(window, record.custom_limits.as_ref());
        usage.insert(window.field().to_string(), json!({ "used": used, "limit": limit }));
    }

    let mut body = serde_json::to_value(KeySummary::from(record))
        .map_err(|e| AdminKeyError::Store(KeyStoreError::Serialize(e)))?;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("usage".to_string(), Value::Object(usage));
    }
    Ok(Json(body))
}

/// `PATCH /api/admin/keys/{key}`.
pub async fn update_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<UpdateKeyRequest>,
) -> Result<Json<Value>, AdminKeyError> {
    if let Some(action) = request.action {
        let updated = match action.as_str() {
            "activate" => state.store.activate(&key)?,
            "deactivate" => state.store.deactivate(&key)?,
            _ => return Err(AdminKeyError::InvalidAction(action)),
        };
        if !updated {
            return Err(AdminKeyError::UnknownKey);
        }
        info!(key = %ethgate_core::keystore::masked(&key), %action, "API key state changed");
    } else if let Some(limits) = request.limits {
        if !state.store.update_limits(&key, &limits)? {
            return Err(AdminKeyError::UnknownKey);
        }
        info!(key = %ethgate_core::keystore::masked(&key), "API key limits updated");
    } else {
        return Err(AdminKeyError::InvalidAction(
            "none (body must contain 'action' or 'limits')".to_string(),
        ));
    }

    let record = state.store.get(&key).ok_or(AdminKeyError::UnknownKey)?;
    Ok(Json(json!({ "updated": true, "key": KeySummary::from(record) })))
}

/// `DELETE /api/admin/keys/{key}`. Removes the record and purges the key's
/// rate-limit counters so a future key reusing the string starts clean.
pub async fn delete_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, AdminKeyError> {
    if !state.store.delete(&key)? {
        return Err(AdminKeyError::UnknownKey);
    }
    state.engine.remove(&key);
    info!(key = %ethgate_core::keystore::masked(&key), "API key deleted");
    Ok(Json(json!({ "deleted": true })))
}
