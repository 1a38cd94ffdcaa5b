use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{api_key_from_headers, scope};
use crate::errors::{error_response, KeyError};
use crate::models::{
    ApiKeyPage, ApiKeySummary, CreateApiKeyRequest, ListApiKeysParams, UpdateApiKeyRequest,
    UsageEvent,
};
use crate::AppState;

// ── Query parameters ─────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RenewParams {
    pub extend_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UsageParams {
    pub limit: Option<i64>,
}

// ── Management handlers ──────────────────────────────────────

/// POST /api/v1/api-keys: the only response that carries the plaintext secret.
pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), KeyError> {
    let key = state.keys.create(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "API key created. Store the key now; it will not be shown again.",
            "api_key": key,
        })),
    ))
}

pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListApiKeysParams>,
) -> Result<Json<ApiKeyPage>, KeyError> {
    Ok(Json(state.keys.list(params).await?))
}

pub async fn get_api_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiKeySummary>, KeyError> {
    Ok(Json(state.keys.get(id).await?.summary()))
}

pub async fn update_api_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateApiKeyRequest>,
) -> Result<Json<ApiKeySummary>, KeyError> {
    Ok(Json(state.keys.update(id, payload).await?.summary()))
}

pub async fn delete_api_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, KeyError> {
    state.keys.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn renew_api_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<RenewParams>,
) -> Result<Json<serde_json::Value>, KeyError> {
    let extend_days = params.extend_days.unwrap_or(0);
    let key = state.keys.renew(id, extend_days).await?;
    Ok(Json(json!({
        "message": "API key renewed",
        "extend_days": extend_days,
        "api_key": key.summary(),
    })))
}

pub async fn get_api_key_usage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<UsageParams>,
) -> Result<Json<Vec<UsageEvent>>, KeyError> {
    Ok(Json(state.keys.recent_usage(id, params.limit).await?))
}

pub async fn list_permissions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "permissions": state.keys.available_permissions() }))
}

// ── Unauthenticated ──────────────────────────────────────────

/// POST /api/v1/validate: checks the key in `X-API-Key` (or a bearer token)
/// and records the call against it when valid.
pub async fn validate_api_key(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let Some(secret) = api_key_from_headers(req.headers()).map(str::to_owned) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "missing_api_key",
            "X-API-Key header is required",
        );
    };

    let key = match state.keys.resolve_active(&secret).await {
        Ok(key) => key,
        Err(e) if e.is_unresolvable() => {
            let reason = match e {
                KeyError::Expired => "expired",
                _ => "invalid",
            };
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "valid": false, "reason": reason })),
            )
                .into_response();
        }
        Err(e) => return e.into_response(),
    };

    let usage = scope::usage_from_request(&req);
    scope::record(&state.keys, key.id, usage, StatusCode::OK).await;

    Json(json!({
        "valid": true,
        "api_key_id": key.id,
        "name": key.name,
        "permissions": key.permissions,
        "expires_at": key.expires_at,
    }))
    .into_response()
}
