use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

use crate::errors::error_response;
use crate::models::{mask_secret, permission::ADMIN_PERMISSIONS};
use crate::AppState;

pub mod handlers;
pub mod scope;

pub use scope::{require_scopes, AuthenticatedKey, MatchMode, ScopeGuard};

/// The complete HTTP application: health probes plus the API under `/api/v1`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .nest("/api/v1", api_router(state.clone()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Build the API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let management = Router::new()
        .route(
            "/api-keys",
            get(handlers::list_api_keys).post(handlers::create_api_key),
        )
        .route(
            "/api-keys/:id",
            get(handlers::get_api_key)
                .put(handlers::update_api_key)
                .delete(handlers::delete_api_key),
        )
        .route("/api-keys/:id/renew", post(handlers::renew_api_key))
        .route("/api-keys/:id/usage", get(handlers::get_api_key_usage))
        .route("/permissions", get(handlers::list_permissions))
        .layer(middleware::from_fn_with_state(state, admin_auth));

    Router::new()
        .route("/validate", post(handlers::validate_api_key))
        .merge(management)
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.keys.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Middleware for the management API. Accepts, in order:
/// 1. `X-Admin-Key` matching the configured admin key;
/// 2. an API key (`X-API-Key` or `Authorization: Bearer`) holding `admin` or `admin:all`;
/// 3. `X-Bootstrap-Token` on `POST /api-keys`, only while no key exists yet.
async fn admin_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let headers = req.headers();

    if let Some(provided) = header_str(headers, "x-admin-key") {
        return match state.config.admin_key.as_deref() {
            Some(expected) if secrets_match(provided, expected) => next.run(req).await,
            _ => {
                // SECURITY: Never log the expected key or the full provided key
                tracing::warn!("admin API: invalid admin key (provided: '{}')", mask_secret(provided));
                unauthorized("invalid admin key")
            }
        };
    }

    if let Some(secret) = api_key_from_headers(headers).map(str::to_owned) {
        let key = match state.keys.authorize_any(&secret, &ADMIN_PERMISSIONS).await {
            Ok(auth) if auth.authorized => auth.key,
            Ok(auth) => {
                tracing::warn!(key_id = %auth.key.id, "admin API: api key lacks admin permission");
                return forbidden("insufficient permissions");
            }
            Err(e) if e.is_unresolvable() => {
                tracing::warn!("admin API: invalid api key (provided: '{}')", mask_secret(&secret));
                return unauthorized("invalid API key");
            }
            Err(e) => return e.into_response(),
        };
        let usage = scope::usage_from_request(&req);
        let response = next.run(req).await;
        scope::record(&state.keys, key.id, usage, response.status()).await;
        return response;
    }

    if req.method() == Method::POST && req.uri().path().ends_with("/api-keys") {
        if let Some(token) = header_str(headers, "x-bootstrap-token") {
            let Some(expected) = state.config.bootstrap_token.as_deref() else {
                return unauthorized("bootstrap is disabled");
            };
            if !secrets_match(token, expected) {
                tracing::warn!("admin API: invalid bootstrap token");
                return unauthorized("invalid bootstrap token");
            }
            return match state.keys.has_any_keys().await {
                Ok(false) => {
                    tracing::info!("admin API: bootstrap key creation authorized");
                    next.run(req).await
                }
                Ok(true) => unauthorized("bootstrap is only allowed before the first key exists"),
                Err(e) => e.into_response(),
            };
        }
    }

    tracing::warn!("admin API: missing credentials");
    unauthorized("admin credentials required")
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Raw API key from `X-API-Key`, falling back to `Authorization: Bearer`.
pub(crate) fn api_key_from_headers(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, "x-api-key").or_else(|| {
        header_str(headers, "authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    })
}

fn secrets_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

pub(crate) fn unauthorized(msg: &str) -> Response {
    error_response(StatusCode::UNAUTHORIZED, "authentication_error", "unauthorized", msg)
}

pub(crate) fn forbidden(msg: &str) -> Response {
    error_response(StatusCode::FORBIDDEN, "permission_error", "forbidden", msg)
}
