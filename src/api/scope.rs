//! Permission guard for routes owned by other services.
//!
//! ```ignore
//! let guard = ScopeGuard::require_any(state.clone(), ["recipes:read", "recipes:write"]);
//! let routes = Router::new()
//!     .route("/recipes", get(list_recipes))
//!     .route_layer(axum::middleware::from_fn_with_state(guard, require_scopes));
//! ```
//!
//! A missing, unknown, inactive or expired key yields 401; a resolvable key
//! without the required permissions yields 403. Allowed requests carry the
//! key in an [`AuthenticatedKey`] extension, and their final response status
//! is recorded as usage.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use super::{api_key_from_headers, forbidden, header_str, unauthorized};
use crate::models::{ApiKey, NewUsageEvent};
use crate::service::ApiKeyService;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Any,
    All,
}

/// The key that passed the guard, available to downstream handlers.
#[derive(Debug, Clone)]
pub struct AuthenticatedKey(pub ApiKey);

#[derive(Clone)]
pub struct ScopeGuard {
    state: Arc<AppState>,
    mode: MatchMode,
    required: Arc<[String]>,
}

impl ScopeGuard {
    pub fn new<I, S>(state: Arc<AppState>, mode: MatchMode, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state,
            mode,
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    /// Requires at least one of `required`.
    pub fn require_any<I, S>(state: Arc<AppState>, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(state, MatchMode::Any, required)
    }

    /// Requires every permission in `required`.
    pub fn require_all<I, S>(state: Arc<AppState>, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(state, MatchMode::All, required)
    }
}

pub async fn require_scopes(
    State(guard): State<ScopeGuard>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(secret) = api_key_from_headers(req.headers()).map(str::to_owned) else {
        return unauthorized("API key required");
    };

    let keys = &guard.state.keys;
    let result = match guard.mode {
        MatchMode::Any => keys.authorize_any(&secret, &guard.required[..]).await,
        MatchMode::All => keys.authorize_all(&secret, &guard.required[..]).await,
    };

    let key = match result {
        Ok(auth) if auth.authorized => auth.key,
        Ok(_) => return forbidden("insufficient permissions"),
        Err(e) if e.is_unresolvable() => return unauthorized("invalid API key"),
        Err(e) => return e.into_response(),
    };

    let key_id = key.id;
    let usage = usage_from_request(&req);
    req.extensions_mut().insert(AuthenticatedKey(key));

    let response = next.run(req).await;
    record(keys, key_id, usage, response.status()).await;
    response
}

/// Captures endpoint, method, client address and user agent. The status
/// is filled in once the response is known.
pub(crate) fn usage_from_request(req: &Request) -> NewUsageEvent {
    let headers = req.headers();
    let source_address = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| header_str(headers, "x-real-ip").map(String::from))
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

    NewUsageEvent {
        endpoint: req.uri().path().to_string(),
        method: req.method().to_string(),
        status: 0,
        source_address,
        user_agent: header_str(headers, "user-agent").map(String::from),
    }
}

/// Records usage without failing the request it belongs to.
pub(crate) async fn record(
    keys: &ApiKeyService,
    key_id: Uuid,
    mut usage: NewUsageEvent,
    status: StatusCode,
) {
    usage.status = i32::from(status.as_u16());
    if let Err(e) = keys.record_usage(key_id, usage).await {
        tracing::error!(key_id = %key_id, "failed to record api key usage: {}", e);
    }
}
