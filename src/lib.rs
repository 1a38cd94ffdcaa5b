//! Keygate: API key issuance, authorization and usage accounting.
//!
//! The library crate backs both the `keygate` binary and the integration
//! tests in `tests/`.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod errors;
pub mod models;
pub mod secret;
pub mod service;
pub mod store;

pub use config::Config;
pub use errors::{KeyError, StoreError};
pub use service::ApiKeyService;
pub use store::{ApiKeyStore, MemoryStore, PgStore};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub keys: ApiKeyService,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn ApiKeyStore>, config: Config) -> Result<Self, KeyError> {
        Ok(Self {
            keys: ApiKeyService::from_config(store, &config)?,
            config,
        })
    }
}
