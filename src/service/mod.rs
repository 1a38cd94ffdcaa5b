//! The API key service: lifecycle, authorization, usage accounting and listing.
//!
//! Every operation re-reads the store; nothing about a key is cached in
//! process, so revocation and expiry take effect on the next call. Each store
//! call runs under the configured deadline, and dropping the returned future
//! aborts the in-flight query.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, KeyConfig, MAX_KEY_EXPIRY};
use crate::errors::{KeyError, StoreError};
use crate::models::PermissionCatalog;
use crate::secret::SecretGenerator;
use crate::store::ApiKeyStore;

mod authorize;
mod lifecycle;
mod listing;
mod usage;

pub use lifecycle::{initial_expiry, renewed_expiry};

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ApiKeyService {
    store: Arc<dyn ApiKeyStore>,
    generator: SecretGenerator,
    catalog: Arc<PermissionCatalog>,
    default_expiry: chrono::Duration,
    query_timeout: Duration,
}

impl std::fmt::Debug for ApiKeyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyService")
            .field("catalog", &self.catalog)
            .field("default_expiry", &self.default_expiry)
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

impl ApiKeyService {
    /// Fails when `keys.default_expiry` exceeds [`MAX_KEY_EXPIRY`].
    pub fn new(
        store: Arc<dyn ApiKeyStore>,
        keys: &KeyConfig,
        catalog: PermissionCatalog,
    ) -> Result<Self, KeyError> {
        let default_expiry = Some(keys.default_expiry)
            .filter(|d| *d <= MAX_KEY_EXPIRY)
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .ok_or_else(|| {
                KeyError::validation(format!(
                    "default key expiry must be at most {} days",
                    MAX_KEY_EXPIRY.as_secs() / 86_400
                ))
            })?;
        Ok(Self {
            store,
            generator: SecretGenerator::from_config(keys),
            catalog: Arc::new(catalog),
            default_expiry,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        })
    }

    /// Builds the service from application config, honouring a catalog override.
    pub fn from_config(store: Arc<dyn ApiKeyStore>, cfg: &Config) -> Result<Self, KeyError> {
        Ok(Self::new(store, &cfg.keys, cfg.permission_catalog())?
            .with_query_timeout(cfg.query_timeout))
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn ApiKeyStore> {
        &self.store
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn default_expiry(&self) -> chrono::Duration {
        self.default_expiry
    }

    /// Runs a store call under the query deadline.
    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, KeyError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::debug!(op = op, error = %e, "store call failed");
                Err(KeyError::Store(e))
            }
            Err(_) => {
                tracing::warn!(op = op, timeout = ?self.query_timeout, "store call timed out");
                Err(KeyError::Timeout(self.query_timeout))
            }
        }
    }
}
