//! Persistence for API keys and their usage events.
//!
//! [`ApiKeyStore`] is the only shared mutable state in the service. Both
//! implementations honour the same contract:
//!
//! - `secret` is unique; a duplicate insert fails with [`StoreError::Conflict`].
//! - `record_usage` appends the event and bumps the counters atomically, with
//!   the increment performed by the store (never read-modify-write).
//! - Timestamps are supplied by the caller so both backends agree on `now`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{ApiKey, ApiKeyPatch, ListFilter, NewUsageEvent, UsageEvent};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_key(&self, key: &ApiKey) -> Result<(), StoreError>;

    async fn get_key(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError>;

    /// Looks up an active key by its secret. Expiry is not checked here.
    async fn get_active_key_by_secret(&self, secret: &str) -> Result<Option<ApiKey>, StoreError>;

    /// Applies the populated fields of `patch` and bumps `updated_at`.
    /// Returns `None` when the key does not exist.
    async fn update_key(
        &self,
        id: Uuid,
        patch: &ApiKeyPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError>;

    async fn set_expiry(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError>;

    /// Hard delete. Returns whether a row was removed.
    async fn delete_key(&self, id: Uuid) -> Result<bool, StoreError>;

    /// One page of keys matching `filter`, newest first, plus the total match count.
    async fn list_keys(
        &self,
        filter: &ListFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ApiKey>, i64), StoreError>;

    async fn count_keys(&self) -> Result<i64, StoreError>;

    /// Appends a usage event and increments `usage_count` / `rate_limit_used`
    /// in one atomic unit. Returns `false`, writing nothing, if the key is missing.
    async fn record_usage(
        &self,
        id: Uuid,
        event: &NewUsageEvent,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Most recent usage events for a key, newest first.
    async fn list_usage(&self, id: Uuid, limit: i64) -> Result<Vec<UsageEvent>, StoreError>;

    /// Cheap round trip used by readiness checks.
    async fn ping(&self) -> Result<(), StoreError>;
}
