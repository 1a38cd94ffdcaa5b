//! In-memory [`ApiKeyStore`] for tests and single-process development.
//!
//! All state sits behind one `RwLock`, so every write (including the
//! event-plus-counter pair in `record_usage`) is applied as a unit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ApiKeyStore;
use crate::errors::StoreError;
use crate::models::{ApiKey, ApiKeyPatch, ListFilter, NewUsageEvent, UsageEvent};

#[derive(Default)]
struct State {
    keys: HashMap<Uuid, ApiKey>,
    by_secret: HashMap<String, Uuid>,
    usage: Vec<UsageEvent>,
    next_usage_id: i64,
}

/// Cheaply cloneable; all clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn insert_key(&self, key: &ApiKey) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.by_secret.contains_key(&key.secret) {
            return Err(StoreError::Conflict("api_keys_secret_key".into()));
        }
        if state.keys.contains_key(&key.id) {
            return Err(StoreError::Conflict("api_keys_pkey".into()));
        }
        state.by_secret.insert(key.secret.clone(), key.id);
        state.keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn get_key(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.state.read().await.keys.get(&id).cloned())
    }

    async fn get_active_key_by_secret(&self, secret: &str) -> Result<Option<ApiKey>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .by_secret
            .get(secret)
            .and_then(|id| state.keys.get(id))
            .filter(|k| k.is_active)
            .cloned())
    }

    async fn update_key(
        &self,
        id: Uuid,
        patch: &ApiKeyPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.keys.get_mut(&id).map(|key| {
            patch.apply_to(key, now);
            key.clone()
        }))
    }

    async fn set_expiry(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.keys.get_mut(&id).map(|key| {
            key.expires_at = Some(expires_at);
            key.updated_at = now;
            key.clone()
        }))
    }

    async fn delete_key(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(key) = state.keys.remove(&id) else {
            return Ok(false);
        };
        state.by_secret.remove(&key.secret);
        state.usage.retain(|e| e.api_key_id != id);
        Ok(true)
    }

    async fn list_keys(
        &self,
        filter: &ListFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ApiKey>, i64), StoreError> {
        let state = self.state.read().await;
        let mut matched: Vec<&ApiKey> = state.keys.values().filter(|k| filter.matches(k)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn count_keys(&self) -> Result<i64, StoreError> {
        Ok(self.state.read().await.keys.len() as i64)
    }

    async fn record_usage(
        &self,
        id: Uuid,
        event: &NewUsageEvent,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(key) = state.keys.get_mut(&id) else {
            return Ok(false);
        };
        key.usage_count += 1;
        key.rate_limit_used += 1;
        key.last_used_at = Some(now);

        state.next_usage_id += 1;
        let usage_id = state.next_usage_id;
        state.usage.push(UsageEvent {
            id: usage_id,
            api_key_id: id,
            endpoint: event.endpoint.clone(),
            method: event.method.clone(),
            status: event.status,
            source_address: event.source_address.clone(),
            user_agent: event.user_agent.clone(),
            created_at: now,
        });
        Ok(true)
    }

    async fn list_usage(&self, id: Uuid, limit: i64) -> Result<Vec<UsageEvent>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .usage
            .iter()
            .rev()
            .filter(|e| e.api_key_id == id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
