use chrono::Utc;
use uuid::Uuid;

use super::ApiKeyService;
use crate::errors::KeyError;
use crate::models::{NewUsageEvent, UsageEvent};

const DEFAULT_USAGE_LIMIT: i64 = 50;
const MAX_USAGE_LIMIT: i64 = 500;

impl ApiKeyService {
    /// Logs one access and bumps `usage_count`, `rate_limit_used` and
    /// `last_used_at` in a single store transaction.
    ///
    /// `rate_limit_used` is never reset here; windowing is the caller's policy.
    pub async fn record_usage(&self, key_id: Uuid, event: NewUsageEvent) -> Result<(), KeyError> {
        let recorded = self
            .call("record_usage", self.store.record_usage(key_id, &event, Utc::now()))
            .await?;
        if !recorded {
            tracing::warn!(key_id = %key_id, endpoint = %event.endpoint, "usage recorded against missing api key");
            return Err(KeyError::NotFound);
        }
        tracing::trace!(
            key_id = %key_id,
            endpoint = %event.endpoint,
            method = %event.method,
            status = event.status,
            "api key usage recorded"
        );
        Ok(())
    }

    /// Newest-first usage events for a key.
    pub async fn recent_usage(
        &self,
        key_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<UsageEvent>, KeyError> {
        self.get(key_id).await?;
        let limit = match limit {
            Some(l) if l > 0 => l.min(MAX_USAGE_LIMIT),
            _ => DEFAULT_USAGE_LIMIT,
        };
        self.call("list_usage", self.store.list_usage(key_id, limit)).await
    }
}
