//! Authorization decisions: resolution of raw secrets, any/all permission
//! matching, revocation and expiry, and store deadlines.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keygate::config::Config;
use keygate::models::{
    ApiKey, ApiKeyPatch, CreateApiKeyRequest, ListFilter, NewUsageEvent, UpdateApiKeyRequest,
    UsageEvent,
};
use keygate::{ApiKeyService, ApiKeyStore, KeyError, MemoryStore, StoreError};
use uuid::Uuid;

fn service() -> ApiKeyService {
    ApiKeyService::from_config(Arc::new(MemoryStore::new()), &Config::for_tests()).unwrap()
}

async fn issue(svc: &ApiKeyService, permissions: &[&str]) -> ApiKey {
    svc.create(CreateApiKeyRequest {
        name: "Scoped Key".into(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    })
    .await
    .unwrap()
}

mod decisions {
    use super::*;

    #[tokio::test]
    async fn test_any_and_all_matching() {
        let svc = service();
        let key = issue(&svc, &["recipes:read", "users:write"]).await;

        let auth = svc.authorize_any(&key.secret, &["recipes:read"]).await.unwrap();
        assert!(auth.authorized);
        assert_eq!(auth.key.id, key.id);

        let auth = svc
            .authorize_any(&key.secret, &["admin", "users:write"])
            .await
            .unwrap();
        assert!(auth.authorized);

        let auth = svc
            .authorize_all(&key.secret, &["recipes:read", "users:write"])
            .await
            .unwrap();
        assert!(auth.authorized);

        // A deny is a decision, not an error.
        let auth = svc
            .authorize_all(&key.secret, &["recipes:read", "admin"])
            .await
            .unwrap();
        assert!(!auth.authorized);

        let auth = svc.authorize_any(&key.secret, &["meals:write"]).await.unwrap();
        assert!(!auth.authorized);
    }

    #[tokio::test]
    async fn test_empty_requirement_authorizes_any_valid_key() {
        let svc = service();
        let key = issue(&svc, &["read"]).await;
        let none: [&str; 0] = [];
        assert!(svc.authorize_any(&key.secret, &none).await.unwrap().authorized);
        assert!(svc.authorize_all(&key.secret, &none).await.unwrap().authorized);
    }

    #[tokio::test]
    async fn test_required_names_are_normalized() {
        let svc = service();
        let key = issue(&svc, &["recipes:read"]).await;
        let auth = svc.authorize_any(&key.secret, &[" RECIPES:Read "]).await.unwrap();
        assert!(auth.authorized);
    }

    #[tokio::test]
    async fn test_owned_requirements() {
        let svc = service();
        let key = issue(&svc, &["health:read", "health:write"]).await;
        let required = vec!["health:read".to_string(), "health:write".to_string()];
        assert!(svc.authorize_all(&key.secret, &required).await.unwrap().authorized);
    }
}

mod resolution {
    use super::*;

    #[tokio::test]
    async fn test_unknown_and_empty_secrets() {
        let svc = service();
        assert!(matches!(
            svc.authorize_any("ak_doesnotexist", &["read"]).await,
            Err(KeyError::NotFound)
        ));
        assert!(matches!(svc.resolve_active("").await, Err(KeyError::NotFound)));
        assert!(!svc.validate_key("").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoked_key_is_not_found() {
        let svc = service();
        let key = issue(&svc, &["read"]).await;
        assert!(svc.validate_key(&key.secret).await.unwrap());

        svc.update(
            key.id,
            UpdateApiKeyRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            svc.authorize_any(&key.secret, &["read"]).await,
            Err(KeyError::NotFound)
        ));
        assert!(!svc.validate_key(&key.secret).await.unwrap());

        // Reactivation takes effect immediately.
        svc.update(
            key.id,
            UpdateApiKeyRequest {
                is_active: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(svc.validate_key(&key.secret).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_key_is_rejected_until_renewed() {
        let svc = service();
        let key = issue(&svc, &["read"]).await;
        svc.store()
            .set_expiry(key.id, Utc::now() - chrono::Duration::seconds(1), Utc::now())
            .await
            .unwrap();

        assert!(matches!(
            svc.authorize_any(&key.secret, &["read"]).await,
            Err(KeyError::Expired)
        ));
        assert!(!svc.validate_key(&key.secret).await.unwrap());

        // Expired keys still count as existing for management reads.
        assert_eq!(svc.get(key.id).await.unwrap().id, key.id);

        svc.renew(key.id, 1).await.unwrap();
        assert!(svc.authorize_any(&key.secret, &["read"]).await.unwrap().authorized);
    }

    #[tokio::test]
    async fn test_permission_changes_apply_on_next_call() {
        let svc = service();
        let key = issue(&svc, &["read"]).await;
        assert!(!svc.authorize_any(&key.secret, &["write"]).await.unwrap().authorized);

        svc.update(
            key.id,
            UpdateApiKeyRequest {
                permissions: Some(vec!["write".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(svc.authorize_any(&key.secret, &["write"]).await.unwrap().authorized);
        assert!(!svc.authorize_any(&key.secret, &["read"]).await.unwrap().authorized);
    }
}

/// Delegates to a [`MemoryStore`] but stalls secret lookups.
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl ApiKeyStore for SlowStore {
    async fn insert_key(&self, key: &ApiKey) -> Result<(), StoreError> {
        self.inner.insert_key(key).await
    }

    async fn get_key(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError> {
        self.inner.get_key(id).await
    }

    async fn get_active_key_by_secret(&self, secret: &str) -> Result<Option<ApiKey>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_active_key_by_secret(secret).await
    }

    async fn update_key(
        &self,
        id: Uuid,
        patch: &ApiKeyPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError> {
        self.inner.update_key(id, patch, now).await
    }

    async fn set_expiry(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError> {
        self.inner.set_expiry(id, expires_at, now).await
    }

    async fn delete_key(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_key(id).await
    }

    async fn list_keys(
        &self,
        filter: &ListFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ApiKey>, i64), StoreError> {
        self.inner.list_keys(filter, limit, offset).await
    }

    async fn count_keys(&self) -> Result<i64, StoreError> {
        self.inner.count_keys().await
    }

    async fn record_usage(
        &self,
        id: Uuid,
        event: &NewUsageEvent,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.record_usage(id, event, now).await
    }

    async fn list_usage(&self, id: Uuid, limit: i64) -> Result<Vec<UsageEvent>, StoreError> {
        self.inner.list_usage(id, limit).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

mod deadlines {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_surfaces_timeout() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_secs(60),
        });
        let svc = ApiKeyService::from_config(store, &Config::for_tests())
            .unwrap()
            .with_query_timeout(Duration::from_millis(50));
        let key = issue(&svc, &["read"]).await;

        let err = svc.authorize_any(&key.secret, &["read"]).await.unwrap_err();
        assert!(matches!(err, KeyError::Timeout(_)));
        assert!(!err.is_unresolvable());

        // A storage failure is an error, never a silent "invalid".
        assert!(svc.validate_key(&key.secret).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_leaves_no_side_effects() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_secs(60),
        });
        let svc = ApiKeyService::from_config(store.clone(), &Config::for_tests()).unwrap();
        let key = issue(&svc, &["read"]).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            svc.authorize_any(&key.secret, &["read"]),
        )
        .await;
        assert!(abandoned.is_err());

        let stored = store.get_key(key.id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 0);
        assert!(stored.last_used_at.is_none());
    }
}
