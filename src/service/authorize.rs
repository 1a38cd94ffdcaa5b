use chrono::Utc;

use super::ApiKeyService;
use crate::errors::KeyError;
use crate::models::{mask_secret, ApiKey, Authorization, PermissionSet};

impl ApiKeyService {
    /// Resolves a raw secret to an active, unexpired key.
    ///
    /// Missing and inactive keys are [`KeyError::NotFound`]; a past
    /// `expires_at` is [`KeyError::Expired`] regardless of `is_active`.
    pub async fn resolve_active(&self, secret: &str) -> Result<ApiKey, KeyError> {
        if secret.is_empty() {
            return Err(KeyError::NotFound);
        }

        let Some(key) = self
            .call("get_active_key_by_secret", self.store.get_active_key_by_secret(secret))
            .await?
        else {
            tracing::debug!(key = %mask_secret(secret), "api key not found or inactive");
            return Err(KeyError::NotFound);
        };

        if key.is_expired_at(Utc::now()) {
            tracing::debug!(key_id = %key.id, expires_at = ?key.expires_at, "api key has expired");
            return Err(KeyError::Expired);
        }

        Ok(key)
    }

    /// Authorized when the key holds at least one of `required`
    /// (or when `required` is empty).
    pub async fn authorize_any<S: AsRef<str>>(
        &self,
        secret: &str,
        required: &[S],
    ) -> Result<Authorization, KeyError> {
        let key = self.resolve_active(secret).await?;
        let authorized = PermissionSet::from_granted(&key.permissions).contains_any(required);
        log_decision("any", &key, authorized);
        Ok(Authorization { key, authorized })
    }

    /// Authorized when the key holds every permission in `required`.
    pub async fn authorize_all<S: AsRef<str>>(
        &self,
        secret: &str,
        required: &[S],
    ) -> Result<Authorization, KeyError> {
        let key = self.resolve_active(secret).await?;
        let authorized = PermissionSet::from_granted(&key.permissions).contains_all(required);
        log_decision("all", &key, authorized);
        Ok(Authorization { key, authorized })
    }

    /// `Ok(false)` for unknown, inactive or expired secrets; `Err` only when
    /// the store could not be consulted.
    pub async fn validate_key(&self, secret: &str) -> Result<bool, KeyError> {
        match self.resolve_active(secret).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_unresolvable() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn log_decision(mode: &'static str, key: &ApiKey, authorized: bool) {
    if authorized {
        tracing::debug!(key_id = %key.id, mode, "api key authorized");
    } else {
        tracing::info!(key_id = %key.id, mode, granted = ?key.permissions, "api key lacks required permissions");
    }
}
