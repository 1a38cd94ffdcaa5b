use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::ApiKeyService;
use crate::errors::{KeyError, StoreError};
use crate::models::permission::normalize;
use crate::models::{
    ApiKey, ApiKeyPatch, CreateApiKeyRequest, Permission, UpdateApiKeyRequest,
};

const NAME_MIN_CHARS: usize = 2;
const NAME_MAX_CHARS: usize = 100;
const DESCRIPTION_MAX_CHARS: usize = 500;
const EXPIRY_DAYS_RANGE: std::ops::RangeInclusive<i64> = 1..=3650;
const RATE_LIMIT_RANGE: std::ops::RangeInclusive<i32> = 1..=10_000;

/// Expiry for a new key: `now + expiry_days`, or `now + default` when unset.
pub fn initial_expiry(
    now: DateTime<Utc>,
    expiry_days: Option<i64>,
    default: chrono::Duration,
) -> Result<DateTime<Utc>, KeyError> {
    match expiry_days {
        Some(days) => add_days(now, days, "expiry_days"),
        None => add_default(now, default),
    }
}

/// Expiry after a renewal.
///
/// `extend_days <= 0` resets to `now + default`. Otherwise the extension
/// stacks on the later of `now` and the current expiry, so an already
/// expired key never inherits a past baseline. An extension past the
/// representable date range is a validation error.
pub fn renewed_expiry(
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    extend_days: i64,
    default: chrono::Duration,
) -> Result<DateTime<Utc>, KeyError> {
    if extend_days <= 0 {
        return add_default(now, default);
    }
    let base = match current {
        Some(exp) if exp > now => exp,
        _ => now,
    };
    add_days(base, extend_days, "extend_days")
}

fn add_days(base: DateTime<Utc>, days: i64, field: &str) -> Result<DateTime<Utc>, KeyError> {
    chrono::Duration::try_days(days)
        .and_then(|d| base.checked_add_signed(d))
        .ok_or_else(|| KeyError::validation(format!("{} is out of range", field)))
}

fn add_default(now: DateTime<Utc>, default: chrono::Duration) -> Result<DateTime<Utc>, KeyError> {
    now.checked_add_signed(default)
        .ok_or_else(|| KeyError::validation("default key expiry is out of range"))
}

impl ApiKeyService {
    /// Creates a key. The returned value carries the plaintext secret; it is
    /// the only time the secret leaves the service unmasked.
    pub async fn create(&self, req: CreateApiKeyRequest) -> Result<ApiKey, KeyError> {
        let name = validate_name(&req.name)?;
        let description = validate_description(req.description)?;
        let permissions = self.validate_permissions(&req.permissions)?;
        validate_expiry_days(req.expiry_days)?;
        validate_rate_limit(req.rate_limit)?;

        let now = Utc::now();
        let mut key = ApiKey {
            id: Uuid::new_v4(),
            secret: self.generator.generate()?,
            name,
            description,
            owner_id: req.owner_id.filter(|o| !o.trim().is_empty()),
            permissions,
            is_active: true,
            expires_at: Some(initial_expiry(now, req.expiry_days, self.default_expiry)?),
            last_used_at: None,
            created_at: now,
            updated_at: now,
            usage_count: 0,
            rate_limit: req.rate_limit,
            rate_limit_used: 0,
        };

        let inserted = self.call("insert_key", self.store.insert_key(&key)).await;
        match inserted {
            Ok(()) => {}
            Err(KeyError::Store(StoreError::Conflict(constraint))) => {
                tracing::warn!(constraint = %constraint, "api key collided on insert, regenerating once");
                key.id = Uuid::new_v4();
                key.secret = self.generator.generate()?;
                self.call("insert_key", self.store.insert_key(&key)).await?;
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            key_id = %key.id,
            name = %key.name,
            permissions = ?key.permissions,
            expires_at = ?key.expires_at,
            "api key created"
        );
        Ok(key)
    }

    /// Raw lookup by id. Inactive and expired keys are returned as-is.
    pub async fn get(&self, id: Uuid) -> Result<ApiKey, KeyError> {
        self.call("get_key", self.store.get_key(id))
            .await?
            .ok_or(KeyError::NotFound)
    }

    /// Applies only the supplied fields. An empty request returns the
    /// current state untouched.
    pub async fn update(&self, id: Uuid, req: UpdateApiKeyRequest) -> Result<ApiKey, KeyError> {
        if req.is_empty() {
            return self.get(id).await;
        }

        let patch = ApiKeyPatch {
            name: req.name.as_deref().map(validate_name).transpose()?,
            description: validate_description(req.description)?,
            permissions: req
                .permissions
                .as_deref()
                .map(|p| self.validate_permissions(p))
                .transpose()?,
            is_active: req.is_active,
            rate_limit: {
                validate_rate_limit(req.rate_limit)?;
                req.rate_limit
            },
        };

        let updated = self
            .call("update_key", self.store.update_key(id, &patch, Utc::now()))
            .await?
            .ok_or(KeyError::NotFound)?;

        tracing::info!(key_id = %id, patch = ?patch, "api key updated");
        Ok(updated)
    }

    /// Hard delete; usage events go with the key.
    pub async fn delete(&self, id: Uuid) -> Result<(), KeyError> {
        self.get(id).await?;
        if !self.call("delete_key", self.store.delete_key(id)).await? {
            return Err(KeyError::NotFound);
        }
        tracing::info!(key_id = %id, "api key deleted");
        Ok(())
    }

    /// Extends (or resets) a key's expiry. See [`renewed_expiry`].
    pub async fn renew(&self, id: Uuid, extend_days: i64) -> Result<ApiKey, KeyError> {
        let existing = self.get(id).await?;
        let now = Utc::now();
        let expires_at =
            renewed_expiry(existing.expires_at, now, extend_days, self.default_expiry)?;

        let renewed = self
            .call("set_expiry", self.store.set_expiry(id, expires_at, now))
            .await?
            .ok_or(KeyError::NotFound)?;

        tracing::info!(
            key_id = %id,
            extend_days,
            previous = ?existing.expires_at,
            expires_at = %expires_at,
            "api key renewed"
        );
        Ok(renewed)
    }

    pub async fn has_any_keys(&self) -> Result<bool, KeyError> {
        Ok(self.call("count_keys", self.store.count_keys()).await? > 0)
    }

    pub fn available_permissions(&self) -> &[Permission] {
        self.catalog.entries()
    }

    /// Normalizes and checks every permission against the catalog.
    /// Unknown names are rejected, never dropped.
    fn validate_permissions(&self, permissions: &[String]) -> Result<Vec<String>, KeyError> {
        if permissions.is_empty() {
            return Err(KeyError::validation("at least one permission is required"));
        }
        let mut normalized: Vec<String> = Vec::with_capacity(permissions.len());
        for raw in permissions {
            let perm = normalize(raw);
            if !self.catalog.contains(&perm) {
                tracing::warn!(permission = ?raw, "invalid permission attempted");
                return Err(KeyError::validation(format!("invalid permission: {:?}", raw)));
            }
            if !normalized.contains(&perm) {
                normalized.push(perm);
            }
        }
        Ok(normalized)
    }
}

fn validate_name(name: &str) -> Result<String, KeyError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(KeyError::validation("name is required"));
    }
    let chars = name.chars().count();
    if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&chars) {
        return Err(KeyError::validation(format!(
            "name must be between {} and {} characters",
            NAME_MIN_CHARS, NAME_MAX_CHARS
        )));
    }
    Ok(name.to_string())
}

fn validate_description(description: Option<String>) -> Result<Option<String>, KeyError> {
    match description {
        Some(d) if d.chars().count() > DESCRIPTION_MAX_CHARS => Err(KeyError::validation(format!(
            "description must be at most {} characters",
            DESCRIPTION_MAX_CHARS
        ))),
        other => Ok(other),
    }
}

fn validate_expiry_days(expiry_days: Option<i64>) -> Result<(), KeyError> {
    match expiry_days {
        Some(days) if !EXPIRY_DAYS_RANGE.contains(&days) => Err(KeyError::validation(format!(
            "expiry days must be between {} and {}",
            EXPIRY_DAYS_RANGE.start(),
            EXPIRY_DAYS_RANGE.end()
        ))),
        _ => Ok(()),
    }
}

fn validate_rate_limit(rate_limit: Option<i32>) -> Result<(), KeyError> {
    match rate_limit {
        Some(limit) if !RATE_LIMIT_RANGE.contains(&limit) => Err(KeyError::validation(format!(
            "rate limit must be between {} and {}",
            RATE_LIMIT_RANGE.start(),
            RATE_LIMIT_RANGE.end()
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_initial_expiry() {
        let default = chrono::Duration::days(365);
        assert_eq!(
            initial_expiry(t(1), Some(30), default).unwrap(),
            t(1) + chrono::Duration::days(30)
        );
        assert_eq!(initial_expiry(t(1), None, default).unwrap(), t(1) + default);
    }

    #[test]
    fn test_renew_stacks_on_future_expiry() {
        let default = chrono::Duration::days(365);
        let now = t(1);
        let current = t(20);
        assert_eq!(
            renewed_expiry(Some(current), now, 10, default).unwrap(),
            current + chrono::Duration::days(10)
        );
    }

    #[test]
    fn test_renew_of_expired_key_starts_from_now() {
        let default = chrono::Duration::days(365);
        let now = t(20);
        assert_eq!(
            renewed_expiry(Some(t(1)), now, 10, default).unwrap(),
            now + chrono::Duration::days(10)
        );
        assert_eq!(
            renewed_expiry(None, now, 3, default).unwrap(),
            now + chrono::Duration::days(3)
        );
    }

    #[test]
    fn test_renew_non_positive_resets_to_default() {
        let default = chrono::Duration::days(90);
        let now = t(5);
        assert_eq!(renewed_expiry(Some(t(28)), now, 0, default).unwrap(), now + default);
        assert_eq!(renewed_expiry(Some(t(28)), now, -7, default).unwrap(), now + default);
    }

    #[test]
    fn test_renew_past_representable_range_is_rejected() {
        let default = chrono::Duration::days(90);
        let now = t(5);
        for days in [i64::MAX, 1_000_000_000] {
            let err = renewed_expiry(Some(t(28)), now, days, default).unwrap_err();
            assert!(matches!(err, KeyError::Validation(_)), "{} days: {:?}", days, err);
            assert!(renewed_expiry(None, now, days, default).is_err());
        }
        assert!(initial_expiry(now, Some(i64::MAX), default).is_err());
        assert!(renewed_expiry(None, now, 0, chrono::Duration::days(1_000_000_000)).is_err());
    }

    #[test]
    fn test_validate_name_bounds() {
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name("a").is_err());
        assert_eq!(validate_name("  ok  ").unwrap(), "ok");
        assert!(validate_name(&"x".repeat(100)).is_ok());
        assert!(validate_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_ranges() {
        assert!(validate_expiry_days(None).is_ok());
        assert!(validate_expiry_days(Some(1)).is_ok());
        assert!(validate_expiry_days(Some(3650)).is_ok());
        assert!(validate_expiry_days(Some(0)).is_err());
        assert!(validate_expiry_days(Some(3651)).is_err());

        assert!(validate_rate_limit(None).is_ok());
        assert!(validate_rate_limit(Some(1)).is_ok());
        assert!(validate_rate_limit(Some(10_000)).is_ok());
        assert!(validate_rate_limit(Some(0)).is_err());
        assert!(validate_rate_limit(Some(10_001)).is_err());
    }

    #[test]
    fn test_validate_description_length() {
        assert!(validate_description(None).unwrap().is_none());
        assert!(validate_description(Some("x".repeat(500))).is_ok());
        assert!(validate_description(Some("x".repeat(501))).is_err());
    }
}
