use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored API key, secret included.
///
/// Only the create path hands this type to callers; everything that lists
/// or echoes keys back goes through [`ApiKeySummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    #[serde(rename = "key")]
    pub secret: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Option<String>,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub usage_count: i64,
    pub rate_limit: Option<i32>,
    pub rate_limit_used: i64,
}

impl ApiKey {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp < now)
    }

    /// Presentation copy with the secret masked.
    pub fn summary(&self) -> ApiKeySummary {
        ApiKeySummary {
            id: self.id,
            key: mask_secret(&self.secret),
            name: self.name.clone(),
            description: self.description.clone(),
            owner_id: self.owner_id.clone(),
            permissions: self.permissions.clone(),
            is_active: self.is_active,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            usage_count: self.usage_count,
            rate_limit: self.rate_limit,
            rate_limit_used: self.rate_limit_used,
        }
    }
}

impl From<ApiKey> for ApiKeySummary {
    fn from(key: ApiKey) -> Self {
        key.summary()
    }
}

/// An API key as shown in listings: the secret is masked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeySummary {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Option<String>,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub usage_count: i64,
    pub rate_limit: Option<i32>,
    pub rate_limit_used: i64,
}

/// Masks a secret for display: first 8 and last 4 characters around `...`.
/// Secrets of 12 characters or fewer are returned unchanged.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return secret.to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Option<String>,
    pub permissions: Vec<String>,
    pub expiry_days: Option<i64>,
    pub rate_limit: Option<i32>,
}

/// Partial update: only the fields that are `Some` are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApiKeyRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub rate_limit: Option<i32>,
}

impl UpdateApiKeyRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.permissions.is_none()
            && self.is_active.is_none()
            && self.rate_limit.is_none()
    }
}

/// A validated, normalized partial update handed to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiKeyPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub rate_limit: Option<i32>,
}

impl ApiKeyPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.permissions.is_none()
            && self.is_active.is_none()
            && self.rate_limit.is_none()
    }

    /// Applies the populated fields to `key`.
    pub fn apply_to(&self, key: &mut ApiKey, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            key.name = name.clone();
        }
        if let Some(description) = &self.description {
            key.description = Some(description.clone());
        }
        if let Some(permissions) = &self.permissions {
            key.permissions = permissions.clone();
        }
        if let Some(is_active) = self.is_active {
            key.is_active = is_active;
        }
        if let Some(rate_limit) = self.rate_limit {
            key.rate_limit = Some(rate_limit);
        }
        key.updated_at = now;
    }
}

/// Query parameters accepted by the listing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListApiKeysParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub owner_id: Option<String>,
}

/// Store-level filter derived from [`ListApiKeysParams`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub owner_id: Option<String>,
}

impl ListFilter {
    pub fn matches(&self, key: &ApiKey) -> bool {
        if let Some(active) = self.is_active {
            if key.is_active != active {
                return false;
            }
        }
        if let Some(owner) = &self.owner_id {
            if key.owner_id.as_deref() != Some(owner.as_str()) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let in_name = key.name.to_lowercase().contains(&needle);
            let in_description = key
                .description
                .as_deref()
                .map(|d| d.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !in_name && !in_description {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyPage {
    pub api_keys: Vec<ApiKeySummary>,
    pub pagination: Pagination,
}

/// Outcome of a permission check against a resolvable key.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub key: ApiKey,
    pub authorized: bool,
}
