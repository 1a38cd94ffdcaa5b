use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::ApiKeyStore;
use crate::errors::StoreError;
use crate::models::{ApiKey, ApiKeyPatch, ListFilter, NewUsageEvent, UsageEvent};

const KEY_COLUMNS: &str = "id, secret, name, description, owner_id, permissions, is_active, \
     expires_at, last_used_at, created_at, updated_at, usage_count, rate_limit, rate_limit_used";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for PgStore {
    async fn insert_key(&self, key: &ApiKey) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO api_keys (
                   id, secret, name, description, owner_id, permissions, is_active,
                   expires_at, created_at, updated_at, usage_count, rate_limit, rate_limit_used
               ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
        )
        .bind(key.id)
        .bind(&key.secret)
        .bind(&key.name)
        .bind(&key.description)
        .bind(&key.owner_id)
        .bind(Json(&key.permissions))
        .bind(key.is_active)
        .bind(key.expires_at)
        .bind(key.created_at)
        .bind(key.updated_at)
        .bind(key.usage_count)
        .bind(key.rate_limit)
        .bind(key.rate_limit_used)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_key(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {} FROM api_keys WHERE id = $1",
            KEY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ApiKey::from))
    }

    async fn get_active_key_by_secret(&self, secret: &str) -> Result<Option<ApiKey>, StoreError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {} FROM api_keys WHERE secret = $1 AND is_active = true",
            KEY_COLUMNS
        ))
        .bind(secret)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ApiKey::from))
    }

    async fn update_key(
        &self,
        id: Uuid,
        patch: &ApiKeyPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError> {
        let mut qb = update_query(id, patch, now);
        let row = qb
            .build_query_as::<ApiKeyRow>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(ApiKey::from))
    }

    async fn set_expiry(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "UPDATE api_keys SET expires_at = $2, updated_at = $3 WHERE id = $1 RETURNING {}",
            KEY_COLUMNS
        ))
        .bind(id)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ApiKey::from))
    }

    async fn delete_key(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_keys(
        &self,
        filter: &ListFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ApiKey>, i64), StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM api_keys", KEY_COLUMNS));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb
            .build_query_as::<ApiKeyRow>()
            .fetch_all(&self.pool)
            .await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM api_keys");
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        Ok((rows.into_iter().map(ApiKey::from).collect(), total))
    }

    async fn count_keys(&self) -> Result<i64, StoreError> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM api_keys")
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    async fn record_usage(
        &self,
        id: Uuid,
        event: &NewUsageEvent,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        // In-place increment: the row lock serializes concurrent recorders.
        let updated = sqlx::query(
            r#"UPDATE api_keys
               SET usage_count = usage_count + 1,
                   rate_limit_used = rate_limit_used + 1,
                   last_used_at = $2
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"INSERT INTO api_key_usage (api_key_id, endpoint, method, status, source_address, user_agent, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(id)
        .bind(&event.endpoint)
        .bind(&event.method)
        .bind(event.status)
        .bind(&event.source_address)
        .bind(&event.user_agent)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_usage(&self, id: Uuid, limit: i64) -> Result<Vec<UsageEvent>, StoreError> {
        let rows = sqlx::query_as::<_, UsageEvent>(
            r#"SELECT id, api_key_id, endpoint, method, status, source_address, user_agent, created_at
               FROM api_key_usage
               WHERE api_key_id = $1
               ORDER BY created_at DESC, id DESC
               LIMIT $2"#,
        )
        .bind(id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// `UPDATE ... RETURNING` with a SET clause for each populated patch field.
fn update_query(id: Uuid, patch: &ApiKeyPatch, now: DateTime<Utc>) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE api_keys SET updated_at = ");
    qb.push_bind(now);
    if let Some(name) = &patch.name {
        qb.push(", name = ").push_bind(name.clone());
    }
    if let Some(description) = &patch.description {
        qb.push(", description = ").push_bind(description.clone());
    }
    if let Some(permissions) = &patch.permissions {
        qb.push(", permissions = ").push_bind(Json(permissions.clone()));
    }
    if let Some(is_active) = patch.is_active {
        qb.push(", is_active = ").push_bind(is_active);
    }
    if let Some(rate_limit) = patch.rate_limit {
        qb.push(", rate_limit = ").push_bind(rate_limit);
    }
    qb.push(" WHERE id = ").push_bind(id);
    qb.push(" RETURNING ").push(KEY_COLUMNS);
    qb
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ListFilter) {
    qb.push(" WHERE 1=1");
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR COALESCE(description, '') ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(is_active);
    }
    if let Some(owner_id) = &filter.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner_id.clone());
    }
}

/// Escapes LIKE wildcards so search text matches literally.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// -- Output structs --

#[derive(Debug, sqlx::FromRow)]
struct ApiKeyRow {
    id: Uuid,
    secret: String,
    name: String,
    description: Option<String>,
    owner_id: Option<String>,
    permissions: Json<Vec<String>>,
    is_active: bool,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    usage_count: i64,
    rate_limit: Option<i32>,
    rate_limit_used: i64,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(row: ApiKeyRow) -> Self {
        ApiKey {
            id: row.id,
            secret: row.secret,
            name: row.name,
            description: row.description,
            owner_id: row.owner_id,
            permissions: row.permissions.0,
            is_active: row.is_active,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            usage_count: row.usage_count,
            rate_limit: row.rate_limit,
            rate_limit_used: row.rate_limit_used,
        }
    }
}
