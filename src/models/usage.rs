use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recorded access against an API key. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageEvent {
    pub id: i64,
    pub api_key_id: Uuid,
    pub endpoint: String,
    pub method: String,
    pub status: i32,
    pub source_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The caller-supplied part of a usage event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewUsageEvent {
    pub endpoint: String,
    pub method: String,
    pub status: i32,
    pub source_address: Option<String>,
    pub user_agent: Option<String>,
}

impl NewUsageEvent {
    pub fn new(endpoint: impl Into<String>, method: impl Into<String>, status: i32) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            status,
            source_address: None,
            user_agent: None,
        }
    }

    pub fn with_source_address(mut self, addr: impl Into<String>) -> Self {
        self.source_address = Some(addr.into());
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }
}
