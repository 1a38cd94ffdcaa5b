use super::ApiKeyService;
use crate::errors::KeyError;
use crate::models::{ApiKeyPage, ListApiKeysParams, ListFilter, Pagination};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

impl ApiKeyService {
    /// A filtered page of keys with masked secrets.
    pub async fn list(&self, params: ListApiKeysParams) -> Result<ApiKeyPage, KeyError> {
        let page = params.page.filter(|p| *p > 0).unwrap_or(1);
        let limit = params
            .limit
            .filter(|l| (1..=MAX_PAGE_SIZE).contains(l))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(limit);

        let filter = ListFilter {
            search: params
                .search
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            is_active: params.is_active,
            owner_id: params.owner_id.filter(|o| !o.is_empty()),
        };

        let (keys, total) = self
            .call("list_keys", self.store.list_keys(&filter, limit, offset))
            .await?;

        Ok(ApiKeyPage {
            api_keys: keys.iter().map(|k| k.summary()).collect(),
            pagination: Pagination::new(page, limit, total),
        })
    }
}
