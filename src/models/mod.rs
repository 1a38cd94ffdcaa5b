pub mod api_key;
pub mod permission;
pub mod usage;

pub use api_key::{
    mask_secret, ApiKey, ApiKeyPage, ApiKeyPatch, ApiKeySummary, Authorization,
    CreateApiKeyRequest, ListApiKeysParams, ListFilter, Pagination, UpdateApiKeyRequest,
};
pub use permission::{Permission, PermissionCatalog, PermissionSet};
pub use usage::{NewUsageEvent, UsageEvent};
