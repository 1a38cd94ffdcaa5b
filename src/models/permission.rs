//! Permission catalog and case-insensitive permission sets.
//!
//! Permissions are `resource:action` strings (e.g. `recipes:read`). The
//! catalog is the closed universe a key may be granted; it is injected into
//! the service so deployments and tests can vary it.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// A grantable permission with display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub name: String,
    pub description: String,
    pub category: String,
}

impl Permission {
    fn new(name: &str, description: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
        }
    }
}

static BUILTIN_PERMISSIONS: Lazy<Vec<Permission>> = Lazy::new(|| {
    vec![
        Permission::new("read", "Read access to resources", "basic"),
        Permission::new("write", "Write access to resources", "basic"),
        Permission::new("delete", "Delete access to resources", "basic"),
        Permission::new("admin", "Administrative access", "advanced"),
        Permission::new("admin:all", "Full administrative access", "advanced"),
        Permission::new("users:read", "Read user data", "users"),
        Permission::new("users:write", "Modify user data", "users"),
        Permission::new("meals:read", "Read meal data", "meals"),
        Permission::new("meals:write", "Modify meal data", "meals"),
        Permission::new("workouts:read", "Read workout data", "workouts"),
        Permission::new("workouts:write", "Modify workout data", "workouts"),
        Permission::new("health:read", "Read health data", "health"),
        Permission::new("health:write", "Modify health data", "health"),
        Permission::new("recipes:read", "Read recipe data", "recipes"),
        Permission::new("recipes:write", "Modify recipe data", "recipes"),
        Permission::new("nutrition:generate", "Generate nutrition plans", "generation"),
        Permission::new("workout:generate", "Generate workout plans", "generation"),
        Permission::new("health:generate", "Generate health plans", "generation"),
        Permission::new("recipe:generate", "Generate recipes", "generation"),
    ]
});

/// Permissions that unlock the management API when held by an API key.
pub const ADMIN_PERMISSIONS: [&str; 2] = ["admin", "admin:all"];

/// Lower-cases and trims a permission name.
pub fn normalize(permission: &str) -> String {
    permission.trim().to_lowercase()
}

/// The closed set of permissions keys may be granted.
#[derive(Debug, Clone)]
pub struct PermissionCatalog {
    entries: Vec<Permission>,
    index: HashMap<String, usize>,
}

impl PermissionCatalog {
    pub fn new(entries: Vec<Permission>) -> Self {
        let mut deduped: Vec<Permission> = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());
        for mut entry in entries {
            entry.name = normalize(&entry.name);
            if entry.name.is_empty() || index.contains_key(&entry.name) {
                continue;
            }
            index.insert(entry.name.clone(), deduped.len());
            deduped.push(entry);
        }
        Self {
            entries: deduped,
            index,
        }
    }

    /// The catalog shipped with the service.
    pub fn builtin() -> Self {
        Self::new(BUILTIN_PERMISSIONS.clone())
    }

    /// Builds a catalog from bare names. Names that also exist in the
    /// built-in catalog keep their description and category.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = names
            .into_iter()
            .map(|n| {
                let name = normalize(n.as_ref());
                BUILTIN_PERMISSIONS
                    .iter()
                    .find(|p| p.name == name)
                    .cloned()
                    .unwrap_or_else(|| Permission::new(&name, "", "custom"))
            })
            .collect();
        Self::new(entries)
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.index.contains_key(&normalize(permission))
    }

    pub fn entries(&self) -> &[Permission] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PermissionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// A granted permission list, normalized once for O(1) membership checks.
///
/// Both ANY and ALL matching go through this type so they always agree on
/// normalization.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    granted: HashSet<String>,
}

impl PermissionSet {
    pub fn from_granted<I, S>(granted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            granted: granted.into_iter().map(|p| normalize(p.as_ref())).collect(),
        }
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.granted.contains(&normalize(permission))
    }

    /// True when `required` is empty or shares at least one permission.
    pub fn contains_any<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.is_empty() || required.iter().any(|r| self.contains(r.as_ref()))
    }

    /// True when every permission in `required` is granted.
    pub fn contains_all<S: AsRef<str>>(&self, required: &[S]) -> bool {
        if required.is_empty() {
            return true;
        }
        if self.granted.is_empty() {
            return false;
        }
        required.iter().all(|r| self.contains(r.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.granted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }
}
