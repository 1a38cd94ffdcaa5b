use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::models::PermissionCatalog;

/// Longest accepted default key lifetime (3650 days).
pub const MAX_KEY_EXPIRY: Duration = Duration::from_secs(3650 * 86_400);

/// Settings for minting API keys.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyConfig {
    /// Prefix prepended to every generated secret (e.g. `ak_`).
    pub prefix: String,
    /// Number of random bytes drawn per secret (hex doubles it).
    pub length: usize,
    /// Lifetime applied when a key is created without `expiry_days`
    /// and when it is renewed with `extend_days <= 0`.
    pub default_expiry: Duration,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            prefix: "ak_".into(),
            length: 32,
            default_expiry: Duration::from_secs(365 * 86_400),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub admin_key: Option<String>,
    /// Accepted on `POST /api-keys` only while no key exists yet.
    pub bootstrap_token: Option<String>,
    pub keys: KeyConfig,
    /// Deadline applied to every store call.
    pub query_timeout: Duration,
    /// Overrides the built-in permission catalog when set.
    pub permissions: Option<Vec<String>>,
}

impl Config {
    /// Minimal configuration for tests and embedded use.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            database_url: String::new(),
            max_connections: 1,
            admin_key: Some("test-admin-key".into()),
            bootstrap_token: Some("test-bootstrap-token".into()),
            keys: KeyConfig {
                prefix: "ak_".into(),
                length: 16,
                default_expiry: Duration::from_secs(86_400),
            },
            query_timeout: Duration::from_secs(5),
            permissions: None,
        }
    }

    /// The configured permission override, or the built-in catalog.
    pub fn permission_catalog(&self) -> PermissionCatalog {
        match &self.permissions {
            Some(names) if !names.is_empty() => PermissionCatalog::from_names(names),
            _ => PermissionCatalog::builtin(),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let admin_key = std::env::var("KEYGATE_ADMIN_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());

    if admin_key.is_none() {
        let env_mode = std::env::var("KEYGATE_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "KEYGATE_ADMIN_KEY is not set. \
                 Set an admin key before running in production."
            );
        }
        eprintln!("⚠️  KEYGATE_ADMIN_KEY is not set; the management API only accepts admin-scoped API keys.");
    }

    let length = match std::env::var("KEYGATE_KEY_LENGTH") {
        Ok(v) => v.parse::<usize>().context("invalid KEYGATE_KEY_LENGTH")?,
        Err(_) => 32,
    };
    if !(8..=64).contains(&length) {
        anyhow::bail!("KEYGATE_KEY_LENGTH must be between 8 and 64 bytes, got {}", length);
    }

    let default_expiry = match std::env::var("KEYGATE_KEY_EXPIRY") {
        Ok(v) => {
            let parsed = parse_duration(&v)
                .with_context(|| format!("invalid KEYGATE_KEY_EXPIRY '{}'", v))?;
            check_key_expiry(parsed)?
        }
        Err(_) => Duration::from_secs(365 * 86_400),
    };

    let query_timeout = match std::env::var("KEYGATE_QUERY_TIMEOUT") {
        Ok(v) => {
            parse_duration(&v).with_context(|| format!("invalid KEYGATE_QUERY_TIMEOUT '{}'", v))?
        }
        Err(_) => Duration::from_secs(5),
    };

    let permissions = std::env::var("KEYGATE_PERMISSIONS").ok().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect::<Vec<_>>()
    });

    Ok(Config {
        port: std::env::var("KEYGATE_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/keygate".into()),
        max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        admin_key,
        bootstrap_token: std::env::var("KEYGATE_BOOTSTRAP_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty()),
        keys: KeyConfig {
            prefix: std::env::var("KEYGATE_KEY_PREFIX").unwrap_or_else(|_| "ak_".into()),
            length,
            default_expiry,
        },
        query_timeout,
        permissions,
    })
}

fn check_key_expiry(expiry: Duration) -> anyhow::Result<Duration> {
    if expiry > MAX_KEY_EXPIRY {
        anyhow::bail!(
            "KEYGATE_KEY_EXPIRY must be at most {} days, got {}s",
            MAX_KEY_EXPIRY.as_secs() / 86_400,
            expiry.as_secs()
        );
    }
    Ok(expiry)
}

/// Parses `"90s"`, `"15m"`, `"24h"`, `"365d"`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, multiplier) = if let Some(val) = s.strip_suffix('s') {
        (val, 1)
    } else if let Some(val) = s.strip_suffix('m') {
        (val, 60)
    } else if let Some(val) = s.strip_suffix('h') {
        (val, 3600)
    } else if let Some(val) = s.strip_suffix('d') {
        (val, 86_400)
    } else {
        (s, 1)
    };
    let value: u64 = digits.trim().parse().ok()?;
    if value == 0 {
        return None;
    }
    value.checked_mul(multiplier).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1s"), Some(Duration::from_secs(1)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("365d"), Some(Duration::from_secs(365 * 86_400)));
        assert_eq!(parse_duration("  30  "), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("0d"), None);
        assert_eq!(parse_duration("garbage"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_default_key_config() {
        let cfg = KeyConfig::default();
        assert_eq!(cfg.prefix, "ak_");
        assert_eq!(cfg.length, 32);
        assert_eq!(cfg.default_expiry, Duration::from_secs(365 * 86_400));
    }

    #[test]
    fn test_key_expiry_is_capped() {
        assert_eq!(check_key_expiry(MAX_KEY_EXPIRY).unwrap(), MAX_KEY_EXPIRY);
        assert!(check_key_expiry(Duration::from_secs(3651 * 86_400)).is_err());
        let huge = parse_duration("100000000000d").unwrap();
        assert!(check_key_expiry(huge).is_err());
    }

    #[test]
    fn test_permission_catalog_override() {
        let mut cfg = Config::for_tests();
        assert_eq!(cfg.permission_catalog().len(), PermissionCatalog::builtin().len());

        cfg.permissions = Some(vec!["recipes:read".into(), "recipes:write".into()]);
        let catalog = cfg.permission_catalog();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("recipes:read"));
        assert!(!catalog.contains("admin"));

        cfg.permissions = Some(Vec::new());
        assert_eq!(cfg.permission_catalog().len(), PermissionCatalog::builtin().len());
    }
}
