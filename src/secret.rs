//! Secret generation for API keys.
//!
//! Secrets are `<prefix><hex(random bytes)>`, drawn from the OS CSPRNG.
//! Uniqueness is enforced by the store's unique constraint, not here.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::config::KeyConfig;
use crate::errors::KeyError;

#[derive(Debug, Clone)]
pub struct SecretGenerator {
    prefix: String,
    length: usize,
}

impl SecretGenerator {
    pub fn new(prefix: impl Into<String>, length: usize) -> Self {
        Self {
            prefix: prefix.into(),
            length,
        }
    }

    pub fn from_config(cfg: &KeyConfig) -> Self {
        Self::new(cfg.prefix.clone(), cfg.length)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Generates a secret with the configured byte length.
    pub fn generate(&self) -> Result<String, KeyError> {
        generate_secret(&self.prefix, self.length)
    }
}

/// Draws `length` random bytes and hex-encodes them behind `prefix`.
/// Fails only if the entropy source does.
pub fn generate_secret(prefix: &str, length: usize) -> Result<String, KeyError> {
    let mut bytes = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| KeyError::Generation(e.to_string()))?;

    let mut secret = String::with_capacity(prefix.len() + length * 2);
    secret.push_str(prefix);
    secret.push_str(&hex::encode(&bytes));
    bytes.zeroize();
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_secret_format() {
        let generator = SecretGenerator::new("ak_", 16);
        let secret = generator.generate().unwrap();
        assert!(secret.starts_with("ak_"));
        assert_eq!(secret.len(), 3 + 32);
        assert!(secret[3..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_secrets_are_unique() {
        let generator = SecretGenerator::new("ak_", 16);
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generator.generate().unwrap()), "duplicate secret generated");
        }
    }

    #[test]
    fn test_custom_prefix_and_length() {
        let secret = generate_secret("dh_", 32).unwrap();
        assert!(secret.starts_with("dh_"));
        assert_eq!(secret.len(), 3 + 64);
    }
}
