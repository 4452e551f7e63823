//! Key providers for the sops client.
//!
//! A provider contributes the extra arguments and child-process environment
//! that bind sops to a particular key backend. Only age keys are supported.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

use age::secrecy::ExposeSecret;
use zeroize::Zeroizing;

use crate::core::constants::{AGE_KEY_ENV_VAR, AGE_KEY_FILE, CONFIG_DIR};
use crate::error::{Result, SopsError};

/// Supplies key material to sops invocations.
pub trait KeyProvider: Send + Sync {
    /// Extra arguments for `sops --encrypt`.
    fn encrypt_args(&self) -> Vec<String>;

    /// Extra arguments for `sops --decrypt`.
    fn decrypt_args(&self) -> Vec<String>;

    /// Environment variables to set on the sops child process.
    fn environment(&self) -> BTreeMap<String, String>;
}

/// Age-backed key provider.
///
/// The identity is read from the `SOPS_AGE_KEY` environment variable first
/// (CI), then from `age.key` in the user config directory (local dev). The
/// recipient public key is derived from the identity and injected on
/// encrypt; decrypt relies on the environment alone.
pub struct AgeProvider {
    private_key: Zeroizing<String>,
    public_key: String,
}

impl AgeProvider {
    /// Locates and validates the age identity.
    pub fn discover() -> Result<Self> {
        let (key, source_name) = read_identity()?;
        Self::from_key(key.trim(), &source_name)
    }

    /// Builds a provider from raw key material, validating the format.
    pub fn from_key(key: &str, source_name: &str) -> Result<Self> {
        let identity: age::x25519::Identity =
            key.parse().map_err(|reason: &str| SopsError::InvalidIdentity {
                source_name: source_name.to_string(),
                reason: reason.to_string(),
            })?;

        Ok(Self {
            public_key: identity.to_public().to_string(),
            private_key: Zeroizing::new(
                identity.to_string().expose_secret().to_string(),
            ),
        })
    }

    /// The recipient public key derived from the identity.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}

// Manual impl: the private key must never reach debug output.
impl fmt::Debug for AgeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgeProvider")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl KeyProvider for AgeProvider {
    fn encrypt_args(&self) -> Vec<String> {
        vec!["--age".to_string(), self.public_key.clone()]
    }

    fn decrypt_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            AGE_KEY_ENV_VAR.to_string(),
            self.private_key.to_string(),
        )])
    }
}

/// The path of the age key file inside the user config directory.
pub fn key_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(AGE_KEY_FILE)
}

fn read_identity() -> Result<(String, String)> {
    if let Ok(key) = env::var(AGE_KEY_ENV_VAR) {
        if !key.trim().is_empty() {
            return Ok((key, format!("{AGE_KEY_ENV_VAR} environment variable")));
        }
    }

    let path = key_file_path();
    match std::fs::read_to_string(&path) {
        Ok(key) if !key.trim().is_empty() => {
            Ok((key, path.display().to_string()))
        }
        _ => Err(SopsError::NoIdentity { path }.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        let identity = age::x25519::Identity::generate();
        identity.to_string().expose_secret().to_string()
    }

    #[test]
    fn from_key_rejects_garbage() {
        let err = AgeProvider::from_key("not-an-age-key", "test").unwrap_err();
        assert!(err.to_string().contains("invalid age key format"));
    }

    #[test]
    fn from_key_derives_recipient() {
        let provider = AgeProvider::from_key(&test_key(), "test").unwrap();
        assert!(provider.public_key().starts_with("age1"));

        let args = provider.encrypt_args();
        assert_eq!(args[0], "--age");
        assert_eq!(args[1], provider.public_key());
        assert!(provider.decrypt_args().is_empty());
    }

    #[test]
    fn environment_carries_identity() {
        let provider = AgeProvider::from_key(&test_key(), "test").unwrap();
        let env = provider.environment();
        assert!(env[AGE_KEY_ENV_VAR].starts_with("AGE-SECRET-KEY-1"));
    }

    #[test]
    fn debug_output_redacts_private_key() {
        let provider = AgeProvider::from_key(&test_key(), "test").unwrap();
        let rendered = format!("{provider:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("AGE-SECRET-KEY-1"));
    }
}
