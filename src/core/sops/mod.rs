//! Wrapper around the external `sops` binary.
//!
//! Files are encrypted and decrypted in place. The binary reports
//! idempotence conditions only through its diagnostic output, so the
//! client string-matches those and maps them to sentinel errors callers
//! can swallow.

pub mod provider;

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::core::exec::{Command, Runner};
use crate::core::fs::Fs;
use crate::error::{Error, Result, SopsError};

pub use provider::{AgeProvider, KeyProvider};

/// Name of the external binary all operations shell out to.
pub const SOPS_BINARY: &str = "sops";

const NOT_ENCRYPTED_MARKER: &str = "sops metadata not found";
const ALREADY_ENCRYPTED_MARKER: &str = "contains a top-level entry called 'sops'";
const EMPTY_DOCUMENT_MARKER: &str = "it must contain at least one document";

/// Executes sops operations with key material from a [`KeyProvider`].
pub struct Client<'a> {
    provider: &'a dyn KeyProvider,
    runner: &'a dyn Runner,
}

impl<'a> Client<'a> {
    pub fn new(provider: &'a dyn KeyProvider, runner: &'a dyn Runner) -> Self {
        Self { provider, runner }
    }

    /// Encrypts the file in place.
    ///
    /// Returns [`SopsError::AlreadyEncrypted`] when the file already holds
    /// sops metadata and [`SopsError::EmptyDocument`] for zero-byte files;
    /// both are idempotence sentinels.
    pub fn encrypt(&self, path: &Path) -> Result<()> {
        let mut args = vec!["--encrypt".to_string()];
        args.extend(self.provider.encrypt_args());
        args.push("--in-place".to_string());
        args.push(path.display().to_string());

        self.run_sops("encrypt", args)
    }

    /// Decrypts the file in place.
    ///
    /// Returns [`SopsError::NotEncrypted`] when the file holds no sops
    /// metadata; an idempotence sentinel.
    pub fn decrypt(&self, path: &Path) -> Result<()> {
        let mut args = vec!["--decrypt".to_string()];
        args.extend(self.provider.decrypt_args());
        args.push("--in-place".to_string());
        args.push(path.display().to_string());

        self.run_sops("decrypt", args)
    }

    /// Decrypts a file, parses its top-level keys into a string map and
    /// restores the encrypted form before returning.
    ///
    /// The file is re-encrypted only when the decrypt step actually ran;
    /// a file that was already plaintext is left plaintext.
    pub fn decrypt_file_to_map(
        &self,
        fs: &dyn Fs,
        path: &Path,
    ) -> Result<BTreeMap<String, String>> {
        let was_encrypted = match self.decrypt(path) {
            Ok(()) => true,
            Err(Error::Sops(SopsError::NotEncrypted)) => false,
            Err(e) => return Err(e),
        };

        let result = read_plaintext_map(fs, path);

        if was_encrypted {
            match self.encrypt(path) {
                Ok(()) | Err(Error::Sops(SopsError::AlreadyEncrypted)) => {}
                Err(e) if result.is_ok() => return Err(e),
                Err(e) => debug!(error = %e, "re-encrypt after failed read"),
            }
        }

        result
    }

    fn run_sops(&self, op: &'static str, args: Vec<String>) -> Result<()> {
        let cmd = Command::new(SOPS_BINARY, args).envs(self.provider.environment());
        debug!(op, "invoking sops");

        match self.runner.run(cmd) {
            Ok(_) => Ok(()),
            Err(e) => {
                let text = e.to_string();
                if text.contains(NOT_ENCRYPTED_MARKER) {
                    return Err(SopsError::NotEncrypted.into());
                }
                if text.contains(ALREADY_ENCRYPTED_MARKER) {
                    return Err(SopsError::AlreadyEncrypted.into());
                }
                if text.contains(EMPTY_DOCUMENT_MARKER) {
                    return Err(SopsError::EmptyDocument.into());
                }
                Err(SopsError::CommandFailed { op, output: text }.into())
            }
        }
    }
}

/// Detects sops metadata in file content without invoking the binary.
/// Used to avoid parsing ciphertext as YAML.
pub fn is_content_encrypted(content: &[u8]) -> bool {
    let text = String::from_utf8_lossy(content);
    text.contains("sops:") && (text.contains("ENC[") || text.contains("encrypted_regex"))
        || text.contains("sops_version")
        || text.contains("unencrypted_suffix")
}

fn read_plaintext_map(fs: &dyn Fs, path: &Path) -> Result<BTreeMap<String, String>> {
    let data = fs.read(path).map_err(|source| SopsError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_plaintext_map(&data, path)
}

/// Parses decrypted YAML into a flat string map. Scalar values are
/// stringified; nested structures are rejected by the YAML type.
fn parse_plaintext_map(data: &[u8], path: &Path) -> Result<BTreeMap<String, String>> {
    if data.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(BTreeMap::new());
    }

    let raw: BTreeMap<String, serde_yaml::Value> =
        serde_yaml::from_slice(data).map_err(|source| SopsError::ParseContent {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let s = match v {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Null => String::new(),
                other => serde_yaml::to_string(&other)
                    .unwrap_or_default()
                    .trim_end()
                    .to_string(),
            };
            (k, s)
        })
        .collect())
}
