//! Secrets lifecycle: scaffold, placeholder sync, encrypt/decrypt, read.
//!
//! Secret files live at `resources/secrets/<environment>.yaml`, one per
//! environment, governed by `resources/.sops.yaml`. The layout is a hard
//! boundary: callers go through [`Store`] and never build these paths
//! themselves.

pub mod resolve;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::constants::{SECRETS_DIR, SOPS_CONFIG_FILE, SOPS_PATH_REGEX};
use crate::core::fs::Fs;
use crate::core::manifest::{Definition, Env, EnvSource};
use crate::core::sops::{self, Client};
use crate::error::{Error, Result, SecretsError, SopsError};

/// Placeholder value prefix written by sync for keys awaiting real values.
pub const PLACEHOLDER_PREFIX: &str = "REPLACE_ME_";

/// Filesystem-backed secrets store bound to one working tree.
pub struct Store<'a> {
    fs: &'a dyn Fs,
    client: Client<'a>,
    base: PathBuf,
}

/// Outcome of syncing one secret file.
#[derive(Debug, Clone)]
pub struct FileSync {
    pub path: PathBuf,
    pub env: Env,
    pub added: usize,
    pub skipped: usize,
    pub was_missing: bool,
    pub was_encrypted: bool,
    pub added_keys: Vec<AddedSecret>,
    pub error: Option<String>,
}

/// A placeholder added during sync, with the apps that reference it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedSecret {
    pub key: String,
    pub apps: Vec<String>,
}

/// Aggregated sync outcome across every secret file.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub files: Vec<FileSync>,
}

impl SyncReport {
    pub fn total_added(&self) -> usize {
        self.files.iter().map(|f| f.added).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.files.iter().map(|f| f.skipped).sum()
    }

    pub fn missing_count(&self) -> usize {
        self.files.iter().filter(|f| f.was_missing).count()
    }

    pub fn encrypted_count(&self) -> usize {
        self.files.iter().filter(|f| f.was_encrypted).count()
    }

    /// Joined per-file failures, if any file errored.
    pub fn into_error(self) -> Option<SecretsError> {
        let errors: Vec<String> = self
            .files
            .iter()
            .filter_map(|f| {
                f.error
                    .as_ref()
                    .map(|e| format!("{}: {e}", f.path.display()))
            })
            .collect();
        if errors.is_empty() {
            None
        } else {
            Some(SecretsError::Batch { errors })
        }
    }
}

impl<'a> Store<'a> {
    pub fn new(fs: &'a dyn Fs, client: Client<'a>, base: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            client,
            base: base.into(),
        }
    }

    /// The secret file for one environment.
    pub fn file_path(&self, env: Env) -> PathBuf {
        self.base.join(SECRETS_DIR).join(env.secret_file_name())
    }

    /// The sops creation-rules config path.
    pub fn config_path(&self) -> PathBuf {
        self.base.join(SOPS_CONFIG_FILE)
    }

    /// Creates empty secret files and the sops config. Idempotent: existing
    /// files are left untouched.
    ///
    /// The per-environment files are created with zero bytes. A YAML
    /// comment would be encrypted on the first encrypt pass and leave a
    /// malformed artifact behind.
    pub fn scaffold(&self, public_key: &str) -> Result<Vec<PathBuf>> {
        self.fs.create_dir_all(&self.base.join(SECRETS_DIR))?;

        let mut created = Vec::new();
        for env in Env::ALL {
            let path = self.file_path(env);
            if !self.fs.exists(&path) {
                self.fs.write(&path, b"")?;
                created.push(path);
            }
        }

        let config = self.config_path();
        if !self.fs.exists(&config) {
            let rules = format!(
                "creation_rules:\n  - path_regex: {SOPS_PATH_REGEX}\n    age: {public_key}\n"
            );
            self.fs.write(&config, rules.as_bytes())?;
            created.push(config);
        }

        Ok(created)
    }

    /// Adds placeholders for every sops-sourced key the manifest declares.
    ///
    /// Files are never created here and encrypted files are never touched;
    /// both conditions are reported instead. Existing keys are left alone.
    /// New keys are appended to the file's original bytes.
    pub fn sync(&self, def: &Definition) -> SyncReport {
        let refs = collect_sops_references(def);

        let mut report = SyncReport::default();
        for env in Env::ALL {
            let Some(keys) = refs.get(&env) else {
                continue;
            };
            report.files.push(self.sync_file(env, keys));
        }
        report
    }

    fn sync_file(&self, env: Env, keys: &BTreeMap<String, Vec<String>>) -> FileSync {
        let path = self.file_path(env);
        let mut result = FileSync {
            path: path.clone(),
            env,
            added: 0,
            skipped: 0,
            was_missing: false,
            was_encrypted: false,
            added_keys: Vec::new(),
            error: None,
        };

        if !self.fs.exists(&path) {
            result.was_missing = true;
            return result;
        }

        let content = match self.fs.read(&path) {
            Ok(c) => c,
            Err(e) => {
                result.error = Some(format!("reading file: {e}"));
                return result;
            }
        };

        if sops::is_content_encrypted(&content) {
            result.was_encrypted = true;
            return result;
        }

        let existing = match parse_top_level_keys(&content) {
            Ok(keys) => keys,
            Err(e) => {
                result.error = Some(format!("parsing YAML: {e}"));
                return result;
            }
        };

        let mut additions = String::new();
        for (key, apps) in keys {
            if existing.contains(key) {
                result.skipped += 1;
                continue;
            }
            result.added += 1;
            result.added_keys.push(AddedSecret {
                key: key.clone(),
                apps: apps.clone(),
            });
            additions.push_str(&format!(
                "{key}: \"{PLACEHOLDER_PREFIX}{}\"\n",
                key.to_uppercase()
            ));
        }

        if result.added > 0 {
            let mut updated = content;
            updated.extend_from_slice(additions.as_bytes());
            if let Err(e) = self.fs.write(&path, &updated) {
                result.error = Some(format!("writing file: {e}"));
            }
        }

        result
    }

    /// Encrypts every existing secret file, swallowing the already-encrypted
    /// and empty-document sentinels.
    pub fn encrypt_all(&self) -> Result<()> {
        self.for_each_file(|client, path| match client.encrypt(path) {
            Ok(())
            | Err(Error::Sops(SopsError::AlreadyEncrypted))
            | Err(Error::Sops(SopsError::EmptyDocument)) => Ok(()),
            Err(e) => Err(e),
        })
    }

    /// Decrypts every existing secret file, swallowing the not-encrypted
    /// sentinel.
    pub fn decrypt_all(&self) -> Result<()> {
        self.for_each_file(|client, path| match client.decrypt(path) {
            Ok(()) | Err(Error::Sops(SopsError::NotEncrypted)) => Ok(()),
            Err(e) => Err(e),
        })
    }

    fn for_each_file(
        &self,
        op: impl Fn(&Client<'a>, &Path) -> Result<()>,
    ) -> Result<()> {
        let mut errors = Vec::new();
        for env in Env::ALL {
            let path = self.file_path(env);
            if !self.fs.exists(&path) {
                debug!(path = %path.display(), "secret file absent, skipping");
                continue;
            }
            if let Err(e) = op(&self.client, &path) {
                errors.push(format!("{}: {e}", path.display()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SecretsError::Batch { errors }.into())
        }
    }

    /// The full decrypted key/value map for one environment. The on-disk
    /// file ends encrypted if it began encrypted.
    pub fn read_map(&self, env: Env) -> Result<BTreeMap<String, String>> {
        let path = self.file_path(env);
        if !self.fs.exists(&path) {
            return Err(SecretsError::FileMissing { path }.into());
        }
        self.client.decrypt_file_to_map(self.fs, &path)
    }

    /// Reads a single secret value, leaving the file encrypted.
    pub fn get(&self, env: Env, key: &str) -> Result<String> {
        let map = self.read_map(env)?;
        map.get(key).cloned().ok_or_else(|| {
            SecretsError::KeyNotFound {
                key: key.to_string(),
                env: env.to_string(),
            }
            .into()
        })
    }
}

/// The union of sops-sourced keys per environment, each with the apps that
/// reference it. Shared variables are attributed to `shared`.
fn collect_sops_references(def: &Definition) -> BTreeMap<Env, BTreeMap<String, Vec<String>>> {
    let mut refs: BTreeMap<Env, BTreeMap<String, Vec<String>>> = BTreeMap::new();

    let mut record = |env: Env, key: &str, owner: &str| {
        let apps = refs.entry(env).or_default().entry(key.to_string()).or_default();
        if !apps.iter().any(|a| a == owner) {
            apps.push(owner.to_string());
        }
    };

    def.shared.env.walk(|env, key, value| {
        if value.source == EnvSource::Sops {
            record(env, key, "shared");
        }
    });
    for app in &def.apps {
        app.env.walk(|env, key, value| {
            if value.source == EnvSource::Sops {
                record(env, key, &app.name);
            }
        });
    }

    refs
}

/// Top-level YAML keys, tolerating an empty document.
fn parse_top_level_keys(content: &[u8]) -> std::result::Result<Vec<String>, serde_yaml::Error> {
    if content.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    let map: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_slice(content)?;
    Ok(map.into_keys().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exec::MemRunner;
    use crate::core::fs::MemFs;
    use crate::core::sops::KeyProvider;

    struct FakeProvider;

    impl KeyProvider for FakeProvider {
        fn encrypt_args(&self) -> Vec<String> {
            vec!["--age".to_string(), "age1test".to_string()]
        }

        fn decrypt_args(&self) -> Vec<String> {
            Vec::new()
        }

        fn environment(&self) -> BTreeMap<String, String> {
            BTreeMap::new()
        }
    }

    fn manifest_with_sops_keys() -> Definition {
        Definition::parse(
            br#"{
                "project": {"name": "acme"},
                "shared": {
                    "env": {
                        "default": {
                            "SENTRY_DSN": {"source": "sops", "value": "SENTRY_DSN"}
                        }
                    }
                },
                "apps": [
                    {
                        "name": "cms",
                        "type": "payload",
                        "path": "apps/cms",
                        "env": {
                            "production": {
                                "PAYLOAD_SECRET": {"source": "sops", "value": "PAYLOAD_SECRET"},
                                "PORT": {"source": "value", "value": "3000"}
                            }
                        }
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    fn store<'a>(fs: &'a MemFs, runner: &'a MemRunner) -> Store<'a> {
        static PROVIDER: FakeProvider = FakeProvider;
        Store::new(fs, Client::new(&PROVIDER, runner), "")
    }

    #[test]
    fn scaffold_creates_empty_files_and_config() {
        let fs = MemFs::new();
        let runner = MemRunner::new();
        let s = store(&fs, &runner);

        let created = s.scaffold("age1publickey").unwrap();
        assert_eq!(created.len(), 4);

        for env in Env::ALL {
            let content = fs.read(&s.file_path(env)).unwrap();
            assert!(content.is_empty());
        }

        let config = String::from_utf8(fs.read(&s.config_path()).unwrap()).unwrap();
        assert!(config.contains("creation_rules"));
        assert!(config.contains(r"secrets/.*\.yaml$"));
        assert!(config.contains("age1publickey"));
    }

    #[test]
    fn scaffold_is_idempotent() {
        let fs = MemFs::new().with_file("resources/secrets/production.yaml", "KEY: kept\n");
        let runner = MemRunner::new();
        let s = store(&fs, &runner);

        s.scaffold("age1publickey").unwrap();
        let content = fs.read(&s.file_path(Env::Production)).unwrap();
        assert_eq!(content, b"KEY: kept\n");

        let second = s.scaffold("age1publickey").unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn sync_adds_placeholders_for_missing_keys() {
        let fs = MemFs::new()
            .with_file("resources/secrets/development.yaml", "")
            .with_file("resources/secrets/staging.yaml", "")
            .with_file(
                "resources/secrets/production.yaml",
                "PAYLOAD_SECRET: already-set\n",
            );
        let runner = MemRunner::new();
        let s = store(&fs, &runner);

        let report = s.sync(&manifest_with_sops_keys());

        // SENTRY_DSN lands in all three files; PAYLOAD_SECRET already
        // exists in production.
        assert_eq!(report.total_added(), 3);
        assert_eq!(report.total_skipped(), 1);

        let prod = String::from_utf8(fs.read(&s.file_path(Env::Production)).unwrap()).unwrap();
        assert!(prod.starts_with("PAYLOAD_SECRET: already-set\n"));
        assert!(prod.contains("SENTRY_DSN: \"REPLACE_ME_SENTRY_DSN\"\n"));

        let dev = String::from_utf8(fs.read(&s.file_path(Env::Development)).unwrap()).unwrap();
        assert_eq!(dev, "SENTRY_DSN: \"REPLACE_ME_SENTRY_DSN\"\n");
    }

    #[test]
    fn sync_reports_missing_files_without_creating() {
        let fs = MemFs::new();
        let runner = MemRunner::new();
        let s = store(&fs, &runner);

        let report = s.sync(&manifest_with_sops_keys());
        assert_eq!(report.missing_count(), 3);
        assert_eq!(report.total_added(), 0);
        assert!(!fs.exists(&s.file_path(Env::Production)));
    }

    #[test]
    fn sync_skips_encrypted_files() {
        let fs = MemFs::new().with_file(
            "resources/secrets/production.yaml",
            "PAYLOAD_SECRET: ENC[AES256_GCM,data:abc]\nsops:\n  age: []\n",
        );
        let runner = MemRunner::new();
        let s = store(&fs, &runner);

        let report = s.sync(&manifest_with_sops_keys());
        assert_eq!(report.encrypted_count(), 1);

        let content = fs.read(&s.file_path(Env::Production)).unwrap();
        assert!(String::from_utf8_lossy(&content).contains("ENC[AES256_GCM"));
        assert!(!String::from_utf8_lossy(&content).contains("REPLACE_ME"));
    }

    #[test]
    fn sync_attributes_keys_to_apps() {
        let fs = MemFs::new()
            .with_file("resources/secrets/development.yaml", "")
            .with_file("resources/secrets/staging.yaml", "")
            .with_file("resources/secrets/production.yaml", "");
        let runner = MemRunner::new();
        let s = store(&fs, &runner);

        let report = s.sync(&manifest_with_sops_keys());
        let prod = report
            .files
            .iter()
            .find(|f| f.env == Env::Production)
            .unwrap();

        let payload = prod
            .added_keys
            .iter()
            .find(|a| a.key == "PAYLOAD_SECRET")
            .unwrap();
        assert_eq!(payload.apps, vec!["cms"]);

        let sentry = prod.added_keys.iter().find(|a| a.key == "SENTRY_DSN").unwrap();
        assert_eq!(sentry.apps, vec!["shared"]);
    }

    #[test]
    fn sync_reports_parse_errors_per_file() {
        let fs = MemFs::new().with_file(
            "resources/secrets/production.yaml",
            "key: value\nunbalanced",
        );
        let runner = MemRunner::new();
        let s = store(&fs, &runner);

        let report = s.sync(&manifest_with_sops_keys());
        let err = report.into_error().unwrap();
        assert!(err.to_string().contains("parsing YAML"));
    }

    #[test]
    fn encrypt_all_swallows_sentinels() {
        let fs = MemFs::new()
            .with_file("resources/secrets/development.yaml", "")
            .with_file("resources/secrets/production.yaml", "KEY: v\n");
        let runner = MemRunner::new();
        runner.stub_err(
            "sops --encrypt --age age1test --in-place resources/secrets/development.yaml",
            "it must contain at least one document",
        );
        runner.stub("sops --encrypt", "");
        let s = store(&fs, &runner);

        s.encrypt_all().unwrap();
        // Staging file doesn't exist so only two invocations happen.
        assert_eq!(runner.cmd_lines().len(), 2);
    }

    #[test]
    fn decrypt_all_aggregates_real_failures() {
        let fs = MemFs::new()
            .with_file("resources/secrets/development.yaml", "")
            .with_file("resources/secrets/production.yaml", "");
        let runner = MemRunner::new();
        runner.stub_err("sops --decrypt", "keyservice unavailable");
        let s = store(&fs, &runner);

        let err = s.decrypt_all().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("development.yaml"));
        assert!(text.contains("production.yaml"));
        assert!(text.contains("keyservice unavailable"));
    }

    #[test]
    fn get_returns_value_and_reencrypts() {
        let fs = MemFs::new().with_file("resources/secrets/production.yaml", "API_KEY: s3cret\n");
        let runner = MemRunner::new();
        runner.stub("sops --decrypt", "");
        runner.stub("sops --encrypt", "");
        let s = store(&fs, &runner);

        assert_eq!(s.get(Env::Production, "API_KEY").unwrap(), "s3cret");

        let lines = runner.cmd_lines();
        assert!(lines[0].starts_with("sops --decrypt"));
        assert!(lines[1].starts_with("sops --encrypt"));
    }

    #[test]
    fn get_missing_key_names_env() {
        let fs = MemFs::new().with_file("resources/secrets/production.yaml", "KEY: \"1\"\n");
        let runner = MemRunner::new();
        runner.stub("sops --decrypt", "");
        runner.stub("sops --encrypt", "");
        let s = store(&fs, &runner);

        let err = s.get(Env::Production, "WRONG").unwrap_err();
        assert_eq!(
            err.to_string(),
            "key WRONG not found for env: production"
        );
    }

    #[test]
    fn get_missing_file_is_reported() {
        let fs = MemFs::new();
        let runner = MemRunner::new();
        let s = store(&fs, &runner);

        let err = s.get(Env::Development, "KEY").unwrap_err();
        assert!(err.to_string().contains("secret file missing"));
    }
}
