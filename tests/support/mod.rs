//! Test support utilities for shipkit integration tests.
//!
//! Provides an isolated project directory per test plus manifest fixtures.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use age::secrecy::ExposeSecret;
use assert_cmd::Command;
use tempfile::TempDir;

/// Manifest with only literal env values; resolvable without any key
/// material or external binaries.
pub const VALUE_ONLY_MANIFEST: &str = r#"{
    "project": {"name": "acme"},
    "shared": {
        "env": {
            "default": {"LOG_LEVEL": {"source": "value", "value": "info"}}
        }
    },
    "apps": [
        {
            "name": "web",
            "type": "sveltekit",
            "path": "apps/web",
            "env": {
                "default": {"PORT": {"source": "value", "value": "3000"}},
                "production": {
                    "PUBLIC_URL": {"source": "value", "value": "https://example.com"}
                }
            }
        }
    ]
}"#;

/// Manifest with a resource-sourced variable fed by terraform outputs.
pub const RESOURCE_MANIFEST: &str = r#"{
    "project": {"name": "acme"},
    "resources": [
        {"name": "db", "type": "postgres", "provider": "digitalocean"}
    ],
    "apps": [
        {
            "name": "api",
            "type": "go",
            "path": "apps/api",
            "env": {
                "production": {
                    "DATABASE_URL": {"source": "resource", "value": "db.connection_url"}
                }
            }
        }
    ]
}"#;

/// Manifest declaring sops-sourced secrets.
pub const SOPS_MANIFEST: &str = r#"{
    "project": {"name": "acme"},
    "shared": {
        "env": {
            "default": {"SENTRY_DSN": {"source": "sops", "value": "SENTRY_DSN"}}
        }
    },
    "apps": [
        {
            "name": "cms",
            "type": "payload",
            "path": "apps/cms",
            "env": {
                "production": {
                    "PAYLOAD_SECRET": {"source": "sops", "value": "PAYLOAD_SECRET"}
                }
            }
        }
    ]
}"#;

/// Test environment with isolated temp directories.
///
/// No process-global state is mutated; child processes get their working
/// directory and environment set per invocation so tests run in parallel.
pub struct Test {
    /// Temporary project directory
    pub dir: TempDir,
    /// Temporary home directory
    pub home: TempDir,
}

impl Test {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let home = TempDir::new().expect("failed to create temp home");
        Self { dir, home }
    }

    /// Create a test environment with the given `app.json` written.
    pub fn with_manifest(manifest: &str) -> Self {
        let t = Self::new();
        t.write("app.json", manifest);
        t
    }

    /// Create a shipkit command isolated to this test's directories.
    pub fn cmd(&self) -> Command {
        #[allow(deprecated)]
        let mut cmd = Command::cargo_bin("shipkit").expect("failed to find shipkit binary");
        cmd.env("HOME", self.home.path());
        cmd.env("USERPROFILE", self.home.path());
        cmd.env("NO_COLOR", "1");
        cmd.env_remove("XDG_CONFIG_HOME");
        cmd.env_remove("APP_ENVIRONMENT");
        cmd.env_remove("SOPS_AGE_KEY");
        cmd.current_dir(self.dir.path());
        cmd
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent dirs");
        }
        fs::write(path, content).expect("failed to write test file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).expect("failed to read test file")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }
}

/// A freshly generated age identity as (secret key, public key) strings.
pub fn age_identity() -> (String, String) {
    let identity = age::x25519::Identity::generate();
    (
        identity.to_string().expose_secret().to_string(),
        identity.to_public().to_string(),
    )
}
