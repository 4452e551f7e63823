//! Apps within the manifest.
//!
//! Each app is one deployable unit with its own path, type and
//! per-environment configuration, deployed independently of the others.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use super::env::Environment;

/// One deployable unit within the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// Unique identifier (lowercase, hyphenated).
    pub name: String,
    /// Human-readable name for display purposes.
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub app_type: AppType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Working-tree-relative path to the app's source directory.
    pub path: String,
    #[serde(default)]
    pub infra: Infra,
    #[serde(default, skip_serializing_if = "Environment::is_empty")]
    pub env: Environment,
    /// Whether this app belongs to the npm workspace.
    /// Absent means "decide from the app type".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses_npm: Option<bool>,
    /// Whether this app's infrastructure is managed by terraform.
    /// Absent means true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_managed: Option<bool>,
}

/// Infrastructure and deployment configuration for an app.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Infra {
    #[serde(default)]
    pub provider: String,
    /// Infrastructure type (vm, container, app, function).
    #[serde(rename = "type", default)]
    pub infra_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, serde_json::Value>,
}

/// The kind of application being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Go,
    Payload,
    Sveltekit,
}

impl AppType {
    /// The language ecosystem the app belongs to, "go" or "js".
    pub fn language(&self) -> &'static str {
        match self {
            AppType::Go => "go",
            AppType::Payload | AppType::Sveltekit => "js",
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppType::Go => "go",
            AppType::Payload => "payload",
            AppType::Sveltekit => "sveltekit",
        };
        f.write_str(s)
    }
}

impl App {
    /// Whether this app should be included in the npm workspace.
    /// `apply_defaults` resolves the tri-state, so this only falls back to
    /// the type-based answer for definitions built by hand.
    pub fn uses_npm(&self) -> bool {
        self.uses_npm
            .unwrap_or_else(|| self.app_type.language() == "js")
    }

    /// Whether this app should be managed by terraform. Absent means true.
    pub fn is_terraform_managed(&self) -> bool {
        self.terraform_managed.unwrap_or(true)
    }

    /// Merges the shared environment with this app's, bucket by bucket,
    /// with app-specific variables taking precedence.
    pub fn merge_environments(&self, shared: &Environment) -> Environment {
        shared.merged_with(&self.env)
    }

    pub(super) fn apply_defaults(&mut self) {
        if self.terraform_managed.is_none() {
            self.terraform_managed = Some(true);
        }
        if self.uses_npm.is_none() {
            self.uses_npm = Some(self.app_type.language() == "js");
        }
        // Normalise the path: strip a trailing separator and a leading "./".
        let cleaned = Path::new(self.path.trim_end_matches('/'))
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect::<std::path::PathBuf>();
        if let Some(s) = cleaned.to_str() {
            self.path = s.to_string();
        }
    }
}
