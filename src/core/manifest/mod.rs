//! The application manifest (`app.json`).
//!
//! Parses the declarative manifest describing the project, its apps,
//! shared infrastructure resources and per-environment configuration.
//! The definition is loaded once at command start, defaulted, validated
//! and then held immutable for the remainder of the operation (the
//! env-var resolver works on its own copy).

pub mod apps;
pub mod diff;
pub mod env;
pub mod resources;

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::constants::MANIFEST_FILE;
use crate::core::fs::Fs;
use crate::error::{ManifestError, Result};

pub use apps::{App, AppType, Infra};
pub use env::{parse_resource_reference, Env, EnvSource, EnvValue, EnvVar, Environment};
pub use resources::{
    output_env_var_for, BackupConfig, Resource, ResourceProvider, ResourceType,
};

/// The complete application manifest: project metadata, shared
/// configuration, resources and apps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    #[serde(default)]
    pub shipkit_version: String,
    #[serde(default)]
    pub project: Project,
    #[serde(default)]
    pub shared: Shared,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub apps: Vec<App>,
}

/// Project metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub github_labels: Vec<String>,
}

/// Configuration shared across all apps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shared {
    #[serde(default, skip_serializing_if = "Environment::is_empty")]
    pub env: Environment,
}

/// Names excluded by [`Definition::filter_terraform_managed`], by category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkippedEntities {
    pub apps: Vec<String>,
    pub resources: Vec<String>,
}

impl SkippedEntities {
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty() && self.resources.is_empty()
    }
}

impl Definition {
    /// Reads and parses the manifest from the filesystem, applying
    /// defaults and validating invariants.
    pub fn load(fs: &dyn Fs, path: &Path) -> Result<Self> {
        if !fs.exists(path) {
            return Err(ManifestError::NotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        let data = fs.read(path)?;
        let def = Self::parse(&data)?;
        debug!(
            apps = def.apps.len(),
            resources = def.resources.len(),
            "manifest loaded"
        );
        Ok(def)
    }

    /// Loads the manifest from the conventional location in `base`.
    pub fn load_from_dir(fs: &dyn Fs, base: &Path) -> Result<Self> {
        Self::load(fs, &base.join(MANIFEST_FILE))
    }

    /// Parses raw manifest bytes, applying defaults and validating.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut def: Definition =
            serde_json::from_slice(data).map_err(ManifestError::Parse)?;
        def.apply_defaults();
        def.validate()?;
        Ok(def)
    }

    /// Fills tri-state fields and normalises paths. The only place absent
    /// values are rewritten, so downstream code can assume they are set.
    pub fn apply_defaults(&mut self) {
        for app in &mut self.apps {
            app.apply_defaults();
        }
        for resource in &mut self.resources {
            resource.apply_defaults();
        }
    }

    /// Checks manifest invariants: unique names, no app/resource name
    /// collisions, known env sources, resolvable resource references.
    pub fn validate(&self) -> Result<()> {
        let mut app_names = BTreeSet::new();
        for app in &self.apps {
            if !app_names.insert(app.name.as_str()) {
                return Err(ManifestError::DuplicateName {
                    kind: "app",
                    name: app.name.clone(),
                }
                .into());
            }
        }

        let mut resource_names = BTreeSet::new();
        for resource in &self.resources {
            if !resource_names.insert(resource.name.as_str()) {
                return Err(ManifestError::DuplicateName {
                    kind: "resource",
                    name: resource.name.clone(),
                }
                .into());
            }
            if app_names.contains(resource.name.as_str()) {
                return Err(ManifestError::DuplicateName {
                    kind: "app/resource",
                    name: resource.name.clone(),
                }
                .into());
            }
        }

        self.validate_environment(&self.shared.env, "shared.env", &resource_names)?;
        for app in &self.apps {
            let field = format!("apps.{}.env", app.name);
            self.validate_environment(&app.env, &field, &resource_names)?;
        }

        Ok(())
    }

    fn validate_environment(
        &self,
        environment: &Environment,
        field: &str,
        resource_names: &BTreeSet<&str>,
    ) -> Result<()> {
        let mut result = Ok(());
        environment.walk(|_, key, value| {
            if result.is_err() {
                return;
            }
            match value.source {
                EnvSource::Unknown => {
                    result = Err(ManifestError::UnknownEnvSource {
                        field: field.to_string(),
                        key: key.to_string(),
                    });
                }
                EnvSource::Resource => {
                    match parse_resource_reference(&value.value) {
                        Some((resource, _)) if resource_names.contains(resource) => {}
                        Some((resource, _)) => {
                            result = Err(ManifestError::UnresolvedReference {
                                key: key.to_string(),
                                resource: resource.to_string(),
                            });
                        }
                        None => {
                            result = Err(ManifestError::InvalidField {
                                field: format!("{field}.{key}"),
                                reason: format!(
                                    "expected 'resource_name.output_name', got '{}'",
                                    value.value
                                ),
                            });
                        }
                    }
                }
                EnvSource::Value | EnvSource::Sops => {}
            }
        });
        result.map_err(Into::into)
    }

    pub fn find_app(&self, name: &str) -> Option<&App> {
        self.apps.iter().find(|a| a.name == name)
    }

    pub fn find_resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Merges shared env variables with every app's environment into a
    /// single view. App values win over shared; when multiple apps define
    /// the same variable, the last app in manifest order wins.
    pub fn merge_all_environments(&self) -> Environment {
        let mut merged = self.shared.env.clone();
        for app in &self.apps {
            merged = merged.merged_with(&app.env);
        }
        merged
    }

    /// Merges the shared environment into the named app's, app winning.
    /// Returns `None` when the app does not exist.
    pub fn merge_app_environment(&self, app_name: &str) -> Option<Environment> {
        self.find_app(app_name)
            .map(|app| app.merge_environments(&self.shared.env))
    }

    /// The effective variables for one app and environment, applying the
    /// full precedence chain: app env-specific > app default > shared
    /// env-specific > shared default.
    pub fn vars_for_app(&self, app_name: &str, env: Env) -> Option<EnvVar> {
        let app = self.find_app(app_name)?;
        let mut vars = self.shared.env.vars_for(env);
        for (name, value) in app.env.vars_for(env) {
            vars.insert(name, value);
        }
        Some(vars)
    }

    /// Splits the definition into the terraform-managed projection and the
    /// names that were excluded. Kept entities have
    /// `terraform_managed != false`.
    pub fn filter_terraform_managed(&self) -> (Definition, SkippedEntities) {
        let mut kept = self.clone();
        let mut skipped = SkippedEntities::default();

        kept.apps.retain(|app| {
            let keep = app.is_terraform_managed();
            if !keep {
                skipped.apps.push(app.name.clone());
            }
            keep
        });
        kept.resources.retain(|resource| {
            let keep = resource.is_terraform_managed();
            if !keep {
                skipped.resources.push(resource.name.clone());
            }
            keep
        });

        (kept, skipped)
    }
}
