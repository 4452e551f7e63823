//! Shared infrastructure resources.
//!
//! Resources are provisioned via terraform and their outputs are made
//! available to apps through environment variables with `source: resource`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::env::Env;

/// An infrastructure component applications depend on, such as a database,
/// a cache or an object-storage bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique identifier, used in env var references (`<name>.<output>`).
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub provider: ResourceProvider,
    /// Provider-specific configuration (size, region, version, ...).
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupConfig>,
    /// Whether this resource is managed by terraform. Absent means true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_managed: Option<bool>,
}

/// Backup behaviour for a resource. Enabled by default for every resource
/// type that supports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<u32>,
}

/// The kind of resource to provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Postgres,
    Redis,
    S3,
}

impl ResourceType {
    /// The outputs terraform is required to export for this resource type.
    /// These feed resource-sourced env vars regardless of user config.
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Postgres => &[
                "id",
                "connection_url",
                "host",
                "port",
                "database",
                "user",
                "password",
            ],
            ResourceType::Redis => &["id", "connection_url", "host", "port", "password"],
            ResourceType::S3 => &["id", "bucket_name", "bucket_url", "region"],
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceType::Postgres => "postgres",
            ResourceType::Redis => "redis",
            ResourceType::S3 => "s3",
        };
        f.write_str(s)
    }
}

/// A provider of cloud infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceProvider {
    Digitalocean,
    Hetzner,
    Backblaze,
}

impl fmt::Display for ResourceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceProvider::Digitalocean => "digitalocean",
            ResourceProvider::Hetzner => "hetzner",
            ResourceProvider::Backblaze => "backblaze",
        };
        f.write_str(s)
    }
}

/// The env var name carrying a terraform output for a resource.
/// Format: `TF_<ENV>_<RESOURCE>_<OUTPUT>` upper-cased, dashes mapped to
/// underscores. E.g. `TF_PROD_DB_CONNECTION_URL`.
pub fn output_env_var_for(env: Env, resource_name: &str, output: &str) -> String {
    format!(
        "TF_{}_{}_{}",
        env.short().to_uppercase(),
        resource_name.replace('-', "_").to_uppercase(),
        output.to_uppercase()
    )
}

impl Resource {
    /// Whether this resource should be managed by terraform.
    /// Absent means true.
    pub fn is_terraform_managed(&self) -> bool {
        self.terraform_managed.unwrap_or(true)
    }

    /// The env var name carrying a terraform output for this resource.
    pub fn output_env_var(&self, env: Env, output: &str) -> String {
        output_env_var_for(env, &self.name, output)
    }

    pub(super) fn apply_defaults(&mut self) {
        if self.terraform_managed.is_none() {
            self.terraform_managed = Some(true);
        }
        if self.backup.is_none() {
            self.backup = Some(BackupConfig {
                enabled: true,
                schedule: None,
                retention: None,
            });
        }

        // Type-specific config defaults, matching the terraform modules.
        let default_entry = |config: &mut BTreeMap<String, serde_json::Value>, key, value: &str| {
            config
                .entry(String::from(key))
                .or_insert_with(|| serde_json::Value::String(value.to_string()));
        };
        match self.resource_type {
            ResourceType::Postgres => default_entry(&mut self.config, "engine_version", "17"),
            ResourceType::S3 => default_entry(&mut self.config, "acl", "private"),
            ResourceType::Redis => default_entry(&mut self.config, "eviction_policy", "noeviction"),
        }
    }
}
