//! Environment variable declarations within the manifest.
//!
//! Variables can be defined per environment (dev, staging, production) or
//! once under `default` to apply across all environments. Each variable
//! declares where its value comes from: a literal, a terraform resource
//! output, or a sops-encrypted secret.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// A concrete runtime environment.
///
/// `default` is not an environment of its own: it is a bucket of variables
/// replayed into each of these before environment-specific values override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Env {
    #[default]
    Development,
    Staging,
    Production,
}

impl Env {
    /// All environments in their fixed traversal order.
    pub const ALL: [Env; 3] = [Env::Development, Env::Staging, Env::Production];

    pub fn as_str(&self) -> &'static str {
        match self {
            Env::Development => "development",
            Env::Staging => "staging",
            Env::Production => "production",
        }
    }

    /// Short form used in terraform output env var names (`TF_PROD_...`).
    pub fn short(&self) -> &'static str {
        match self {
            Env::Development => "dev",
            Env::Staging => "staging",
            Env::Production => "prod",
        }
    }

    /// The `.env` file name convention: development has no suffix.
    pub fn env_file_name(&self) -> String {
        match self {
            Env::Development => ".env".to_string(),
            other => format!(".env.{}", other.as_str()),
        }
    }

    /// The secret file name for this environment, e.g. `production.yaml`.
    pub fn secret_file_name(&self) -> String {
        format!("{}.yaml", self.as_str())
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Env {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Env::Development),
            "staging" => Ok(Env::Staging),
            "production" | "prod" => Ok(Env::Production),
            other => Err(ManifestError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Where an environment variable's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvSource {
    /// A static string, used as-is.
    Value,
    /// A terraform resource output reference, e.g. `db.connection_url`.
    Resource,
    /// A key looked up in the environment's sops-encrypted secret file.
    Sops,
    /// Tolerated at parse time so validation can report it with context.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for EnvSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvSource::Value => "value",
            EnvSource::Resource => "resource",
            EnvSource::Sops => "sops",
            EnvSource::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A single environment variable configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvValue {
    pub source: EnvSource,
    /// The value or reference; format depends on `source`.
    #[serde(default)]
    pub value: String,
}

impl EnvValue {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            source: EnvSource::Value,
            value: value.into(),
        }
    }
}

/// Map of variable names to their configurations within one bucket.
pub type EnvVar = BTreeMap<String, EnvValue>;

/// Per-environment variable buckets for one declaration scope
/// (the shared block or a single app).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default, skip_serializing_if = "EnvVar::is_empty")]
    pub default: EnvVar,
    #[serde(default, skip_serializing_if = "EnvVar::is_empty")]
    pub dev: EnvVar,
    #[serde(default, skip_serializing_if = "EnvVar::is_empty")]
    pub staging: EnvVar,
    #[serde(default, skip_serializing_if = "EnvVar::is_empty")]
    pub production: EnvVar,
}

impl Environment {
    /// The environment-specific bucket (not including defaults).
    pub fn bucket(&self, env: Env) -> &EnvVar {
        match env {
            Env::Development => &self.dev,
            Env::Staging => &self.staging,
            Env::Production => &self.production,
        }
    }

    pub fn bucket_mut(&mut self, env: Env) -> &mut EnvVar {
        match env {
            Env::Development => &mut self.dev,
            Env::Staging => &mut self.staging,
            Env::Production => &mut self.production,
        }
    }

    /// Visits every `(env, name, value)` triple.
    ///
    /// Default vars are replayed for each environment first, so a walker
    /// sees defaults applied everywhere with environment-specific values
    /// arriving later (and therefore able to override).
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(Env, &str, &EnvValue),
    {
        if !self.default.is_empty() {
            for env in Env::ALL {
                for (name, value) in &self.default {
                    f(env, name, value);
                }
            }
        }
        for env in Env::ALL {
            for (name, value) in self.bucket(env) {
                f(env, name, value);
            }
        }
    }

    /// The effective variables for one environment: `default` merged with
    /// the environment-specific bucket, environment winning.
    pub fn vars_for(&self, env: Env) -> EnvVar {
        let mut vars = self.default.clone();
        for (name, value) in self.bucket(env) {
            vars.insert(name.clone(), value.clone());
        }
        vars
    }

    /// Deep-merges `other` into a copy of `self`, bucket by bucket, with
    /// `other` taking precedence. Neither input is mutated.
    pub fn merged_with(&self, other: &Environment) -> Environment {
        fn merge(base: &EnvVar, over: &EnvVar) -> EnvVar {
            let mut out = base.clone();
            for (k, v) in over {
                out.insert(k.clone(), v.clone());
            }
            out
        }

        Environment {
            default: merge(&self.default, &other.default),
            dev: merge(&self.dev, &other.dev),
            staging: merge(&self.staging, &other.staging),
            production: merge(&self.production, &other.production),
        }
    }

    /// True when no bucket holds any variable.
    pub fn is_empty(&self) -> bool {
        self.default.is_empty()
            && self.dev.is_empty()
            && self.staging.is_empty()
            && self.production.is_empty()
    }
}

/// Parses a resource reference of the form `resource_name.output_name`.
pub fn parse_resource_reference(value: &str) -> Option<(&str, &str)> {
    let (resource, output) = value.split_once('.')?;
    if resource.is_empty() || output.is_empty() {
        return None;
    }
    Some((resource, output))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(v: &str) -> EnvValue {
        EnvValue::literal(v)
    }

    #[test]
    fn env_file_name_mapping() {
        assert_eq!(Env::Development.env_file_name(), ".env");
        assert_eq!(Env::Staging.env_file_name(), ".env.staging");
        assert_eq!(Env::Production.env_file_name(), ".env.production");
    }

    #[test]
    fn env_parses_short_and_long_forms() {
        assert_eq!("dev".parse::<Env>().unwrap(), Env::Development);
        assert_eq!("production".parse::<Env>().unwrap(), Env::Production);
        assert!("qa".parse::<Env>().is_err());
    }

    #[test]
    fn env_defaults_to_development() {
        // Matches the CLI's --environment default.
        assert_eq!(Env::default(), Env::Development);
    }

    #[test]
    fn vars_for_overrides_default_with_specific() {
        let mut env = Environment::default();
        env.default.insert("A".into(), var("default-a"));
        env.default.insert("B".into(), var("default-b"));
        env.production.insert("A".into(), var("prod-a"));

        let vars = env.vars_for(Env::Production);
        assert_eq!(vars["A"].value, "prod-a");
        assert_eq!(vars["B"].value, "default-b");

        // Development untouched by the production bucket.
        let vars = env.vars_for(Env::Development);
        assert_eq!(vars["A"].value, "default-a");
    }

    #[test]
    fn walk_visits_defaults_for_every_environment() {
        let mut env = Environment::default();
        env.default.insert("SHARED".into(), var("x"));
        env.staging.insert("ONLY_STAGING".into(), var("y"));

        let mut seen = Vec::new();
        env.walk(|e, name, _| seen.push((e, name.to_string())));

        assert!(seen.contains(&(Env::Development, "SHARED".to_string())));
        assert!(seen.contains(&(Env::Production, "SHARED".to_string())));
        assert!(seen.contains(&(Env::Staging, "ONLY_STAGING".to_string())));
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn merged_with_prefers_override() {
        let mut base = Environment::default();
        base.production.insert("KEY".into(), var("base"));
        base.production.insert("KEEP".into(), var("kept"));

        let mut over = Environment::default();
        over.production.insert("KEY".into(), var("override"));

        let merged = base.merged_with(&over);
        assert_eq!(merged.production["KEY"].value, "override");
        assert_eq!(merged.production["KEEP"].value, "kept");
        // Inputs untouched.
        assert_eq!(base.production["KEY"].value, "base");
    }

    #[test]
    fn parse_resource_reference_formats() {
        assert_eq!(
            parse_resource_reference("db.connection_url"),
            Some(("db", "connection_url"))
        );
        assert_eq!(
            parse_resource_reference("db.outputs.url"),
            Some(("db", "outputs.url"))
        );
        assert_eq!(parse_resource_reference("nodot"), None);
        assert_eq!(parse_resource_reference(".missing"), None);
        assert_eq!(parse_resource_reference("missing."), None);
    }

    #[test]
    fn unknown_source_tolerated_at_parse_time() {
        let value: EnvValue =
            serde_json::from_str(r#"{"source": "vault", "value": "x"}"#).unwrap();
        assert_eq!(value.source, EnvSource::Unknown);
    }
}
