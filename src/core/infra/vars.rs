//! Serialises the manifest into the terraform variables file.
//!
//! The emitted shape must map one-to-one onto the variables the embedded
//! template tree declares; if the two drift, provisioning fails at plan
//! time.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::manifest::{Definition, Env, EnvSource};

/// File name terraform auto-loads from the working directory.
pub const TFVARS_FILE: &str = "shipkit.auto.tfvars.json";

const SCOPE_SECRET: &str = "SECRET";
const SCOPE_GENERAL: &str = "GENERAL";

/// Root structure written to `shipkit.auto.tfvars.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TfVars {
    pub project_name: String,
    pub environment: String,
    pub apps: Vec<TfApp>,
    pub resources: Vec<TfResource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TfResource {
    pub name: String,
    pub platform_type: String,
    pub platform_provider: String,
    pub config: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TfApp {
    pub name: String,
    pub platform_type: String,
    pub platform_provider: String,
    pub app_type: String,
    pub path: String,
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<TfEnvVar>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TfEnvVar {
    pub key: String,
    pub value: String,
    pub source: String,
    /// `GENERAL` for plain values, `SECRET` for anything that came from
    /// sops or a resource output.
    #[serde(rename = "type")]
    pub scope: String,
}

impl TfVars {
    /// Builds the variables for one environment from a (filtered) manifest.
    ///
    /// Each app's env vars are the shared environment merged with the
    /// app's own, reduced to the requested environment.
    pub fn from_definition(def: &Definition, env: Env) -> Self {
        let resources = def
            .resources
            .iter()
            .map(|r| TfResource {
                name: r.name.clone(),
                platform_type: r.resource_type.to_string(),
                platform_provider: r.provider.to_string(),
                config: r.config.clone(),
            })
            .collect();

        let apps = def
            .apps
            .iter()
            .map(|app| {
                let merged = app.merge_environments(&def.shared.env);
                let env_vars = merged
                    .vars_for(env)
                    .into_iter()
                    .map(|(key, value)| TfEnvVar {
                        key,
                        scope: if value.source == EnvSource::Value {
                            SCOPE_GENERAL.to_string()
                        } else {
                            SCOPE_SECRET.to_string()
                        },
                        source: value.source.to_string(),
                        value: value.value,
                    })
                    .collect();

                TfApp {
                    name: app.name.clone(),
                    platform_type: app.infra.infra_type.clone(),
                    platform_provider: app.infra.provider.clone(),
                    app_type: app.app_type.to_string(),
                    path: app.path.clone(),
                    config: app.infra.config.clone(),
                    env_vars,
                }
            })
            .collect();

        TfVars {
            project_name: def.project.name.clone(),
            environment: env.to_string(),
            apps,
            resources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Definition {
        Definition::parse(
            br#"{
                "project": {"name": "acme"},
                "shared": {
                    "env": {
                        "default": {
                            "LOG_LEVEL": {"source": "value", "value": "info"}
                        }
                    }
                },
                "resources": [
                    {
                        "name": "db",
                        "type": "postgres",
                        "provider": "digitalocean",
                        "config": {"size": "db-s-1vcpu-1gb"}
                    }
                ],
                "apps": [
                    {
                        "name": "cms",
                        "type": "payload",
                        "path": "apps/cms",
                        "infra": {
                            "provider": "digitalocean",
                            "type": "container",
                            "config": {"instance_count": 1}
                        },
                        "env": {
                            "production": {
                                "PAYLOAD_SECRET": {"source": "sops", "value": "PAYLOAD_SECRET"}
                            }
                        }
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn maps_resources_and_apps() {
        let vars = TfVars::from_definition(&manifest(), Env::Production);

        assert_eq!(vars.project_name, "acme");
        assert_eq!(vars.environment, "production");

        assert_eq!(vars.resources.len(), 1);
        assert_eq!(vars.resources[0].platform_type, "postgres");
        assert_eq!(vars.resources[0].platform_provider, "digitalocean");
        // apply_defaults injected engine_version alongside the user config.
        assert_eq!(vars.resources[0].config["size"], "db-s-1vcpu-1gb");
        assert_eq!(vars.resources[0].config["engine_version"], "17");

        assert_eq!(vars.apps.len(), 1);
        assert_eq!(vars.apps[0].platform_type, "container");
        assert_eq!(vars.apps[0].app_type, "payload");
    }

    #[test]
    fn env_vars_carry_scope_and_shared_merge() {
        let vars = TfVars::from_definition(&manifest(), Env::Production);
        let env_vars = &vars.apps[0].env_vars;

        let log = env_vars.iter().find(|v| v.key == "LOG_LEVEL").unwrap();
        assert_eq!(log.scope, "GENERAL");
        assert_eq!(log.value, "info");

        let secret = env_vars.iter().find(|v| v.key == "PAYLOAD_SECRET").unwrap();
        assert_eq!(secret.scope, "SECRET");
        assert_eq!(secret.source, "sops");
    }

    #[test]
    fn other_environments_exclude_env_specific_vars() {
        let vars = TfVars::from_definition(&manifest(), Env::Development);
        let keys: Vec<&str> = vars.apps[0]
            .env_vars
            .iter()
            .map(|v| v.key.as_str())
            .collect();
        assert_eq!(keys, vec!["LOG_LEVEL"]);
    }

    #[test]
    fn serialises_to_expected_json_shape() {
        let vars = TfVars::from_definition(&manifest(), Env::Production);
        let json = serde_json::to_value(&vars).unwrap();

        assert!(json["apps"][0]["env_vars"][0]["type"].is_string());
        assert_eq!(json["resources"][0]["name"], "db");
    }
}
