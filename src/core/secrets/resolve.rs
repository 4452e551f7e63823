//! Resolves manifest env vars to concrete values.
//!
//! Resolution drives every variable toward a literal string suitable for
//! emitting to `.env` files: literals pass through, resource references
//! are looked up in terraform outputs and sops references are read from
//! the encrypted secret files. Failure is fail-fast; a partially resolved
//! definition must be discarded by the caller.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::manifest::{
    parse_resource_reference, Definition, Env, EnvSource, EnvValue, EnvVar, Resource,
};
use crate::error::{ResolveError, Result};

use super::Store;

/// Supplies terraform output values to the resolver.
pub trait OutputProvider {
    /// Looks up one output value by its env var name
    /// (e.g. `TF_PROD_DB_CONNECTION_URL`).
    fn lookup(&self, var_name: &str) -> Option<String>;
}

/// Reads terraform outputs from process environment variables, the way CI
/// pipelines inject them.
#[derive(Debug, Default)]
pub struct EnvOutputs;

impl OutputProvider for EnvOutputs {
    fn lookup(&self, var_name: &str) -> Option<String> {
        std::env::var(var_name).ok().filter(|v| !v.is_empty())
    }
}

/// In-memory output provider for tests and for feeding parsed
/// `terraform output -json` results back into resolution.
#[derive(Debug, Default)]
pub struct MapOutputs {
    values: BTreeMap<String, String>,
}

impl MapOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, var_name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(var_name.into(), value.into());
    }
}

impl OutputProvider for MapOutputs {
    fn lookup(&self, var_name: &str) -> Option<String> {
        self.values.get(var_name).cloned()
    }
}

/// Resolves env vars against a secrets store and an output provider.
pub struct Resolver<'a> {
    store: &'a Store<'a>,
    outputs: &'a dyn OutputProvider,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a Store<'a>, outputs: &'a dyn OutputProvider) -> Self {
        Self { store, outputs }
    }

    /// Resolves every environment of the shared block and every app,
    /// mutating the definition in place.
    pub fn resolve(&self, def: &mut Definition) -> Result<()> {
        for env in Env::ALL {
            self.resolve_for_environment(def, env)?;
        }
        Ok(())
    }

    /// Resolves one environment only, leaving other buckets untouched.
    ///
    /// The effective map (`default` merged with the environment bucket,
    /// bucket winning) is resolved and written back into the environment
    /// bucket, so later merges see only concrete values for that
    /// environment.
    pub fn resolve_for_environment(&self, def: &mut Definition, env: Env) -> Result<()> {
        let resources = def.resources.clone();
        // Secret files are decrypted at most once per environment.
        let mut secrets: Option<BTreeMap<String, String>> = None;

        let shared = self.resolve_bucket(
            &resources,
            env,
            def.shared.env.vars_for(env),
            &mut secrets,
        )?;
        *def.shared.env.bucket_mut(env) = shared;

        for app in &mut def.apps {
            let resolved =
                self.resolve_bucket(&resources, env, app.env.vars_for(env), &mut secrets)?;
            *app.env.bucket_mut(env) = resolved;
        }

        Ok(())
    }

    fn resolve_bucket(
        &self,
        resources: &[Resource],
        env: Env,
        vars: EnvVar,
        secrets: &mut Option<BTreeMap<String, String>>,
    ) -> Result<EnvVar> {
        let mut resolved = EnvVar::new();
        for (key, value) in vars {
            let value = self.resolve_value(resources, env, &key, value, secrets)?;
            resolved.insert(key, value);
        }
        Ok(resolved)
    }

    fn resolve_value(
        &self,
        resources: &[Resource],
        env: Env,
        key: &str,
        value: EnvValue,
        secrets: &mut Option<BTreeMap<String, String>>,
    ) -> Result<EnvValue> {
        match value.source {
            EnvSource::Value => Ok(value),
            EnvSource::Resource => {
                let (resource_name, output) =
                    parse_resource_reference(&value.value).ok_or_else(|| {
                        ResolveError::InvalidReference {
                            key: key.to_string(),
                            value: value.value.clone(),
                        }
                    })?;

                let resource = resources
                    .iter()
                    .find(|r| r.name == resource_name)
                    .ok_or_else(|| ResolveError::ResourceNotFound {
                        resource: resource_name.to_string(),
                        key: key.to_string(),
                    })?;

                let var_name = resource.output_env_var(env, output);
                debug!(%var_name, key, "resolving resource reference");

                let looked_up =
                    self.outputs
                        .lookup(&var_name)
                        .ok_or_else(|| ResolveError::OutputNotFound {
                            env: env.to_string(),
                            resource: resource_name.to_string(),
                            output: output.to_string(),
                        })?;

                Ok(EnvValue {
                    source: value.source,
                    value: looked_up,
                })
            }
            EnvSource::Sops => {
                if secrets.is_none() {
                    *secrets = Some(self.store.read_map(env)?);
                }
                let secret = secrets
                    .as_ref()
                    .and_then(|map| map.get(key))
                    .ok_or_else(|| ResolveError::SecretNotFound(key.to_string()))?;

                Ok(EnvValue {
                    source: value.source,
                    value: secret.clone(),
                })
            }
            EnvSource::Unknown => {
                Err(ResolveError::UnknownSource(key.to_string()).into())
            }
        }
    }
}
