//! Env commands: generate and sync `.env` files from the manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cli::output;
use crate::core::dotenv;
use crate::core::exec::OsRunner;
use crate::core::fs::{Fs, OsFs};
use crate::core::manifest::{Definition, Env, EnvSource};
use crate::core::secrets::resolve::{EnvOutputs, Resolver};
use crate::core::secrets::Store;
use crate::core::sops::{AgeProvider, Client, KeyProvider};
use crate::error::{ManifestError, Result};

/// Resolve one app's variables and write its `.env` file.
pub fn generate(app_name: &str, env: Env, out_path: Option<&str>) -> Result<()> {
    let fs = OsFs::new();
    let runner = OsRunner::new();
    let mut def = Definition::load_from_dir(&fs, Path::new("."))?;

    if def.find_app(app_name).is_none() {
        return Err(ManifestError::AppNotFound(app_name.to_string()).into());
    }

    let provider = key_provider(&def)?;
    let client = Client::new(provider.as_ref(), &runner);
    let store = Store::new(&fs, client, ".");
    let outputs = EnvOutputs;
    Resolver::new(&store, &outputs).resolve_for_environment(&mut def, env)?;

    let vars = def
        .vars_for_app(app_name, env)
        .ok_or_else(|| ManifestError::AppNotFound(app_name.to_string()))?;
    if vars.is_empty() {
        output::warn(&format!("no env vars defined for {app_name} in {env}"));
        return Ok(());
    }

    let app = def
        .find_app(app_name)
        .ok_or_else(|| ManifestError::AppNotFound(app_name.to_string()))?;
    let path = match out_path {
        Some(p) => PathBuf::from(p),
        None => dotenv::file_path(app, env),
    };

    write_env_file(&fs, &path, &vars)?;
    output::success(&format!(
        "wrote {} ({} vars)",
        output::path(&path.display().to_string()),
        vars.len()
    ));
    Ok(())
}

/// Write production `.env` files for every app.
pub fn sync() -> Result<()> {
    let fs = OsFs::new();
    let runner = OsRunner::new();
    let mut def = Definition::load_from_dir(&fs, Path::new("."))?;

    let provider = key_provider(&def)?;
    let client = Client::new(provider.as_ref(), &runner);
    let store = Store::new(&fs, client, ".");
    let outputs = EnvOutputs;
    Resolver::new(&store, &outputs).resolve_for_environment(&mut def, Env::Production)?;

    let app_names: Vec<String> = def.apps.iter().map(|a| a.name.clone()).collect();
    let mut written = 0;
    for name in &app_names {
        let vars = def
            .vars_for_app(name, Env::Production)
            .ok_or_else(|| ManifestError::AppNotFound(name.clone()))?;
        if vars.is_empty() {
            debug!(app = %name, "no production vars, skipping");
            continue;
        }

        let app = def
            .find_app(name)
            .ok_or_else(|| ManifestError::AppNotFound(name.clone()))?;
        let path = dotenv::file_path(app, Env::Production);
        write_env_file(&fs, &path, &vars)?;
        output::success(&format!(
            "{}: wrote {} ({} vars)",
            name,
            output::path(&path.display().to_string()),
            vars.len()
        ));
        written += 1;
    }

    if written == 0 {
        output::dimmed("no apps define production env vars");
    }
    Ok(())
}

fn write_env_file(
    fs: &dyn Fs,
    path: &Path,
    vars: &crate::core::manifest::EnvVar,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs.create_dir_all(parent)?;
        }
    }
    fs.write(path, dotenv::serialize(vars).as_bytes())?;
    Ok(())
}

/// An age identity is only required when the manifest actually references
/// sops secrets; value-only projects resolve without key material.
fn key_provider(def: &Definition) -> Result<Box<dyn KeyProvider>> {
    if manifest_uses_sops(def) {
        Ok(Box::new(AgeProvider::discover()?))
    } else {
        Ok(Box::new(NullProvider))
    }
}

fn manifest_uses_sops(def: &Definition) -> bool {
    let mut found = false;
    let mut check = |_env, _key: &str, value: &crate::core::manifest::EnvValue| {
        if value.source == EnvSource::Sops {
            found = true;
        }
    };
    def.shared.env.walk(&mut check);
    for app in &def.apps {
        app.env.walk(&mut check);
    }
    found
}

/// Provider for manifests without sops-sourced vars. Never reached by a
/// sops invocation.
struct NullProvider;

impl KeyProvider for NullProvider {
    fn encrypt_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn decrypt_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}
