//! Secrets commands: scaffold, sync, encrypt, decrypt, get.

use std::path::Path;

use crate::cli::output;
use crate::core::exec::{self, OsRunner};
use crate::core::fs::OsFs;
use crate::core::manifest::{Definition, Env};
use crate::core::secrets::Store;
use crate::core::sops::{AgeProvider, Client, SOPS_BINARY};
use crate::error::Result;

/// Create empty secret files and the sops config.
pub fn scaffold() -> Result<()> {
    let fs = OsFs::new();
    let runner = OsRunner::new();
    // Loading validates we are at a project root before touching disk.
    Definition::load_from_dir(&fs, Path::new("."))?;

    let provider = AgeProvider::discover()?;
    let client = Client::new(&provider, &runner);
    let store = Store::new(&fs, client, ".");

    let created = store.scaffold(provider.public_key())?;
    if created.is_empty() {
        output::dimmed("secret files already exist, nothing to do");
        return Ok(());
    }

    for path in &created {
        output::success(&format!("created {}", output::path(&path.display().to_string())));
    }
    output::hint("add placeholders with: shipkit secrets sync");
    Ok(())
}

/// Add placeholders for sops-sourced keys declared in the manifest.
pub fn sync() -> Result<()> {
    let fs = OsFs::new();
    let runner = OsRunner::new();
    let def = Definition::load_from_dir(&fs, Path::new("."))?;

    let provider = AgeProvider::discover()?;
    let client = Client::new(&provider, &runner);
    let store = Store::new(&fs, client, ".");

    let report = store.sync(&def);
    for file in &report.files {
        let display = file.path.display().to_string();
        if file.was_missing {
            output::warn(&format!("{display} is missing"));
            output::hint("run: shipkit secrets scaffold");
            continue;
        }
        if file.was_encrypted {
            output::warn(&format!("{display} is encrypted, skipped"));
            output::hint("run: shipkit secrets decrypt");
            continue;
        }
        for added in &file.added_keys {
            output::success(&format!(
                "{}: added {} (used by {})",
                file.env,
                output::key(&added.key),
                added.apps.join(", ")
            ));
        }
    }

    if report.total_added() == 0 && report.missing_count() == 0 && report.encrypted_count() == 0
    {
        output::dimmed("all declared secrets already have entries");
    }
    if report.total_added() > 0 {
        output::hint("fill in REPLACE_ME_ values, then run: shipkit secrets encrypt");
    }

    if let Some(err) = report.into_error() {
        return Err(err.into());
    }
    Ok(())
}

/// Encrypt every secret file in place.
pub fn encrypt() -> Result<()> {
    let store_parts = open_store()?;
    let (fs, runner, provider) = &store_parts;
    let store = Store::new(fs, Client::new(provider, runner), ".");

    store.encrypt_all()?;
    output::success("secret files encrypted");
    Ok(())
}

/// Decrypt every secret file in place.
pub fn decrypt() -> Result<()> {
    let store_parts = open_store()?;
    let (fs, runner, provider) = &store_parts;
    let store = Store::new(fs, Client::new(provider, runner), ".");

    store.decrypt_all()?;
    output::success("secret files decrypted");
    output::hint("re-encrypt before committing: shipkit secrets encrypt");
    Ok(())
}

/// Print one decrypted secret value to stdout.
pub fn get(env: Env, key: &str) -> Result<()> {
    let store_parts = open_store()?;
    let (fs, runner, provider) = &store_parts;
    let store = Store::new(fs, Client::new(provider, runner), ".");

    let value = store.get(env, key)?;
    // Raw value only, so output is pipeable.
    println!("{value}");
    Ok(())
}

fn open_store() -> Result<(OsFs, OsRunner, AgeProvider)> {
    exec::find_binary(SOPS_BINARY)?;
    let provider = AgeProvider::discover()?;
    Ok((OsFs::new(), OsRunner::new(), provider))
}
