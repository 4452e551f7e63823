//! Infra commands: terraform plan/apply/destroy/refresh/output/import/exec
//! and the CI-facing diff.

use std::collections::BTreeMap;
use std::path::Path;

use dialoguer::Confirm;
use tracing::debug;

use crate::cli::{output, DiffFormat};
use crate::core::exec::{self, OsRunner};
use crate::core::fs::OsFs;
use crate::core::infra::{ImportInput, Manager};
use crate::core::manifest::diff::{self, ChangeAnalysis};
use crate::core::manifest::{Definition, Env};
use crate::core::sops::{AgeProvider, KeyProvider};
use crate::error::{Error, Result};

const TERRAFORM_BINARY: &str = "terraform";

pub fn plan(env: Env) -> Result<()> {
    with_manager(|mgr| {
        let result = mgr.plan(env)?;
        println!("{}", result.output);
        if result.has_changes {
            output::warn(&format!("plan for {env} contains changes"));
        } else {
            output::success(&format!("no changes for {env}"));
        }
        Ok(())
    })
}

pub fn apply(env: Env, yes: bool) -> Result<()> {
    if !confirmed(yes, &format!("Apply infrastructure changes to {env}?"))? {
        output::warn("aborted");
        return Ok(());
    }

    with_manager(|mgr| {
        let result = mgr.apply(env)?;
        println!("{}", result.output);
        output::success(&format!("applied {env}"));
        Ok(())
    })
}

pub fn destroy(env: Env, yes: bool) -> Result<()> {
    if !confirmed(
        yes,
        &format!("Destroy ALL managed infrastructure in {env}? This cannot be undone"),
    )? {
        output::warn("aborted");
        return Ok(());
    }

    with_manager(|mgr| {
        let result = mgr.destroy(env)?;
        println!("{}", result.output);
        output::success(&format!("destroyed {env}"));
        Ok(())
    })
}

pub fn refresh(env: Env) -> Result<()> {
    with_manager(|mgr| {
        let result = mgr.refresh(env)?;
        println!("{}", result.output);
        output::success(&format!("state refreshed for {env}"));
        Ok(())
    })
}

pub fn output(env: Env) -> Result<()> {
    with_manager(|mgr| {
        let result = mgr.output(env)?;
        let json = serde_json::to_string_pretty(&result)
            .map_err(|e| Error::Other(format!("serialising outputs: {e}")))?;
        println!("{json}");
        Ok(())
    })
}

pub fn import(resource: Option<String>, app: Option<String>, id: &str, env: Env) -> Result<()> {
    with_manager(|mgr| {
        let result = mgr.import(ImportInput {
            resource,
            app,
            id: id.to_string(),
            env,
        })?;
        for address in &result.imported {
            output::success(&format!("imported {}", output::key(address)));
        }
        Ok(())
    })
}

pub fn exec(args: &[String]) -> Result<()> {
    with_manager(|mgr| mgr.exec(args))
}

/// Report whether manifest changes since `base` require provisioning.
///
/// Exit codes: 0 when provisioning can be skipped, 1 when it is needed,
/// 2 on any error. CI gates terraform runs on this.
pub fn diff(base: &str, format: DiffFormat) -> Result<()> {
    match run_diff(base, format) {
        Ok(analysis) if analysis.skip => Ok(()),
        Ok(_) => Err(Error::Exit(1)),
        Err(e) => {
            output::error(&e.to_string());
            Err(Error::Exit(2))
        }
    }
}

fn run_diff(base: &str, format: DiffFormat) -> Result<ChangeAnalysis> {
    let fs = OsFs::new();
    let runner = OsRunner::new();

    let current = Definition::load_from_dir(&fs, Path::new("."))?;
    let previous = diff::load_from_revision(&runner, base)?;
    let analysis = diff::compare(&current, &previous);

    match format {
        DiffFormat::Text => {
            if analysis.skip {
                output::success(&format!("provisioning not required: {}", analysis.reason));
            } else {
                output::warn(&format!("provisioning required: {}", analysis.reason));
            }
            for change in &analysis.changed_apps {
                let mut kinds = Vec::new();
                if change.env_changed {
                    kinds.push("env");
                }
                if change.infra_changed {
                    kinds.push("infra");
                }
                output::list_item(&format!("{} ({})", change.name, kinds.join(", ")));
            }
        }
        DiffFormat::Json => {
            let json = serde_json::to_string_pretty(&analysis)
                .map_err(|e| Error::Other(format!("serialising analysis: {e}")))?;
            println!("{json}");
        }
        // Key=value lines, ready to append to $GITHUB_OUTPUT.
        DiffFormat::Github => {
            println!("skip={}", analysis.skip);
            println!("reason={}", analysis.reason);
        }
    }

    Ok(analysis)
}

/// Load the manifest, stage a terraform workspace, run `f`, clean up.
fn with_manager<T>(f: impl FnOnce(&mut Manager) -> Result<T>) -> Result<T> {
    exec::find_binary(TERRAFORM_BINARY)?;

    let fs = OsFs::new();
    let def = Definition::load_from_dir(&fs, Path::new("."))?;

    // The identity feeds terraform's sops provider hooks; plans against
    // manifests without secrets still work without one.
    let sops_env = match AgeProvider::discover() {
        Ok(provider) => provider.environment(),
        Err(e) => {
            debug!(error = %e, "no age identity, terraform runs without sops env");
            BTreeMap::new()
        }
    };

    let runner = OsRunner::new();
    let mut mgr = Manager::new(&def, &runner, sops_env);

    let skipped = mgr.skipped();
    if !skipped.is_empty() {
        for name in skipped.apps.iter().chain(skipped.resources.iter()) {
            output::dimmed(&format!("skipping {name} (terraform_managed: false)"));
        }
    }

    mgr.init()?;
    let result = f(&mut mgr);
    mgr.cleanup();
    result
}

fn confirmed(yes: bool, prompt: &str) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if !console::user_attended() {
        return Err(Error::Other(
            "refusing to run without confirmation; pass --yes".to_string(),
        ));
    }
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}
