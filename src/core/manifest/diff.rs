//! Change detection between two manifest versions.
//!
//! CI pipelines run `shipkit infra diff` before provisioning to decide
//! whether a terraform apply is worth the time. The decision is driven by
//! where changed env values come from: literal and sops-backed values are
//! injected at deploy time and never touch infrastructure, while
//! resource-sourced values and anything outside the env blocks do.

use serde::Serialize;
use tracing::debug;

use crate::core::constants::MANIFEST_FILE;
use crate::core::exec::{Command, Runner};
use crate::error::Result;

use super::env::{EnvSource, EnvVar, Environment};
use super::Definition;

/// The outcome of comparing two manifest versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeAnalysis {
    /// Whether provisioning can be skipped.
    pub skip: bool,
    /// Human-readable explanation of the decision.
    pub reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed_apps: Vec<AppChange>,
}

/// Changes detected for a single app present in both versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppChange {
    pub name: String,
    /// Env var configuration differs between the versions.
    pub env_changed: bool,
    /// Anything other than env vars differs (infra, config, path, type).
    pub infra_changed: bool,
}

/// Reads the manifest as it existed at a version-control revision.
///
/// Runs `git show <ref>:app.json` through the given runner so tests can
/// stub the revision content without a repository.
pub fn load_from_revision(runner: &dyn Runner, git_ref: &str) -> Result<Definition> {
    let spec = format!("{git_ref}:{MANIFEST_FILE}");
    let out = runner.run(Command::new("git", ["show", spec.as_str()]))?;
    Definition::parse(out.output.as_bytes())
}

/// Compares two manifest versions and decides whether provisioning is
/// needed.
///
/// `skip` is true only when every difference between the versions is an
/// env value whose source is `value` or `sops`. Added or removed apps or
/// resources, `config` or `infra` block changes, and resource-sourced env
/// changes all force a run.
pub fn compare(current: &Definition, previous: &Definition) -> ChangeAnalysis {
    if current == previous {
        return ChangeAnalysis {
            skip: true,
            reason: "app.json unchanged".to_string(),
            changed_apps: Vec::new(),
        };
    }

    let changed_apps = analyse_app_changes(current, previous);

    if infra_view(current) != infra_view(previous) {
        debug!("non-env manifest fields changed");
        return ChangeAnalysis {
            skip: false,
            reason: "infrastructure config changed (apps/resources/config/infra)".to_string(),
            changed_apps,
        };
    }

    // Only env blocks differ from here on. Classify by value source.
    let shared_needs_run =
        env_requires_provisioning(&current.shared.env, &previous.shared.env);
    let app_needs_run = current.apps.iter().any(|app| {
        previous
            .find_app(&app.name)
            .is_some_and(|prev| env_requires_provisioning(&app.env, &prev.env))
    });

    if shared_needs_run || app_needs_run {
        return ChangeAnalysis {
            skip: false,
            reason: "resource-sourced env values changed".to_string(),
            changed_apps,
        };
    }

    ChangeAnalysis {
        skip: true,
        reason: "only value/sops env values changed, provisioning not required".to_string(),
        changed_apps,
    }
}

/// A copy of the definition with every env block cleared, so non-env
/// differences can be detected with plain equality.
fn infra_view(def: &Definition) -> Definition {
    let mut view = def.clone();
    view.shared.env = Environment::default();
    for app in &mut view.apps {
        app.env = Environment::default();
    }
    view
}

/// Per-app change flags for apps present in both versions. Added and
/// removed apps surface through the infra view comparison instead.
fn analyse_app_changes(current: &Definition, previous: &Definition) -> Vec<AppChange> {
    let mut changes = Vec::new();
    for app in &current.apps {
        let Some(prev) = previous.find_app(&app.name) else {
            continue;
        };

        let env_changed = app.env != prev.env;

        let mut stripped = app.clone();
        stripped.env = Environment::default();
        let mut prev_stripped = prev.clone();
        prev_stripped.env = Environment::default();
        let infra_changed = stripped != prev_stripped;

        if env_changed || infra_changed {
            changes.push(AppChange {
                name: app.name.clone(),
                env_changed,
                infra_changed,
            });
        }
    }
    changes
}

fn env_requires_provisioning(current: &Environment, previous: &Environment) -> bool {
    bucket_requires_provisioning(&current.default, &previous.default)
        || bucket_requires_provisioning(&current.dev, &previous.dev)
        || bucket_requires_provisioning(&current.staging, &previous.staging)
        || bucket_requires_provisioning(&current.production, &previous.production)
}

/// True when any added, removed or modified variable in the bucket is
/// resource-sourced on either side of the change.
fn bucket_requires_provisioning(current: &EnvVar, previous: &EnvVar) -> bool {
    current
        .keys()
        .chain(previous.keys())
        .any(|key| match (current.get(key), previous.get(key)) {
            (Some(a), Some(b)) if a == b => false,
            (a, b) => {
                a.map_or(false, |v| v.source == EnvSource::Resource)
                    || b.map_or(false, |v| v.source == EnvSource::Resource)
            }
        })
}
