//! Infrastructure orchestration through the terraform binary.
//!
//! A [`Manager`] owns a staged working directory: the embedded template
//! tree plus a generated variables file, created under a temp dir on
//! `init` and removed unconditionally on `cleanup`. Every terraform
//! invocation targets that directory with `-chdir`.

pub mod templates;
pub mod vars;

use std::collections::BTreeMap;
use std::fs;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::core::exec::{Command, Runner};
use crate::core::manifest::{
    output_env_var_for, Definition, Env, ResourceType, SkippedEntities,
};
use crate::error::{InfraError, ManifestError, Result};

use vars::{TfVars, TFVARS_FILE};

const PLAN_FILE: &str = "plan.tfplan";

/// Drives terraform against the filtered manifest.
pub struct Manager<'a> {
    def: Definition,
    skipped: SkippedEntities,
    runner: &'a dyn Runner,
    sops_env: BTreeMap<String, String>,
    work: Option<Workspace>,
}

struct Workspace {
    dir: TempDir,
    vars_written: Option<Env>,
}

/// The result of `plan`.
#[derive(Debug, Clone)]
pub struct PlanOutput {
    pub has_changes: bool,
    /// Human-readable plan text.
    pub output: String,
    /// The structured plan from `show -json`.
    pub plan: serde_json::Value,
}

/// The result of `apply`, `destroy` and `refresh`.
#[derive(Debug, Clone)]
pub struct ApplyOutput {
    pub output: String,
}

/// What to import: exactly one of `resource` or `app`.
#[derive(Debug, Clone, Default)]
pub struct ImportInput {
    pub resource: Option<String>,
    pub app: Option<String>,
    /// Provider-specific identifier (cluster ID, app ID, bucket name).
    pub id: String,
    pub env: Env,
}

/// The result of `import`.
#[derive(Debug, Clone, Default)]
pub struct ImportOutput {
    /// Terraform addresses actually imported, in order.
    pub imported: Vec<String>,
    pub output: String,
}

/// Parsed `terraform output -json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputResult {
    /// Resource name to its output map.
    pub resources: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// App name to its output map.
    pub apps: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// Outputs that are neither resources nor apps.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl OutputResult {
    /// Flattens resource outputs into `TF_<ENV>_<RESOURCE>_<OUTPUT>` pairs,
    /// the shape the env-var resolver consumes.
    pub fn resource_env_vars(&self, env: Env) -> BTreeMap<String, String> {
        let mut flat = BTreeMap::new();
        for (resource, outputs) in &self.resources {
            for (output, value) in outputs {
                let name = output_env_var_for(env, resource, output);
                flat.insert(name, json_to_string(value));
            }
        }
        flat
    }
}

impl<'a> Manager<'a> {
    /// Builds a manager over the terraform-managed subset of the manifest.
    pub fn new(
        def: &Definition,
        runner: &'a dyn Runner,
        sops_env: BTreeMap<String, String>,
    ) -> Self {
        let (kept, skipped) = def.filter_terraform_managed();
        Self {
            def: kept,
            skipped,
            runner,
            sops_env,
            work: None,
        }
    }

    /// Entities excluded because they are not terraform-managed.
    pub fn skipped(&self) -> &SkippedEntities {
        &self.skipped
    }

    /// Stages the working directory and runs `terraform init`.
    /// Must be called before any other operation.
    pub fn init(&mut self) -> Result<()> {
        let dir = tempfile::Builder::new()
            .prefix("shipkit-tf")
            .tempdir()
            .map_err(|e| InfraError::Init(format!("creating working dir: {e}")))?;

        templates::write_all(dir.path())
            .map_err(|e| InfraError::Init(format!("staging templates: {e}")))?;

        debug!(dir = %dir.path().display(), "staged terraform working directory");
        self.work = Some(Workspace {
            dir,
            vars_written: None,
        });

        self.run("init", &["init", "-input=false", "-upgrade"], false)
            .map_err(|e| InfraError::Init(e.to_string()))?;
        Ok(())
    }

    /// Produces an execution plan for one environment.
    pub fn plan(&mut self, env: Env) -> Result<PlanOutput> {
        self.prepare(env)?;
        let plan_out = self.run(
            "plan",
            &["plan", "-input=false", &format!("-out={PLAN_FILE}")],
            false,
        )?;

        let show = self.run("show", &["show", "-json", PLAN_FILE], false)?;
        let plan: serde_json::Value =
            serde_json::from_str(&show).map_err(InfraError::ParseOutput)?;

        Ok(PlanOutput {
            has_changes: plan_has_changes(&plan),
            output: plan_out,
            plan,
        })
    }

    /// Applies the configuration for one environment.
    pub fn apply(&mut self, env: Env) -> Result<ApplyOutput> {
        self.prepare(env)?;
        let output = self.run("apply", &["apply", "-input=false", "-auto-approve"], false)?;
        Ok(ApplyOutput { output })
    }

    /// Tears down the infrastructure for one environment.
    pub fn destroy(&mut self, env: Env) -> Result<ApplyOutput> {
        self.prepare(env)?;
        let output = self.run(
            "destroy",
            &["destroy", "-input=false", "-auto-approve"],
            false,
        )?;
        Ok(ApplyOutput { output })
    }

    /// Syncs state with reality without changing infrastructure.
    pub fn refresh(&mut self, env: Env) -> Result<ApplyOutput> {
        self.prepare(env)?;
        let output = self.run(
            "refresh",
            &["apply", "-refresh-only", "-input=false", "-auto-approve"],
            false,
        )?;
        Ok(ApplyOutput { output })
    }

    /// Imports an existing resource or app into terraform state.
    pub fn import(&mut self, input: ImportInput) -> Result<ImportOutput> {
        let addresses = self.import_addresses(&input)?;
        self.prepare(input.env)?;

        let mut result = ImportOutput::default();
        for (address, id) in addresses {
            let output = self.run("import", &["import", &address, &id], false)?;
            result.output.push_str(&output);
            result.imported.push(address);
        }
        Ok(result)
    }

    /// Reads all terraform outputs for one environment.
    pub fn output(&mut self, env: Env) -> Result<OutputResult> {
        self.prepare(env)?;
        let raw = self.run("output", &["output", "-json"], false)?;
        parse_output(&raw)
    }

    /// Raw terraform pass-through with the user's console attached.
    pub fn exec(&mut self, args: &[String]) -> Result<()> {
        let work = self.workspace()?;
        let chdir = format!("-chdir={}", work.dir.path().display());

        let mut full = vec![chdir];
        full.extend(args.iter().cloned());

        let cmd = Command::new("terraform", full)
            .envs(self.sops_env.clone())
            .inherit_stdio();
        self.runner.run(cmd)?;
        Ok(())
    }

    /// Removes the staged working directory. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if let Some(work) = self.work.take() {
            if let Err(e) = work.dir.close() {
                warn!(error = %e, "removing terraform working directory");
            }
        }
    }

    fn workspace(&self) -> Result<&Workspace> {
        self.work.as_ref().ok_or_else(|| InfraError::NotInitialised.into())
    }

    /// Writes the tfvars file for `env` unless it is already current.
    fn prepare(&mut self, env: Env) -> Result<()> {
        let def = self.def.clone();
        let work = self
            .work
            .as_mut()
            .ok_or(InfraError::NotInitialised)?;

        if work.vars_written == Some(env) {
            return Ok(());
        }

        let tf_vars = TfVars::from_definition(&def, env);
        let json = serde_json::to_string_pretty(&tf_vars)
            .map_err(|e| InfraError::Init(format!("serialising tfvars: {e}")))?;
        fs::write(work.dir.path().join(TFVARS_FILE), json)
            .map_err(|e| InfraError::Init(format!("writing tfvars: {e}")))?;

        work.vars_written = Some(env);
        debug!(environment = %env, "wrote terraform variables");
        Ok(())
    }

    fn run(&self, op: &str, args: &[&str], inherit_stdio: bool) -> Result<String> {
        let work = self.workspace()?;
        let chdir = format!("-chdir={}", work.dir.path().display());

        let mut full = vec![chdir.as_str()];
        full.extend_from_slice(args);

        let mut cmd = Command::new("terraform", full).envs(self.sops_env.clone());
        if inherit_stdio {
            cmd = cmd.inherit_stdio();
        }

        let out = self.runner.run(cmd).map_err(|e| InfraError::Operation {
            op: op.to_string(),
            reason: e.to_string(),
        })?;
        Ok(out.output)
    }

    fn import_addresses(&self, input: &ImportInput) -> Result<Vec<(String, String)>> {
        match (&input.resource, &input.app) {
            (Some(_), Some(_)) | (None, None) => Err(InfraError::ImportExclusive.into()),
            (Some(name), None) => {
                let resource = self
                    .def
                    .find_resource(name)
                    .ok_or_else(|| ManifestError::ResourceNotFound(name.clone()))?;

                let module = format!("module.resources[\"{}\"]", resource.name);
                let full_name = format!("{}-{}", self.def.project.name, resource.name);
                let db_prefix = full_name.replace('-', "_").to_lowercase();

                // Per-type resources in the module are count-guarded, so
                // their state addresses carry an index.
                Ok(match resource.resource_type {
                    ResourceType::Postgres => vec![
                        (
                            format!("{module}.digitalocean_database_cluster.this[0]"),
                            input.id.clone(),
                        ),
                        (
                            format!("{module}.digitalocean_database_user.this[0]"),
                            format!("{},{db_prefix}_admin", input.id),
                        ),
                        (
                            format!("{module}.digitalocean_database_db.this[0]"),
                            format!("{},{db_prefix}", input.id),
                        ),
                    ],
                    ResourceType::Redis => vec![(
                        format!("{module}.digitalocean_database_cluster.this[0]"),
                        input.id.clone(),
                    )],
                    ResourceType::S3 => vec![(
                        format!("{module}.digitalocean_spaces_bucket.this[0]"),
                        input.id.clone(),
                    )],
                })
            }
            (None, Some(name)) => {
                let app = self
                    .def
                    .find_app(name)
                    .ok_or_else(|| ManifestError::AppNotFound(name.clone()))?;
                Ok(vec![(
                    format!("module.apps[\"{}\"].digitalocean_app.this", app.name),
                    input.id.clone(),
                )])
            }
        }
    }
}

/// Whether any planned resource change is more than a no-op.
fn plan_has_changes(plan: &serde_json::Value) -> bool {
    plan["resource_changes"]
        .as_array()
        .map(|changes| {
            changes.iter().any(|c| {
                c["change"]["actions"]
                    .as_array()
                    .map(|actions| actions.iter().any(|a| a != "no-op"))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn parse_output(raw: &str) -> Result<OutputResult> {
    let all: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(raw).map_err(InfraError::ParseOutput)?;

    let mut result = OutputResult::default();
    for (key, meta) in all {
        // `output -json` wraps each output in {value, type, sensitive}.
        let value = meta.get("value").cloned().unwrap_or(meta);
        match key.as_str() {
            "resources" => {
                result.resources =
                    serde_json::from_value(value).map_err(InfraError::ParseOutput)?;
            }
            "apps" => {
                result.apps =
                    serde_json::from_value(value).map_err(InfraError::ParseOutput)?;
            }
            _ => {
                result.extra.insert(key, value);
            }
        }
    }
    Ok(result)
}

fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
