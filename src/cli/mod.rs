//! Command-line interface.

pub mod completions;
pub mod env;
pub mod infra;
pub mod output;
pub mod secrets;
pub mod validate;

use clap::{Parser, Subcommand};

use crate::core::constants::APP_ENVIRONMENT_VAR;
use crate::core::manifest::Env;

/// Shipkit - an opinionated platform CLI for app.json-driven projects.
#[derive(Parser)]
#[command(
    name = "shipkit",
    about = "Define, provision and configure your apps from a single app.json",
    version,
    after_help = "Describe once. Ship everywhere."
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Command {
    /// Generate and sync .env files from app.json
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },

    /// Manage sops-encrypted secret files
    Secrets {
        #[command(subcommand)]
        action: SecretsAction,
    },

    /// Provision and inspect infrastructure via terraform
    Infra {
        #[command(subcommand)]
        action: InfraAction,
    },

    /// Validate app.json
    Validate,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Env subcommands.
#[derive(Subcommand)]
pub enum EnvAction {
    /// Resolve env vars for one app and write its .env file
    Generate {
        /// App name from app.json
        #[arg(short, long)]
        app: String,

        /// Target environment
        #[arg(short, long, env = APP_ENVIRONMENT_VAR, default_value = "development")]
        environment: Env,

        /// Write to this path instead of the app's default .env file
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Write production .env files for every app
    Sync,
}

/// Secrets subcommands.
#[derive(Subcommand)]
pub enum SecretsAction {
    /// Create empty secret files and .sops.yaml
    Scaffold,

    /// Add placeholders for sops-sourced keys declared in app.json
    Sync,

    /// Encrypt all secret files in place
    Encrypt,

    /// Decrypt all secret files in place
    Decrypt,

    /// Print a single decrypted secret value
    Get {
        /// Target environment
        #[arg(short, long, env = APP_ENVIRONMENT_VAR, default_value = "development")]
        environment: Env,

        /// Secret key to read
        #[arg(short, long)]
        key: String,
    },
}

/// Infra subcommands.
#[derive(Subcommand)]
pub enum InfraAction {
    /// Show planned infrastructure changes
    Plan {
        /// Target environment
        #[arg(short, long, env = APP_ENVIRONMENT_VAR, default_value = "development")]
        environment: Env,
    },

    /// Apply infrastructure changes
    Apply {
        /// Target environment
        #[arg(short, long, env = APP_ENVIRONMENT_VAR, default_value = "development")]
        environment: Env,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Destroy all managed infrastructure
    Destroy {
        /// Target environment
        #[arg(short, long, env = APP_ENVIRONMENT_VAR, default_value = "development")]
        environment: Env,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Refresh terraform state from real infrastructure
    Refresh {
        /// Target environment
        #[arg(short, long, env = APP_ENVIRONMENT_VAR, default_value = "development")]
        environment: Env,
    },

    /// Print terraform outputs as JSON
    Output {
        /// Target environment
        #[arg(short, long, env = APP_ENVIRONMENT_VAR, default_value = "development")]
        environment: Env,
    },

    /// Import existing infrastructure into terraform state
    Import {
        /// Resource name from app.json
        #[arg(short, long, conflicts_with = "app")]
        resource: Option<String>,

        /// App name from app.json
        #[arg(short, long)]
        app: Option<String>,

        /// Provider-side identifier of the existing infrastructure
        #[arg(short, long)]
        id: String,

        /// Target environment
        #[arg(short, long, env = APP_ENVIRONMENT_VAR, default_value = "development")]
        environment: Env,
    },

    /// Run an arbitrary terraform command in the staged workspace
    Exec {
        /// Terraform arguments, e.g. `shipkit infra exec -- state list`
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Report whether manifest changes require provisioning
    ///
    /// Exit codes: 0 no provisioning needed, 1 provisioning needed, 2 error.
    Diff {
        /// Git revision to compare app.json against
        #[arg(short, long, default_value = "HEAD~1")]
        base: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = DiffFormat::Text)]
        format: DiffFormat,
    },
}

/// Output formats for `infra diff`.
#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum DiffFormat {
    Text,
    Json,
    Github,
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

/// Execute a command.
pub fn execute(command: Command) -> crate::error::Result<()> {
    use Command::*;

    match command {
        Env { action } => match action {
            EnvAction::Generate {
                app,
                environment,
                output,
            } => env::generate(&app, environment, output.as_deref()),
            EnvAction::Sync => env::sync(),
        },
        Secrets { action } => match action {
            SecretsAction::Scaffold => secrets::scaffold(),
            SecretsAction::Sync => secrets::sync(),
            SecretsAction::Encrypt => secrets::encrypt(),
            SecretsAction::Decrypt => secrets::decrypt(),
            SecretsAction::Get { environment, key } => secrets::get(environment, &key),
        },
        Infra { action } => match action {
            InfraAction::Plan { environment } => infra::plan(environment),
            InfraAction::Apply { environment, yes } => infra::apply(environment, yes),
            InfraAction::Destroy { environment, yes } => infra::destroy(environment, yes),
            InfraAction::Refresh { environment } => infra::refresh(environment),
            InfraAction::Output { environment } => infra::output(environment),
            InfraAction::Import {
                resource,
                app,
                id,
                environment,
            } => infra::import(resource, app, &id, environment),
            InfraAction::Exec { args } => infra::exec(&args),
            InfraAction::Diff { base, format } => infra::diff(&base, format),
        },
        Validate => validate::execute(),
        Completions { shell } => completions::execute(shell),
    }
}
