//! Error types for shipkit.
//!
//! Errors are grouped per domain (manifest, sops, secrets, resolve, infra,
//! exec) and joined by a top-level [`Error`] so command handlers can return a
//! single `Result` type while callers still match on the specific failure.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for all shipkit operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Sops(#[from] SopsError),

    #[error(transparent)]
    Secrets(#[from] SecretsError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Infra(#[from] InfraError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    /// Short-circuit to a specific process exit code without wrapping.
    /// Used by `infra diff` for its 0/1/2 exit-code contract.
    #[error("exit: {0}")]
    Exit(i32),

    #[error("{0}")]
    Other(String),
}

/// Errors produced while loading or validating `app.json`.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest not found at {path}")]
    NotFound { path: PathBuf },

    #[error("parsing app.json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("unknown env source type for key {key} in {field}")]
    UnknownEnvSource { field: String, key: String },

    #[error("env var {key} references unknown resource '{resource}'")]
    UnresolvedReference { key: String, resource: String },

    #[error("app '{0}' not found in app.json")]
    AppNotFound(String),

    #[error("resource '{0}' not found in app.json")]
    ResourceNotFound(String),

    #[error("invalid environment: {0}")]
    UnknownEnvironment(String),
}

/// Errors from the external sops binary and its key providers.
///
/// `AlreadyEncrypted`, `NotEncrypted` and `EmptyDocument` are idempotence
/// sentinels: callers whose intent is "make sure the file is in state X"
/// treat them as success.
#[derive(Error, Debug)]
pub enum SopsError {
    #[error("file is already encrypted")]
    AlreadyEncrypted,

    #[error("file is not encrypted")]
    NotEncrypted,

    #[error("file contains no document")]
    EmptyDocument,

    #[error("no SOPS_AGE_KEY found: set the environment variable or create {path}")]
    NoIdentity { path: PathBuf },

    #[error("invalid age key format in {source_name}: {reason}")]
    InvalidIdentity { source_name: String, reason: String },

    #[error("sops {op} failed: {output}")]
    CommandFailed { op: &'static str, output: String },

    #[error("failed to read sops file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse sops content in {path}: {source}")]
    ParseContent {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Errors from the secrets store (scaffold, sync, get).
#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("secret file missing: {path} (run `shipkit secrets scaffold`)")]
    FileMissing { path: PathBuf },

    #[error("key {key} not found for env: {env}")]
    KeyNotFound { key: String, env: String },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// Joined per-file failures from a best-effort batch operation.
    #[error("{}", errors.join("; "))]
    Batch { errors: Vec<String> },
}

/// Errors raised while resolving env vars to concrete values.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("terraform output not found ({env}/{resource}.{output})")]
    OutputNotFound {
        env: String,
        resource: String,
        output: String,
    },

    #[error("secret '{0}' not found")]
    SecretNotFound(String),

    #[error("invalid resource reference format for key '{key}': expected 'resource_name.output_name', got '{value}'")]
    InvalidReference { key: String, value: String },

    #[error("resource '{resource}' not found in definition (referenced by key '{key}')")]
    ResourceNotFound { resource: String, key: String },

    #[error("unknown env source type for key {0}")]
    UnknownSource(String),
}

/// Errors from the infrastructure orchestrator.
#[derive(Error, Debug)]
pub enum InfraError {
    #[error("terraform not initialized: call init first")]
    NotInitialised,

    #[error("init error: {0}")]
    Init(String),

    #[error("executing terraform {op}: {reason}")]
    Operation { op: String, reason: String },

    #[error("exactly one of --resource or --app must be provided")]
    ImportExclusive,

    #[error("parsing terraform output: {0}")]
    ParseOutput(#[from] serde_json::Error),
}

/// Errors from the external-process runner.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("{name} binary not found in PATH")]
    BinaryNotFound { name: String },

    #[error("spawning {cmd}: {source}")]
    Spawn {
        cmd: String,
        source: std::io::Error,
    },

    #[error("command failed: {cmd}: {output}")]
    Failed { cmd: String, output: String },

    #[error("no stub for command: {0}")]
    NoStub(String),
}
