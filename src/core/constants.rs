//! Shared constants: file names, layout paths and the generated-file notice.

/// The manifest file name expected at the working-tree root.
pub const MANIFEST_FILE: &str = "app.json";

/// Directory holding per-environment secret files, relative to the
/// working-tree root. Callers never construct secret paths themselves;
/// see `core::secrets::Store`.
pub const SECRETS_DIR: &str = "resources/secrets";

/// The sops creation-rules file, relative to the working-tree root.
pub const SOPS_CONFIG_FILE: &str = "resources/.sops.yaml";

/// Regex bound to the project recipient in `.sops.yaml`.
pub const SOPS_PATH_REGEX: &str = r"secrets/.*\.yaml$";

/// Environment variable holding the age identity for sops.
pub const AGE_KEY_ENV_VAR: &str = "SOPS_AGE_KEY";

/// File name of the age identity inside the shipkit config directory.
pub const AGE_KEY_FILE: &str = "age.key";

/// Name of the shipkit config directory under the user's config root.
pub const CONFIG_DIR: &str = "shipkit";

/// Environment variable that backs `--environment` flags.
pub const APP_ENVIRONMENT_VAR: &str = "APP_ENVIRONMENT";

/// Notice prepended to every generated `.env` file so mechanical
/// regeneration is visible to humans.
pub const GENERATED_NOTICE: &str = "\
# Generated by shipkit. DO NOT EDIT.
#
# This file is derived from app.json; run `shipkit env generate`
# to regenerate it. Manual changes will be overwritten.
";
