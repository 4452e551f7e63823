//! Validate command.

use std::path::Path;

use crate::cli::output;
use crate::core::fs::OsFs;
use crate::core::manifest::Definition;
use crate::error::Result;

/// Load the manifest, which applies defaults and checks every invariant.
pub fn execute() -> Result<()> {
    let fs = OsFs::new();
    let def = Definition::load_from_dir(&fs, Path::new("."))?;

    output::success("app.json is valid");
    output::section(&def.project.name);
    output::kv("apps", def.apps.len());
    output::kv("resources", def.resources.len());
    Ok(())
}
