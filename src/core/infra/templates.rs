//! The embedded terraform template tree.
//!
//! Templates ship inside the binary and are staged into a temporary
//! working directory on `Manager::init`, so provisioning never depends on
//! files in the user's working tree.

use std::fs;
use std::path::Path;

/// `(relative path, contents)` of every bundled template file.
pub const TEMPLATES: &[(&str, &str)] = &[
    ("main.tf", include_str!("templates/main.tf")),
    ("variables.tf", include_str!("templates/variables.tf")),
    ("outputs.tf", include_str!("templates/outputs.tf")),
    (
        "modules/resource/main.tf",
        include_str!("templates/modules/resource/main.tf"),
    ),
    (
        "modules/resource/variables.tf",
        include_str!("templates/modules/resource/variables.tf"),
    ),
    (
        "modules/resource/outputs.tf",
        include_str!("templates/modules/resource/outputs.tf"),
    ),
    (
        "modules/app/main.tf",
        include_str!("templates/modules/app/main.tf"),
    ),
    (
        "modules/app/variables.tf",
        include_str!("templates/modules/app/variables.tf"),
    ),
    (
        "modules/app/outputs.tf",
        include_str!("templates/modules/app/outputs.tf"),
    ),
];

/// Writes the full template tree under `dir`.
pub fn write_all(dir: &Path) -> std::io::Result<()> {
    for (rel, contents) in TEMPLATES {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
    }
    Ok(())
}
