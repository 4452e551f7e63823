//! Shipkit - an opinionated platform CLI for app.json-driven projects.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── cli/              # Command-line interface
//! │   ├── env           # .env generation from the manifest
//! │   ├── secrets       # Secrets lifecycle commands
//! │   ├── infra         # Terraform orchestration commands
//! │   └── completions   # Shell completions
//! └── core/             # Core library components
//!     ├── manifest/     # app.json model: load, validate, merge, diff
//!     ├── sops/         # sops binary wrapper + key providers
//!     ├── secrets/      # Secret file store + env-var resolver
//!     ├── infra/        # Terraform manager + embedded templates
//!     ├── dotenv        # .env serialisation
//!     ├── fs            # Filesystem abstraction (OsFs / MemFs)
//!     └── exec          # External-process abstraction (OsRunner / MemRunner)
//! ```
//!
//! # Features
//!
//! - Single `app.json` manifest describing apps, resources and env vars
//! - Three-source env var resolution: literals, terraform outputs, sops
//! - Safe secrets lifecycle that never corrupts an encrypted file
//! - Terraform staging from embedded templates with typed outputs

pub mod cli;
pub mod core;
pub mod error;
