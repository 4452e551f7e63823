//! Shipkit - an opinionated platform CLI for app.json-driven projects.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shipkit::cli::output;
use shipkit::cli::{execute, Cli};
use shipkit::error::Error;

fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber with env-filter support
    let filter = EnvFilter::try_from_env("SHIPKIT_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("shipkit=debug")
        } else {
            EnvFilter::new("shipkit=warn")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).without_time())
        .init();

    if let Err(e) = execute(cli.command) {
        // Exit codes are part of the diff contract; pass them through
        // without printing anything extra.
        if let Error::Exit(code) = e {
            std::process::exit(code);
        }

        let suggestion = match &e {
            Error::Manifest(shipkit::error::ManifestError::NotFound { .. }) => {
                Some("run shipkit from the directory containing app.json")
            }
            Error::Sops(shipkit::error::SopsError::NoIdentity { .. }) => {
                Some("set SOPS_AGE_KEY or place your key in the shipkit config directory")
            }
            Error::Secrets(shipkit::error::SecretsError::FileMissing { .. }) => {
                Some("run: shipkit secrets scaffold")
            }
            _ => None,
        };

        output::error(&e.to_string());
        if let Some(hint) = suggestion {
            output::hint(hint);
        }
        std::process::exit(1);
    }
}
