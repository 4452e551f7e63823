//! End-to-end tests for the secrets lifecycle commands that run without
//! the external sops binary: scaffold and placeholder sync.

mod support;

use predicates::prelude::*;
use support::{age_identity, Test, SOPS_MANIFEST};

#[test]
fn scaffold_creates_secret_files_and_sops_config() {
    let t = Test::with_manifest(SOPS_MANIFEST);
    let (secret, public) = age_identity();

    t.cmd()
        .args(["secrets", "scaffold"])
        .env("SOPS_AGE_KEY", &secret)
        .assert()
        .success()
        .stdout(predicate::str::contains("created"));

    for env in ["development", "staging", "production"] {
        let rel = format!("resources/secrets/{env}.yaml");
        assert!(t.exists(&rel), "{rel} should exist");
        assert!(t.read(&rel).is_empty(), "{rel} should be empty");
    }

    let config = t.read("resources/.sops.yaml");
    assert!(config.contains("creation_rules"));
    assert!(config.contains(&public));
}

#[test]
fn scaffold_is_idempotent() {
    let t = Test::with_manifest(SOPS_MANIFEST);
    let (secret, _) = age_identity();

    t.cmd()
        .args(["secrets", "scaffold"])
        .env("SOPS_AGE_KEY", &secret)
        .assert()
        .success();

    t.write("resources/secrets/production.yaml", "KEY: kept\n");

    t.cmd()
        .args(["secrets", "scaffold"])
        .env("SOPS_AGE_KEY", &secret)
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to do"));

    assert_eq!(t.read("resources/secrets/production.yaml"), "KEY: kept\n");
}

#[test]
fn scaffold_without_identity_fails() {
    let t = Test::with_manifest(SOPS_MANIFEST);

    t.cmd()
        .args(["secrets", "scaffold"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no SOPS_AGE_KEY found"));
}

#[test]
fn scaffold_rejects_malformed_identity() {
    let t = Test::with_manifest(SOPS_MANIFEST);

    t.cmd()
        .args(["secrets", "scaffold"])
        .env("SOPS_AGE_KEY", "not-an-age-key")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid age key format"));
}

#[test]
fn sync_adds_placeholders_for_declared_keys() {
    let t = Test::with_manifest(SOPS_MANIFEST);
    let (secret, _) = age_identity();

    t.cmd()
        .args(["secrets", "scaffold"])
        .env("SOPS_AGE_KEY", &secret)
        .assert()
        .success();

    t.cmd()
        .args(["secrets", "sync"])
        .env("SOPS_AGE_KEY", &secret)
        .assert()
        .success()
        .stdout(predicate::str::contains("SENTRY_DSN"))
        .stdout(predicate::str::contains("PAYLOAD_SECRET"));

    let prod = t.read("resources/secrets/production.yaml");
    assert!(prod.contains("SENTRY_DSN: \"REPLACE_ME_SENTRY_DSN\""));
    assert!(prod.contains("PAYLOAD_SECRET: \"REPLACE_ME_PAYLOAD_SECRET\""));

    // The app-only secret stays out of environments it isn't declared in.
    let dev = t.read("resources/secrets/development.yaml");
    assert!(dev.contains("SENTRY_DSN"));
    assert!(!dev.contains("PAYLOAD_SECRET"));
}

#[test]
fn sync_preserves_existing_entries() {
    let t = Test::with_manifest(SOPS_MANIFEST);
    let (secret, _) = age_identity();

    t.cmd()
        .args(["secrets", "scaffold"])
        .env("SOPS_AGE_KEY", &secret)
        .assert()
        .success();
    t.write(
        "resources/secrets/production.yaml",
        "PAYLOAD_SECRET: real-value\n",
    );

    t.cmd()
        .args(["secrets", "sync"])
        .env("SOPS_AGE_KEY", &secret)
        .assert()
        .success();

    let prod = t.read("resources/secrets/production.yaml");
    assert!(prod.starts_with("PAYLOAD_SECRET: real-value\n"));
    assert!(!prod.contains("REPLACE_ME_PAYLOAD_SECRET"));
}

#[test]
fn sync_warns_on_missing_files_without_creating_them() {
    let t = Test::with_manifest(SOPS_MANIFEST);
    let (secret, _) = age_identity();

    t.cmd()
        .args(["secrets", "sync"])
        .env("SOPS_AGE_KEY", &secret)
        .assert()
        .success()
        .stdout(predicate::str::contains("is missing"))
        .stdout(predicate::str::contains("shipkit secrets scaffold"));

    assert!(!t.exists("resources/secrets/production.yaml"));
}

#[test]
fn sync_skips_encrypted_files() {
    let t = Test::with_manifest(SOPS_MANIFEST);
    let (secret, _) = age_identity();

    t.cmd()
        .args(["secrets", "scaffold"])
        .env("SOPS_AGE_KEY", &secret)
        .assert()
        .success();
    t.write(
        "resources/secrets/production.yaml",
        "PAYLOAD_SECRET: ENC[AES256_GCM,data:abc]\nsops:\n  age: []\n",
    );

    t.cmd()
        .args(["secrets", "sync"])
        .env("SOPS_AGE_KEY", &secret)
        .assert()
        .success()
        .stdout(predicate::str::contains("encrypted, skipped"));

    let prod = t.read("resources/secrets/production.yaml");
    assert!(!prod.contains("REPLACE_ME"));
}
