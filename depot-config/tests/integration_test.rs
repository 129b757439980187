//! Integration tests for depot-config

use depot_config::*;
use std::env;
use std::fs;
use std::path::PathBuf;

fn scratch_file(name: &str, content: &str) -> PathBuf {
    let dir = env::temp_dir().join(format!("depot-config-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_toml_file_layer() {
    let path = scratch_file(
        "service.toml",
        r#"
        [database]
        url = "postgres://depot@localhost/inventory"
        pool_size = 20

        [namespace]
        prefix = "org_"
        suffix = ""

        [listener]
        legacy_discriminators = false

        [listener.retry]
        initial_delay_ms = 250
        "#,
    );

    let config = DepotConfig::builder().without_env().file(&path).build().unwrap();

    assert_eq!(config.database.url.as_deref(), Some("postgres://depot@localhost/inventory"));
    assert_eq!(config.database.pool_size, 20);
    assert_eq!(config.database.connect_timeout_secs, 30);
    assert_eq!(config.namespace.prefix, "org_");
    assert_eq!(config.namespace.suffix, "");
    assert!(!config.listener.legacy_discriminators);
    assert_eq!(config.listener.retry.initial_delay_ms, 250);
    assert_eq!(config.listener.retry.max_attempts, 8);
}

#[test]
fn test_json_file_layer() {
    let path = scratch_file(
        "service.json",
        r#"{"boundary": {"tenant_header": "x-org-id"}, "log": {"level": "debug", "color": false}}"#,
    );

    let config = DepotConfig::builder().without_env().file(&path).build().unwrap();
    assert_eq!(config.boundary.tenant_header, "x-org-id");
    assert_eq!(config.log.level, "debug");
    assert!(!config.log.color);
}

#[test]
fn test_environment_overrides_file() {
    let path = scratch_file("layered.toml", "[database]\npool_size = 20\n");

    unsafe {
        env::set_var("DEPOT_ITEST_DATABASE__POOL_SIZE", "5");
        env::set_var("DEPOT_ITEST_LISTENER__CHANNEL", "tenants.v2");
    }

    let config = DepotConfig::builder()
        .env_prefix("DEPOT_ITEST_")
        .file(&path)
        .set("listener.concurrency", 2)
        .build()
        .unwrap();

    assert_eq!(config.database.pool_size, 5);
    assert_eq!(config.listener.channel, "tenants.v2");
    assert_eq!(config.listener.concurrency, 2);

    unsafe {
        env::remove_var("DEPOT_ITEST_DATABASE__POOL_SIZE");
        env::remove_var("DEPOT_ITEST_LISTENER__CHANNEL");
    }
}

#[test]
fn test_missing_file() {
    let err = DepotConfig::builder()
        .without_env()
        .file("/nonexistent/depot.toml")
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::LoadError(_)));
}

#[test]
fn test_retry_bounds_checked() {
    let err = DepotConfig::builder()
        .without_env()
        .set("listener.retry.initial_delay_ms", 5_000)
        .set("listener.retry.max_delay_ms", 1_000)
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("listener.retry.max_delay_ms"));
}
