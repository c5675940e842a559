use std::{env, fs};

use gatesync_server::AppConfig;
use gatesync_server::config::ClusterRole;
use gatesync_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("gatesync.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 9191

[logging]
level = "debug"

[sync]
bulk_items = 50
distributed = true
period_ms = 5000

[sync.retry]
initial_backoff_ms = 250
max_attempts = 8

[cluster]
role = "replica"

[storage]
fixture = "store.json"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses, unspecified fields keep their defaults
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 9191);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.sync.bulk_items, 50);
    assert!(cfg.sync.distributed);
    assert_eq!(cfg.sync.worker_threads, 4);
    assert_eq!(cfg.sync.retry.initial_backoff_ms, 250);
    assert_eq!(cfg.sync.retry.max_backoff_ms, 60_000);
    assert_eq!(cfg.sync.retry.max_attempts, Some(8));
    assert_eq!(cfg.cluster.role, ClusterRole::Replica);
    assert_eq!(cfg.storage.fixture.as_deref(), Some(std::path::Path::new("store.json")));

    // 2) Env override should win over file
    unsafe {
        env::set_var("GATESYNC__SYNC__BULK_ITEMS", "7");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.sync.bulk_items, 7);
    unsafe {
        env::remove_var("GATESYNC__SYNC__BULK_ITEMS");
    }

    // 3) Invalid config should error
    let invalid_path = dir.path().join("invalid.toml");
    fs::write(&invalid_path, "[sync]\nbulk_items = 0\n").expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("bulk_items must be > 0"));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let cfg = load_config(path.to_str()).expect("defaults are valid");
    assert!(!cfg.sync.distributed);
    assert_eq!(cfg.server.port, 8082);
    assert_eq!(cfg.sync.period_ms, 10_000);
}

#[test]
fn default_config_round_trips_through_toml() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("rendered.toml");

    let rendered = toml::to_string(&AppConfig::default()).expect("render toml");
    fs::write(&path, rendered).expect("write toml");

    let cfg = load_config(path.to_str()).expect("rendered defaults parse");
    assert_eq!(cfg.server.port, AppConfig::default().server.port);
    assert_eq!(cfg.sync.task_timeout_ms, 60_000);
}
