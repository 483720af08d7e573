//! Integration tests for layered configuration loading

use edgesync::config::{ConfigLoader, ConfigManager};
use edgesync::error::ApiError;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_workspace_config(root: &TempDir, name: &str, body: &str) {
    let dir = root.path().join("config");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), body).unwrap();
}

#[test]
fn test_workspace_file_overrides_defaults() {
    let root = TempDir::new().unwrap();
    write_workspace_config(
        &root,
        "edgesync.toml",
        r#"
[store]
path = "/var/lib/edgesync/store"

[sync]
period_secs = 5
connect_retry_ms = 1000

[logging]
level = "debug"
format = "json"
"#,
    );

    let config = ConfigLoader::load(root.path()).unwrap();
    assert_eq!(config.store.path, PathBuf::from("/var/lib/edgesync/store"));
    assert_eq!(config.sync.period_secs, 5);
    assert_eq!(config.sync.connect_retry_ms, 1000);
    // untouched keys keep their defaults
    assert_eq!(config.sync.request_timeout_ms, 20000);
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_environment_file_layers_over_base() {
    let root = TempDir::new().unwrap();
    write_workspace_config(&root, "edgesync.toml", "[sync]\nperiod_secs = 5\n");
    write_workspace_config(&root, "development.toml", "[sync]\nperiod_secs = 7\n");

    let config = ConfigLoader::load(root.path()).unwrap();
    assert_eq!(config.sync.period_secs, 7);
}

#[test]
fn test_invalid_values_are_rejected() {
    let root = TempDir::new().unwrap();
    let path = root.path().join("bad.toml");
    std::fs::write(&path, "[sync]\nperiod_secs = 0\n\n[logging]\nlevel = \"loud\"\n").unwrap();

    let err = ConfigLoader::load_file(&path).unwrap_err();
    match err {
        ApiError::ConfigError(msg) => {
            assert!(msg.contains("period_secs"));
            assert!(msg.contains("loud"));
        }
        other => panic!("expected a config error, got {:?}", other),
    }
}

#[test]
fn test_manager_keeps_config_when_reload_fails() {
    let root = TempDir::new().unwrap();
    write_workspace_config(&root, "edgesync.toml", "[sync]\nperiod_secs = 5\n");
    let manager = ConfigManager::new(ConfigLoader::load(root.path()).unwrap());

    write_workspace_config(&root, "edgesync.toml", "[sync]\nperiod_secs = 0\n");
    assert!(manager.reload(root.path()).is_err());
    assert_eq!(manager.get().sync.period_secs, 5);

    write_workspace_config(&root, "edgesync.toml", "[sync]\nperiod_secs = 9\n");
    manager.reload(root.path()).unwrap();
    assert_eq!(manager.get().sync.period_secs, 9);
}
