//! Integration tests for configuration loading and settings
//!
//! Uses temporary directories in place of the user config directory

use std::fs;

use alchemist::config::{Config, ConfigManager, Preset};
use alchemist::RunRequest;
use serde_json::json;
use tempfile::TempDir;

#[test]
fn test_defaults_without_file() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = ConfigManager::new(temp_dir.path());
    manager.load().unwrap();

    let config = manager.get_config();
    assert_eq!(config.runner.kill_grace_ms, 1000);
    assert_eq!(config.runner.term, "xterm-256color");
    assert_eq!(config.runner.project_markers, vec!["mix.exs", ".git"]);
    assert!(config.runner.confirm_on_exit);
    assert!(config.ui.show_status_bar);
    assert!(config.ui.follow_output);
    assert!(!config.ui.json_logs);
    assert_eq!(config.presets.len(), 4);
}

#[test]
fn test_load_creates_missing_directory() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("nested").join("alchemist");

    let mut manager = ConfigManager::new(&dir);
    manager.load().unwrap();

    assert!(dir.exists());
    assert_eq!(manager.config_path(), dir.join("config.json"));
}

#[test]
fn test_partial_file_keeps_defaults() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("config.json"),
        r#"{ "runner": { "kill_grace_ms": 250, "env": { "MIX_ENV": "test" } } }"#,
    )
    .unwrap();

    let mut manager = ConfigManager::new(temp_dir.path());
    manager.load().unwrap();

    let config = manager.get_config();
    assert_eq!(config.runner.kill_grace_ms, 250);
    assert_eq!(config.runner.env.get("MIX_ENV").map(String::as_str), Some("test"));
    assert_eq!(config.runner.term, "xterm-256color");
    assert!(config.presets.contains_key("mix-test"));
}

#[test]
fn test_user_presets_extend_defaults() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("config.json"),
        r#"{ "presets": {
            "credo": { "command": "mix credo", "sink": "alchemist-credo" },
            "mix-test": { "command": "mix test --stale", "sink": "alchemist-mix-test" }
        } }"#,
    )
    .unwrap();

    let mut manager = ConfigManager::new(temp_dir.path());
    manager.load().unwrap();

    assert_eq!(manager.preset("credo").unwrap().command, "mix credo");
    assert_eq!(manager.preset("mix-test").unwrap().command, "mix test --stale");
    assert_eq!(manager.preset("iex").unwrap().command, "iex -S mix");
    assert_eq!(manager.get_config().presets.len(), 5);
}

#[test]
fn test_invalid_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("config.json"), "{ not json").unwrap();

    let mut manager = ConfigManager::new(temp_dir.path());
    let err = manager.load().unwrap_err();
    assert!(err.to_string().contains("Failed to parse config"));
}

#[test]
fn test_save_and_reload() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = ConfigManager::new(temp_dir.path());
    manager.load().unwrap();

    manager
        .update_setting("runner.killGraceMs", json!(50))
        .unwrap();
    manager
        .update_setting("ui.followOutput", json!(false))
        .unwrap();
    manager.get_config_mut().presets.insert(
        "credo".to_string(),
        Preset::new("mix credo", "alchemist-credo", "elixir"),
    );
    manager.save().unwrap();

    let mut reloaded = ConfigManager::new(temp_dir.path());
    reloaded.load().unwrap();
    assert_eq!(reloaded.get_setting("runner.killGraceMs").unwrap(), json!(50));
    assert_eq!(reloaded.get_setting("ui.followOutput").unwrap(), json!(false));
    assert_eq!(reloaded.preset("credo").unwrap().command, "mix credo");
}

#[test]
fn test_setting_errors() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = ConfigManager::new(temp_dir.path());

    assert!(manager
        .update_setting("runner.killGraceMs", json!("soon"))
        .is_err());
    assert!(manager.update_setting("editor.tabSize", json!(4)).is_err());
    assert!(manager.get_setting("editor.tabSize").is_err());
}

#[test]
fn test_presets_become_requests() {
    let config = Config::default();
    let preset = &config.presets["mix-compile"];

    let request = RunRequest::from_preset("mix-compile", preset);
    assert_eq!(request.command, "mix compile");
    assert_eq!(request.name, "mix-compile");
    assert_eq!(request.sink_id, "alchemist-mix-compile");
    assert_eq!(request.mode.as_deref(), Some("elixir"));

    let manager = ConfigManager::new(TempDir::new().unwrap().path());
    assert!(manager.preset("no-such-preset").is_err());
}
