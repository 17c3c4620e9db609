// Config file tests
// Saving and loading settings through temporary files

mod common;
use common::setup_logging;

use std::path::PathBuf;

use privchat::config::{self, Config, Overrides};

#[test]
fn test_save_and_load_roundtrip_keeps_session_encoded() {
    setup_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    let mut saved = Config { server: "chat.example.com:443".to_string(), secure: true, ..Config::default() };
    saved.set_session("abc");
    config::save_config_to(&saved, &path).unwrap();

    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert!(!on_disk.contains("\"abc\""), "session stored in clear: {}", on_disk);

    let loaded = config::load_config_from(&path).unwrap().unwrap();
    assert_eq!(loaded, saved);
    assert_eq!(loaded.session().as_deref(), Some("abc"));
}

#[test]
fn test_missing_file_is_none_and_broken_file_is_error() {
    setup_logging();
    let dir = tempfile::tempdir().unwrap();
    assert!(config::load_config_from(&dir.path().join("absent.json")).unwrap().is_none());

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    assert!(config::load_config_from(&broken).is_err());
}

#[test]
fn test_load_config_uses_override_path_and_cli_values() {
    setup_logging();
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("privchat.json");
    std::fs::write(&path, r#"{"server": "file.example:8000", "typing_timeout_ms": 2000}"#).unwrap();
    config::set_config_path_override(path.clone()).unwrap();
    assert!(config::set_config_path_override(path).is_err());

    let overrides = Overrides { server: Some("cli.example:9000".to_string()), secure: None, session: Some("tok".to_string()) };
    let config = config::load_config(&overrides).unwrap();
    assert_eq!(config.server, "cli.example:9000");
    assert_eq!(config.typing_timeout_ms, 2000);
    assert_eq!(config.session().as_deref(), Some("tok"));
}
