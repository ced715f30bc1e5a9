//! Integration tests for settings resolution and credential encryption.

use std::path::PathBuf;

use tempfile::tempdir;

use maxdeploy::settings::{encrypt_settings, Overrides, Settings};

#[test]
fn settings_precedence_is_cli_then_file_then_default() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{
    "host": "file-host.example.com",
    "ssl": false,
    "deploy": { "recursive": false }
}"#,
    )
    .unwrap();

    let overrides = Overrides {
        host: Some("cli-host.example.com".to_string()),
        ..Overrides::default()
    };
    let settings = Settings::load(&path, &overrides).unwrap();

    // CLI wins over file
    assert_eq!(settings.host.as_deref(), Some("cli-host.example.com"));
    // file wins over defaults
    assert!(!settings.ssl);
    assert_eq!(settings.port, 80);
    assert!(!settings.deploy.recursive);
    // untouched defaults survive
    assert_eq!(settings.context, "maximo");
    assert_eq!(settings.deploy.delete_list, PathBuf::from("delete.json"));
}

#[test]
fn encrypted_credentials_round_trip_through_the_settings_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{"host": "max.example.com", "username": "maxadmin", "password": "s3cret!"}"#,
    )
    .unwrap();

    encrypt_settings(&path, None).unwrap();

    // the stored value is unreadable and marked
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("s3cret!"));
    assert!(raw.contains("{encrypted}"));
    assert!(dir.path().join(".settings.json.key").exists());

    // loading and validating recovers the plaintext transparently
    let mut settings = Settings::load(&path, &Overrides::default()).unwrap();
    settings.validate_log().unwrap();
    assert_eq!(settings.password.as_deref(), Some("s3cret!"));
}

#[test]
fn second_encrypt_run_refuses_to_double_encrypt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"password": "secret", "apikey": "key"}"#).unwrap();

    encrypt_settings(&path, None).unwrap();
    let err = encrypt_settings(&path, None).unwrap_err();
    assert!(err.to_string().contains("already encrypted"));
}
