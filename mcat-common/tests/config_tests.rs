//! Tests for configuration loading and graceful degradation
//!
//! Tests that set MCAT_CONFIG are marked #[serial] so they never race on the
//! process environment.

use mcat_common::config::{resolve_config_path, EngineConfig, SharedField, CONFIG_ENV_VAR};
use mcat_common::Error;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}

#[test]
fn test_explicit_file_is_loaded() {
    let file = write_config(
        r#"
        [catalog]
        split_suffix = " (part)"
        cluster_shared = ["licensing"]

        [events]
        capacity = 16
        "#,
    );

    let config = EngineConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.catalog.split_suffix, " (part)");
    assert_eq!(config.catalog.cluster_shared, vec![SharedField::Licensing]);
    assert_eq!(config.events.capacity, 16);
}

#[test]
fn test_missing_explicit_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let config = EngineConfig::load(Some(&missing)).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn test_malformed_file_is_an_error() {
    let file = write_config("[catalog\nsplit_suffix = 3");
    let err = EngineConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, Error::TomlParse(_)), "got {:?}", err);
}

#[test]
fn test_unknown_shared_field_is_an_error() {
    let file = write_config("[catalog]\ncluster_shared = [\"tempo\"]\n");
    assert!(EngineConfig::load(Some(file.path())).is_err());
}

#[test]
#[serial]
fn test_env_var_used_when_no_explicit_path() {
    let file = write_config("[events]\ncapacity = 7\n");
    env::set_var(CONFIG_ENV_VAR, file.path());

    let resolved = resolve_config_path(None);
    let config = EngineConfig::load(None);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved.as_deref(), Some(file.path()));
    assert_eq!(config.unwrap().events.capacity, 7);
}

#[test]
#[serial]
fn test_explicit_path_beats_env_var() {
    let from_env = write_config("[events]\ncapacity = 7\n");
    let explicit = write_config("[events]\ncapacity = 9\n");
    env::set_var(CONFIG_ENV_VAR, from_env.path());

    let config = EngineConfig::load(Some(explicit.path()));
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.unwrap().events.capacity, 9);
}

#[test]
#[serial]
fn test_blank_env_var_falls_through_to_platform_dir() {
    env::set_var(CONFIG_ENV_VAR, "  ");
    let resolved = resolve_config_path(None);
    env::remove_var(CONFIG_ENV_VAR);

    if let Some(path) = resolved {
        assert!(path.ends_with("mcat/config.toml"));
    }
}
