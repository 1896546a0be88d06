//! Configuration resolution against the real process environment and files
//!
//! Tests that set `MIXPLAN_*` variables are marked `#[serial]` so they never
//! observe each other's environment.

use mixplan_common::config::{
    write_toml_config, ConfigOverrides, EngineConfig, GeneratorToml, TomlConfig, ENV_API_KEY,
    ENV_GENERATOR_TIMEOUT_SECS, ENV_ROOT_FOLDER,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn clear_env() {
    env::remove_var(ENV_ROOT_FOLDER);
    env::remove_var(ENV_API_KEY);
    env::remove_var(ENV_GENERATOR_TIMEOUT_SECS);
}

fn write_config(dir: &TempDir, config: &TomlConfig) -> PathBuf {
    let path = dir.path().join("config.toml");
    write_toml_config(config, &path).unwrap();
    path
}

#[test]
#[serial]
fn test_explicit_config_file_is_loaded() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        &TomlConfig {
            root_folder: Some(dir.path().join("data")),
            generator: GeneratorToml {
                api_key: Some("file-key".to_string()),
                timeout_secs: Some(90),
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let config = EngineConfig::resolve(&ConfigOverrides {
        config_path: Some(path),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(config.root_folder, dir.path().join("data"));
    assert_eq!(config.require_api_key().unwrap(), "file-key");
    assert_eq!(config.generator.timeout, Duration::from_secs(90));
    assert_eq!(config.database_path(), dir.path().join("data").join("mixplan.db"));
}

#[test]
#[serial]
fn test_missing_explicit_config_file_is_an_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let result = EngineConfig::resolve(&ConfigOverrides {
        config_path: Some(dir.path().join("absent.toml")),
        ..Default::default()
    });
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_environment_beats_file_and_cli_beats_environment() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        &TomlConfig {
            root_folder: Some(PathBuf::from("/from/file")),
            generator: GeneratorToml {
                api_key: Some("file-key".to_string()),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    env::set_var(ENV_ROOT_FOLDER, "/from/env");
    env::set_var(ENV_API_KEY, "env-key");

    let from_env = EngineConfig::resolve(&ConfigOverrides {
        config_path: Some(path.clone()),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(from_env.root_folder, PathBuf::from("/from/env"));
    assert_eq!(from_env.require_api_key().unwrap(), "env-key");

    let from_cli = EngineConfig::resolve(&ConfigOverrides {
        config_path: Some(path),
        root_folder: Some(PathBuf::from("/from/cli")),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(from_cli.root_folder, PathBuf::from("/from/cli"));

    clear_env();
}

#[test]
#[serial]
fn test_malformed_timeout_in_environment_is_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &TomlConfig::default());
    env::set_var(ENV_GENERATOR_TIMEOUT_SECS, "0");

    let result = EngineConfig::resolve(&ConfigOverrides {
        config_path: Some(path),
        ..Default::default()
    });
    assert!(result.is_err());

    clear_env();
}

#[test]
fn test_malformed_toml_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "root_folder = [unclosed").unwrap();
    assert!(TomlConfig::load(&path).is_err());
}

#[test]
fn test_toml_round_trip_through_file() {
    let dir = TempDir::new().unwrap();
    let mut config = TomlConfig::default();
    config.logging.level = Some("debug".to_string());
    config.history.prompt_limit = Some(8);
    let path = write_config(&dir, &config);

    assert_eq!(TomlConfig::load(&path).unwrap(), config);
}
