//! Integration tests for config file loading and cache folder resolution
//!
//! Uses serial_test for tests that touch CITEMAP_* environment variables.

use citemap_common::config::{
    load_or_default, load_toml_config, resolve_cache_folder, write_atomic, write_toml_config,
    TomlConfig, CACHE_FOLDER_ENV_VAR, CONFIG_ENV_VAR,
};
use citemap_common::{AffiliationPolicy, Error};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_write_then_load_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("citemap.toml");

    let mut config = TomlConfig {
        cache_folder: Some(PathBuf::from("/tmp/citemap-cache")),
        affiliation_policy: AffiliationPolicy::Conservative,
        worker_count: 3,
        use_network_proxy: true,
        proxy_url: Some("http://127.0.0.1:8080".to_string()),
        ..Default::default()
    };
    config.geocode.max_variants = 4;

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(&path).unwrap();

    assert_eq!(loaded, config);
    assert!(!temp_dir.path().join("citemap.toml.tmp").exists());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "worker_count = \"many\"").unwrap();

    match load_toml_config(&path) {
        Err(Error::Config(msg)) => assert!(msg.contains("Parse TOML failed")),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("zero.toml");
    std::fs::write(&path, "worker_count = 0").unwrap();

    assert!(matches!(load_toml_config(&path), Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_missing_explicit_file_falls_back_to_defaults() {
    env::remove_var(CONFIG_ENV_VAR);
    let config = load_or_default(Some(Path::new("/nonexistent/citemap.toml"))).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_config_env_var_is_used() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("env.toml");
    std::fs::write(&path, "worker_count = 2").unwrap();

    env::set_var(CONFIG_ENV_VAR, &path);
    let config = load_or_default(None).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.worker_count, 2);
}

#[test]
#[serial]
fn test_cache_folder_priority() {
    env::remove_var(CACHE_FOLDER_ENV_VAR);

    // CLI beats everything
    let resolved = resolve_cache_folder(Some(Path::new("/cli")), Some(Path::new("/toml")));
    assert_eq!(resolved, PathBuf::from("/cli"));

    // TOML used when no CLI/ENV
    let resolved = resolve_cache_folder(None, Some(Path::new("/toml")));
    assert_eq!(resolved, PathBuf::from("/toml"));

    // ENV beats TOML
    env::set_var(CACHE_FOLDER_ENV_VAR, "/from-env");
    let resolved = resolve_cache_folder(None, Some(Path::new("/toml")));
    env::remove_var(CACHE_FOLDER_ENV_VAR);
    assert_eq!(resolved, PathBuf::from("/from-env"));

    // Compiled default otherwise
    let resolved = resolve_cache_folder(None, None);
    assert!(!resolved.as_os_str().is_empty());
}

#[test]
fn test_write_atomic_creates_parent_dirs() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("a").join("b").join("data.json");

    write_atomic(&path, b"{}").unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    assert!(!path.with_file_name("data.json.tmp").exists());
}
