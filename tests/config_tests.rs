use logsift::config::{generate::generate_starter_config, load_config, ConfigError};
use logsift::event::Severity;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(&config_path, generate_starter_config()).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.storage.table, "app_logs");
    assert!(!config.storage.path.starts_with("~"));
    assert_eq!(config.filter.minimum_level, Severity::Information);
    assert_eq!(config.filter.excluded_keywords, vec!["healthcheck"]);
    assert!(config.dedup.enabled);
    assert_eq!(config.dedup.window_minutes, 5);
    assert_eq!(config.dedup.cache_ttl_minutes, 10);
    assert_eq!(config.flush.interval, Some(Duration::from_secs(5)));
    assert_eq!(config.retention.days_for(Severity::Error), 90);
    assert_eq!(config.retention.days_for(Severity::Debug), 7);
    assert_eq!(config.retention.schedule, Some(Duration::from_secs(24 * 60 * 60)));
}

#[test]
fn test_minimal_config_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    let db_path = temp_dir.path().join("logs.duckdb");
    fs::write(
        &config_path,
        format!("storage:\n  path: {}\n", db_path.display()),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();

    assert_eq!(config.storage.path, db_path);
    assert_eq!(config.filter.minimum_level, Severity::Verbose);
    assert_eq!(config.flush.batch_size, 100);
    assert_eq!(config.retention.batch_size, 500);
    assert_eq!(config.retention.max_batches_per_run, 10);
    assert_eq!(config.retention.days_for(Severity::Warning), 60);
    assert_eq!(config.retention.schedule, None);
}

#[test]
fn test_env_vars_expand_in_storage_path() {
    std::env::set_var("LOGSIFT_IT_DATA_DIR", "/srv/logsift");
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(
        &config_path,
        "storage:\n  path: $env{LOGSIFT_IT_DATA_DIR}/logs.duckdb\n",
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.storage.path.to_str(), Some("/srv/logsift/logs.duckdb"));
}

#[test]
fn test_invalid_config_reports_every_problem() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(
        &config_path,
        r#"
storage:
  path: /tmp/logs.duckdb
  table: "app-logs; drop"
dedup:
  window_minutes: 15
  cache_ttl_minutes: 10
filter:
  excluded_patterns:
    - '(unclosed'
"#,
    )
    .unwrap();

    match load_config(&config_path) {
        Err(ConfigError::ValidationList(errors)) => {
            assert_eq!(errors.len(), 3, "unexpected errors: {:?}", errors);
            assert!(errors.iter().any(|e| e.contains("storage.table")));
            assert!(errors.iter().any(|e| e.contains("cache_ttl_minutes")));
            assert!(errors.iter().any(|e| e.contains("excluded_patterns")));
        }
        other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_missing_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = load_config(&temp_dir.path().join("absent.yml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}
