use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use regex::{Regex, RegexBuilder};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a config from YAML text.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    config.storage.path = expand_tilde(&config.storage.path);

    validate_config(&config)?;
    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");
    // Full-line comments may mention the syntax without using it
    let mut unexpanded: Vec<&str> = yaml_string
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| re.captures_iter(line))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
        .collect();

    if unexpanded.is_empty() {
        return Ok(());
    }

    unexpanded.sort();
    unexpanded.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}\n\
         Set them before starting logsift, or replace the $env{{...}} references in the config file",
        unexpanded.join(", ")
    )))
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_storage(&config.storage, &mut errors);
    validate_filter(&config.filter, &mut errors);
    validate_dedup(&config.dedup, &mut errors);
    validate_flush(&config.flush, &mut errors);
    validate_retention(&config.retention, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_storage(storage: &StorageConfig, errors: &mut Vec<String>) {
    // The table name is interpolated into SQL, so only plain identifiers are allowed
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("static regex");
    if !re.is_match(&storage.table) {
        errors.push(format!(
            "storage.table: '{}' is not a valid table name (letters, digits and underscores only)",
            storage.table
        ));
    }
}

fn validate_filter(filter: &FilterConfig, errors: &mut Vec<String>) {
    for (i, pattern) in filter.excluded_patterns.iter().enumerate() {
        if let Err(e) = RegexBuilder::new(pattern).case_insensitive(true).build() {
            errors.push(format!(
                "filter.excluded_patterns[{}]: invalid regex '{}': {}",
                i, pattern, e
            ));
        }
    }

    for (i, keyword) in filter.excluded_keywords.iter().enumerate() {
        if keyword.trim().is_empty() {
            errors.push(format!("filter.excluded_keywords[{}]: keyword cannot be empty", i));
        }
    }
}

fn validate_dedup(dedup: &DedupConfig, errors: &mut Vec<String>) {
    if dedup.window_minutes == 0 {
        errors.push("dedup.window_minutes must be at least 1".to_string());
    }

    if dedup.cache_ttl_minutes < dedup.window_minutes {
        errors.push(format!(
            "dedup.cache_ttl_minutes ({}) must be >= dedup.window_minutes ({})",
            dedup.cache_ttl_minutes, dedup.window_minutes
        ));
    }

    if dedup.eviction_interval.is_some_and(|d| d.is_zero()) {
        errors.push("dedup.eviction_interval must be greater than zero".to_string());
    }
}

fn validate_flush(flush: &FlushConfig, errors: &mut Vec<String>) {
    if flush.batch_size == 0 {
        errors.push("flush.batch_size must be at least 1".to_string());
    }

    if flush.buffer_limit == 0 {
        errors.push("flush.buffer_limit must be at least 1".to_string());
    }

    match flush.interval {
        Some(d) if d.is_zero() => {
            errors.push("flush.interval must be greater than zero".to_string());
        }
        None => {
            errors.push("flush.interval cannot be infinite".to_string());
        }
        _ => {}
    }
}

fn validate_retention(retention: &RetentionConfig, errors: &mut Vec<String>) {
    if retention.default_days == 0 {
        errors.push("retention.default_days must be at least 1".to_string());
    }

    for (level, days) in &retention.levels {
        if *days == 0 {
            errors.push(format!(
                "retention.levels.{}: retention days must be at least 1",
                level.as_str().to_lowercase()
            ));
        }
    }

    if retention.batch_size == 0 {
        errors.push("retention.batch_size must be at least 1".to_string());
    }

    if retention.max_batches_per_run == 0 {
        errors.push("retention.max_batches_per_run must be at least 1".to_string());
    }

    if retention.schedule.is_some_and(|d| d.is_zero()) {
        errors.push("retention.schedule must be greater than zero".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validation_errors(yaml: &str) -> Vec<String> {
        match parse_config(yaml) {
            Err(ConfigError::ValidationList(errors)) => errors,
            other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_valid_minimal_config() {
        let config = parse_config("storage:\n  path: /tmp/logs.duckdb\n").unwrap();
        assert_eq!(config.storage.table, "app_logs");
    }

    #[test]
    fn test_rejects_sql_unsafe_table_name() {
        let errors = validation_errors(
            "storage:\n  path: /tmp/logs.duckdb\n  table: \"logs; DROP TABLE x\"\n",
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("storage.table"));
    }

    #[test]
    fn test_rejects_cache_ttl_shorter_than_window() {
        let errors = validation_errors(
            "storage:\n  path: /tmp/logs.duckdb\ndedup:\n  window_minutes: 15\n  cache_ttl_minutes: 10\n",
        );
        assert!(errors.iter().any(|e| e.contains("cache_ttl_minutes")));
    }

    #[test]
    fn test_collects_every_problem() {
        let yaml = r#"
storage:
  path: /tmp/logs.duckdb
filter:
  excluded_patterns: ["(broken"]
flush:
  batch_size: 0
retention:
  default_days: 0
  max_batches_per_run: 0
"#;
        let errors = validation_errors(yaml);
        assert_eq!(errors.len(), 4, "{:?}", errors);
    }

    #[test]
    fn test_unset_env_var_is_reported() {
        let result = parse_config("storage:\n  path: $env{LOGSIFT_TEST_SURELY_UNSET}/logs.duckdb\n");
        match result {
            Err(ConfigError::Validation(msg)) => assert!(msg.contains("LOGSIFT_TEST_SURELY_UNSET")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_env_reference_in_comment_is_ignored() {
        let yaml = "# paths may use $env{LOGSIFT_TEST_COMMENT_ONLY}\nstorage:\n  path: /tmp/logs.duckdb\n";
        assert!(parse_config(yaml).is_ok());
    }
}
