pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSIFT CONFIGURATION
# =============================================================================
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logsift/config.yml
#   3. /etc/logsift/config.yml
#
# Durations accept ms, s, m, h and d suffixes, or 'infinite'.
# $env{VAR} references are expanded from the environment before parsing.

# =============================================================================
# STORAGE
# =============================================================================
storage:
  # DuckDB database file (created if missing)
  path: ~/.local/share/logsift/logs.duckdb
  # Table holding log records
  table: app_logs

# =============================================================================
# FILTER
# =============================================================================
# Events below minimum_level, or whose message or exception text contains an
# excluded keyword (case-insensitive) or matches an excluded pattern, are
# discarded before they are queued.
filter:
  # verbose, debug, information, warning, error or fatal
  minimum_level: information
  excluded_keywords:
    - healthcheck
  excluded_patterns:
    - '^heartbeat \d+$'

# =============================================================================
# DEDUPLICATION
# =============================================================================
# Events with the same level, message and exception inside the window are
# merged into one record with an occurrence count.
dedup:
  enabled: true
  window_minutes: 5
  # Must be >= window_minutes
  cache_ttl_minutes: 10
  # How often stale cache entries are evicted
  eviction_interval: 5m

# =============================================================================
# FLUSH
# =============================================================================
flush:
  # Flush once this many events are buffered...
  batch_size: 100
  # ...or at this interval, whichever comes first
  interval: 5s
  # Events queued beyond this limit are dropped
  buffer_limit: 10000

# =============================================================================
# RETENTION
# =============================================================================
# Records are deleted once their last occurrence is older than the retention
# period for their level. Levels not listed use default_days.
retention:
  enabled: true
  default_days: 30
  levels:
    verbose: 7
    debug: 7
    information: 30
    warning: 60
    error: 90
    fatal: 90
  # Records deleted per batch
  batch_size: 500
  # Hard cap on batches per sweep
  max_batches_per_run: 10
  # Sweep interval while 'logsift run' is active ('infinite' = only via 'logsift sweep')
  schedule: 24h
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::event::Severity;

    #[test]
    fn test_starter_config_parses() {
        let config = parse_config(&generate_starter_config()).unwrap();
        assert_eq!(config.filter.minimum_level, Severity::Information);
        assert_eq!(config.filter.excluded_keywords, vec!["healthcheck"]);
        assert_eq!(config.retention.levels.len(), 6);
        assert!(config.retention.schedule.is_some());
    }
}
