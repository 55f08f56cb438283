use super::traits::{
    ExistingRecord, LevelCount, LogRecord, LogStore, RecordUpdate, RetentionScope, StorageError,
};
use crate::event::Severity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::types::Value;
use duckdb::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, epoch_us(timestamp), level, message, exception, properties, raw_event, \
     message_hash, epoch_us(COALESCE(first_occurrence, timestamp)), \
     epoch_us(COALESCE(last_occurrence, timestamp)), occurrence_count, dedup_window_minutes";

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Extract PID from a DuckDB lock error message: "... (PID 12345) ..."
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

fn remove_lock_files(db_path: &Path) -> std::io::Result<()> {
    for suffix in ["wal", "lock"] {
        let path = PathBuf::from(format!("{}.{}", db_path.display(), suffix));
        if path.exists() {
            std::fs::remove_file(&path)?;
            tracing::info!("Removed stale {} file: {}", suffix, path.display());
        }
    }
    Ok(())
}

/// Open a database file, clearing lock files left behind by a dead process.
fn open_with_lock_recovery(path: &Path) -> Result<Connection, StorageError> {
    let err = match Connection::open(path) {
        Ok(conn) => return Ok(conn),
        Err(e) => e,
    };

    let error_msg = err.to_string();
    if !error_msg.contains("Could not set lock") {
        return Err(err.into());
    }

    tracing::warn!("Database lock detected: {}", error_msg);
    let Some(pid) = extract_pid_from_lock_error(&error_msg) else {
        return Err(err.into());
    };

    if is_process_running(pid) {
        tracing::error!(pid, "Lock holder is still running, cannot open database");
        return Err(err.into());
    }

    tracing::warn!(pid, "Lock holder is not running, removing stale lock files");
    remove_lock_files(path).map_err(|e| StorageError::Database(format!("failed to remove lock files: {}", e)))?;
    Ok(Connection::open(path)?)
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Database(format!("Task join error: {}", e))
}

fn micros_to_datetime(column: usize, micros: i64) -> duckdb::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        duckdb::Error::FromSqlConversionFailure(
            column,
            duckdb::types::Type::BigInt,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid timestamp")),
        )
    })
}

fn parse_uuid(column: usize, value: &str) -> duckdb::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        duckdb::Error::FromSqlConversionFailure(column, duckdb::types::Type::Text, Box::new(e))
    })
}

fn record_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<LogRecord> {
    Ok(LogRecord {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        timestamp: micros_to_datetime(1, row.get(1)?)?,
        level: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        message: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        exception: row.get(4)?,
        properties: row.get(5)?,
        raw_event: row.get(6)?,
        message_hash: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        first_occurrence: micros_to_datetime(8, row.get(8)?)?,
        last_occurrence: micros_to_datetime(9, row.get(9)?)?,
        occurrence_count: row.get(10)?,
        dedup_window_minutes: u32::try_from(row.get::<_, i32>(11)?).unwrap_or_default(),
    })
}

/// SQL predicate selecting the records a retention scope covers.
fn scope_predicate(scope: RetentionScope) -> (String, Option<&'static str>) {
    match scope {
        RetentionScope::Level(severity) => ("level = ?".to_string(), Some(severity.as_str())),
        RetentionScope::Other => {
            let known = Severity::ALL
                .iter()
                .map(|s| format!("'{}'", s.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            (format!("(level IS NULL OR level NOT IN ({}))", known), None)
        }
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// DuckDB implementation of the LogStore trait
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
    table: Arc<str>,
}

impl DuckDbStorage {
    /// Open (or create) a database file. `table` must be a plain SQL identifier.
    pub fn new<P: AsRef<Path>>(path: P, table: &str) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Database(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = open_with_lock_recovery(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: Arc::from(table),
        })
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: Arc::from("app_logs"),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl LogStore for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let table = self.table.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    id UUID PRIMARY KEY,
                    timestamp TIMESTAMP NOT NULL,
                    level VARCHAR(50),
                    message TEXT,
                    exception TEXT,
                    properties VARCHAR,
                    raw_event VARCHAR,
                    message_hash VARCHAR(64),
                    first_occurrence TIMESTAMP,
                    last_occurrence TIMESTAMP,
                    occurrence_count BIGINT NOT NULL DEFAULT 1,
                    dedup_window_minutes INTEGER NOT NULL DEFAULT 5
                );
                CREATE INDEX IF NOT EXISTS idx_{t}_timestamp ON {t}(timestamp);
                CREATE INDEX IF NOT EXISTS idx_{t}_level ON {t}(level);
                CREATE INDEX IF NOT EXISTS idx_{t}_message_hash ON {t}(message_hash);
                CREATE INDEX IF NOT EXISTS idx_{t}_message_hash_last ON {t}(message_hash, last_occurrence);",
                t = table
            ))?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn batch_lookup_by_hash(
        &self,
        hashes: &[String],
        window_start: DateTime<Utc>,
    ) -> Result<HashMap<String, ExistingRecord>, StorageError> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn.clone();
        let sql = format!(
            "SELECT message_hash, id, epoch_us(last_occurrence)
             FROM {}
             WHERE message_hash IN ({}) AND last_occurrence > make_timestamp(?::BIGINT)
             ORDER BY message_hash, last_occurrence DESC",
            self.table,
            placeholders(hashes.len())
        );
        let mut params: Vec<Value> = hashes.iter().cloned().map(Value::Text).collect();
        params.push(Value::BigInt(window_start.timestamp_micros()));

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&sql)?;

            let rows = stmt.query_map(duckdb::params_from_iter(params), |row| {
                let hash: String = row.get(0)?;
                let id = parse_uuid(1, &row.get::<_, String>(1)?)?;
                let last_occurrence = micros_to_datetime(2, row.get(2)?)?;
                Ok((hash, ExistingRecord { id, last_occurrence }))
            })?;

            let mut found = HashMap::new();
            for row in rows {
                let (hash, record) = row?;
                // Rows arrive newest first per hash
                found.entry(hash).or_insert(record);
            }
            Ok(found)
        })
        .await
        .map_err(join_error)?
    }

    async fn batch_insert(&self, records: &[LogRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let conn = self.conn.clone();
        let records = records.to_vec();
        let sql = format!(
            "INSERT INTO {} (id, timestamp, level, message, exception, properties, raw_event,
                 message_hash, first_occurrence, last_occurrence, occurrence_count, dedup_window_minutes)
             VALUES (?, make_timestamp(?::BIGINT), ?, ?, ?, ?, ?, ?, make_timestamp(?::BIGINT), make_timestamp(?::BIGINT), ?, ?)",
            self.table
        );

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for record in &records {
                    stmt.execute(duckdb::params![
                        record.id.to_string(),
                        record.timestamp.timestamp_micros(),
                        record.level,
                        record.message,
                        record.exception,
                        record.properties,
                        record.raw_event,
                        record.message_hash,
                        record.first_occurrence.timestamp_micros(),
                        record.last_occurrence.timestamp_micros(),
                        record.occurrence_count,
                        i64::from(record.dedup_window_minutes),
                    ])?;
                }
            }
            tx.commit()?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn batch_update(&self, updates: &[RecordUpdate]) -> Result<(), StorageError> {
        if updates.is_empty() {
            return Ok(());
        }

        let conn = self.conn.clone();
        let updates = updates.to_vec();
        // last_occurrence never moves backwards; timestamp follows it
        let sql = format!(
            "UPDATE {}
             SET last_occurrence = GREATEST(COALESCE(last_occurrence, timestamp), make_timestamp(?::BIGINT)),
                 timestamp = GREATEST(COALESCE(last_occurrence, timestamp), make_timestamp(?::BIGINT)),
                 occurrence_count = occurrence_count + ?
             WHERE id = ?",
            self.table
        );

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for update in &updates {
                    let micros = update.last_occurrence.timestamp_micros();
                    stmt.execute(duckdb::params![
                        micros,
                        micros,
                        update.increment_by,
                        update.id.to_string(),
                    ])?;
                }
            }
            tx.commit()?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn batch_delete_older_than(
        &self,
        scope: RetentionScope,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.clone();
        let table = self.table.clone();
        let (predicate, level) = scope_predicate(scope);
        let select_sql = format!(
            "SELECT id FROM {t}
             WHERE {p} AND COALESCE(last_occurrence, timestamp) < make_timestamp(?::BIGINT)
             ORDER BY COALESCE(last_occurrence, timestamp)
             LIMIT {n}",
            t = table,
            p = predicate,
            n = limit
        );

        let mut select_params: Vec<Value> = Vec::with_capacity(2);
        if let Some(level) = level {
            select_params.push(Value::Text(level.to_string()));
        }
        select_params.push(Value::BigInt(cutoff.timestamp_micros()));

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;

            let ids = {
                let mut stmt = tx.prepare(&select_sql)?;
                let rows = stmt.query_map(duckdb::params_from_iter(select_params), |row| {
                    parse_uuid(0, &row.get::<_, String>(0)?)
                })?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row?);
                }
                ids
            };

            if !ids.is_empty() {
                let delete_sql = format!(
                    "DELETE FROM {} WHERE id IN ({})",
                    table,
                    placeholders(ids.len())
                );
                tx.execute(
                    &delete_sql,
                    duckdb::params_from_iter(ids.iter().map(|id| id.to_string())),
                )?;
            }
            tx.commit()?;

            Ok::<Vec<Uuid>, StorageError>(ids)
        })
        .await
        .map_err(join_error)?
    }

    async fn count_older_than(
        &self,
        scope: RetentionScope,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let conn = self.conn.clone();
        let (predicate, level) = scope_predicate(scope);
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} AND COALESCE(last_occurrence, timestamp) < make_timestamp(?::BIGINT)",
            self.table, predicate
        );

        let mut params: Vec<Value> = Vec::with_capacity(2);
        if let Some(level) = level {
            params.push(Value::Text(level.to_string()));
        }
        params.push(Value::BigInt(cutoff.timestamp_micros()));

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let count: i64 =
                conn.query_row(&sql, duckdb::params_from_iter(params), |row| row.get(0))?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
        .await
        .map_err(join_error)?
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<LogRecord>, StorageError> {
        let conn = self.conn.clone();
        let sql = format!("SELECT {} FROM {} WHERE id = ?", RECORD_COLUMNS, self.table);

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(duckdb::params![id.to_string()])?;

            match rows.next()? {
                Some(row) => Ok(Some(record_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn find_by_hash(&self, message_hash: &str) -> Result<Vec<LogRecord>, StorageError> {
        let conn = self.conn.clone();
        let message_hash = message_hash.to_string();
        let sql = format!(
            "SELECT {} FROM {} WHERE message_hash = ? ORDER BY first_occurrence",
            RECORD_COLUMNS, self.table
        );

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(duckdb::params![message_hash], record_from_row)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
        .map_err(join_error)?
    }

    async fn count_by_level(&self) -> Result<Vec<LevelCount>, StorageError> {
        let conn = self.conn.clone();
        let sql = format!(
            "SELECT level, COUNT(*), CAST(COALESCE(SUM(occurrence_count), 0) AS BIGINT)
             FROM {} GROUP BY level ORDER BY level",
            self.table
        );

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok(LevelCount {
                    level: row.get(0)?,
                    records: row.get(1)?,
                    occurrences: row.get(2)?,
                })
            })?;

            let mut counts = Vec::new();
            for row in rows {
                counts.push(row?);
            }
            Ok(counts)
        })
        .await
        .map_err(join_error)?
    }
}
