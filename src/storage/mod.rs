pub mod duckdb;
pub mod traits;

pub use self::duckdb::DuckDbStorage;
pub use traits::{
    ExistingRecord, LevelCount, LogRecord, LogStore, RecordUpdate, RetentionScope, StorageError,
};
