//! Deduplicating, retention-managed log persistence.
//!
//! Producers hand [`event::LogEvent`]s to a [`pipeline::LogSink`]; a
//! background task flushes them in batches, folding repeats of the same
//! error into one record per dedup window. A [`retention::RetentionSweeper`]
//! removes expired records in bounded batches.

pub mod cli;
pub mod config;
pub mod dedup;
pub mod event;
pub mod layer;
pub mod pipeline;
pub mod retention;
pub mod storage;
