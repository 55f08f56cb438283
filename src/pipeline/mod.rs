pub mod coordinator;
pub mod runner;
pub mod sink;

pub use coordinator::{BatchCoordinator, FlushError, FlushReport};
pub use runner::{run_flusher, FlushStats, Pipeline, PipelineError};
pub use sink::{create_channel, LogSink, Receiver, Sender};
