//! Training infrastructure: loop, timers, progress logging and sinks.

pub mod event_log;
pub mod message_logger;
pub mod pipeline;
pub mod timer;
pub mod tracking;
pub mod train_loop;

pub use event_log::EventLog;
pub use message_logger::{LogRecord, MessageLogger};
pub use pipeline::{PipelineReport, TrainArgs, train_pipeline, train_pipeline_with};
pub use timer::AvgTimer;
pub use tracking::{TrackingArgs, TrackingSession};
pub use train_loop::{LoopConfig, LoopOutcome, Sinks, TrainLoop, every, wandb_record};
