//! The iris worker: consumes the inbound SQS queue and runs the trigger
//! firer against the configured stores.

pub mod config;
pub mod queue;

pub use config::WorkerConfig;
pub use queue::{Consumer, MessageQueue, SqsQueue};
