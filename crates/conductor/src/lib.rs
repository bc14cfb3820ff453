//! Dispatch orchestration for the iris notification service.
//!
//! - [`conductor::Conductor`] routes inbound queue messages.
//! - [`engine::DispatchEngine`] owns the dispatch state machine.
//! - [`firer::TriggerFirer`] fires scheduled dispatches when they come due.
//! - [`store`] and [`gateway`] are the persistence and provider seams.

pub mod conductor;
pub mod config;
pub mod engine;
pub mod firer;
pub mod gateway;
pub mod messages;
pub mod store;

pub use conductor::{Conductor, Handled};
pub use engine::{CreateOutcome, DispatchEngine, FireOutcome, SkipReason};
pub use firer::TriggerFirer;
