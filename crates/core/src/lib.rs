//! Pure domain types and rules for the iris notification dispatcher.
//!
//! Nothing in this crate performs I/O. The persistence layer (`iris-db`)
//! and the conductor (`iris-conductor`) build on these types.

#[macro_use]
mod macros;

pub mod client;
pub mod content;
pub mod dispatch;
pub mod error;
pub mod policy;
pub mod render;
pub mod retry;
pub mod types;
