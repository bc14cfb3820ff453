//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod client_settings_repo;
pub mod dispatch_repo;
pub mod trigger_repo;

pub use client_settings_repo::ClientSettingsRepo;
pub use dispatch_repo::DispatchRepo;
pub use trigger_repo::TriggerRepo;
