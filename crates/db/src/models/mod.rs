//! Row structs for the dispatcher tables.
//!
//! Each submodule holds a `FromRow` struct mirroring the table and a
//! conversion into the `iris-core` domain type. Enum columns are stored as
//! their string form and parsed on the way out.

pub mod client_settings;
pub mod dispatch;
pub mod trigger;
