//! Core data models for the datastream repository.
//!
//! Records map to SQLite rows via `sqlx`; the derived views serialize as JSON
//! via `serde`.

pub mod bundle;
pub mod datastream;
pub mod digest;
pub mod search;
