//! Core data models for the name generator and its buckets.
//!
//! Persistent entities map to database rows via `sqlx::FromRow` and serialize
//! as camelCase JSON via `serde`.

pub mod bucket;
pub mod pair;
