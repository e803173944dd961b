//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external libraries:
//! - `artifacts`: model artifact directory loading and digest checks
//! - `linear`: linear classifiers and the center/scale transform
//! - `shapley`: exact Shapley attributions
//! - `sqlite`: SQLite for local storage
//! - `http`: axum routes
//! - `sanitize`: PII filtering for logs

pub mod artifacts;
pub mod http;
pub mod linear;
pub mod sanitize;
pub mod shapley;
pub mod sqlite;

// Re-export storage error for lib.rs
pub use sqlite::StorageError;
