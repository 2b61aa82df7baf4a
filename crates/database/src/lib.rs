//! # Index Store
//!
//! This crate is the durable home of index metadata, price observations,
//! refresh-task records and the per-index metrics of the latest refresh. The
//! heatmap and distribution are not stored; they are rebuilt from the metrics.
//!
//! ## Architectural Principles
//!
//! - **Adapter:** This crate encapsulates all SQL. The rest of the application
//!   talks to `DbRepository` and never sees a query string.
//! - **Append-only history:** observations are only ever inserted, in strictly
//!   increasing timestamp order per index.
//! - **Asynchronous & Pooled:** All operations are asynchronous over a `sqlx`
//!   SQLite pool; migrations are embedded and applied at startup.
//!
//! ## Public API
//!
//! - `connect`: Opens the connection pool from `DatabaseSettings`.
//! - `run_migrations`: Applies the embedded schema migrations.
//! - `DbRepository`: All data access methods.
//! - `DbError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod repository;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use repository::{DbRepository, StoredMetrics};
