//! # Index Analytics
//!
//! Percentile ranking of index prices and the aggregate views built on it.
//!
//! ## Architectural Principles
//!
//! - **Pure Logic:** This crate has no knowledge of the database or the web
//!   layer. It depends only on `core-types` and `configuration`.
//! - **Stateless Calculation:** The same observations and configuration always
//!   produce the same snapshot, so a refresh can be repeated safely.
//!
//! ## Public API
//!
//! - `PercentileEngine`: per-index window percentiles and 3-year stats.
//! - `ColorScale`: percentile → palette color.
//! - `build_heatmap` / `build_distribution`: the two aggregate views.
//! - `SnapshotBuilder` / `AnalyticsSnapshot`: everything a refresh publishes.
//! - `AnalyticsError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod color;
pub mod distribution;
pub mod error;
pub mod heatmap;
pub mod percentile;
pub mod snapshot;

// Re-export the key components to create a clean, public-facing API.
pub use color::ColorScale;
pub use distribution::build_distribution;
pub use error::AnalyticsError;
pub use heatmap::build_heatmap;
pub use percentile::{percentile_rank, window_stats, IndexMetrics, PercentileEngine};
pub use snapshot::{AnalyticsSnapshot, SnapshotBuilder};
