//! Shared domain and API types for the index analytics service.

pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{HeatmapMetric, SortField, SortOrder, TaskStatus, Window};
pub use error::CoreError;
pub use structs::{
    Distribution, DistributionBucket, Heatmap, HeatmapCell, Index, IndexDetail, IndexMetrics,
    IndexPage, IndexSummary, ListIndicesParams, PriceObservation, RefreshTask, RefreshTaskView,
    TaskProgress, WindowStats, MIN_OBSERVATIONS,
};
