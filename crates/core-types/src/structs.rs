use crate::enums::{HeatmapMetric, TaskStatus, Window};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A row of the `indices` table: the metadata of one tracked index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub code: String,
    pub name: String,
    pub full_name: Option<String>,
    /// Price of the latest observation, `None` until the first one arrives.
    pub current_price: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

/// A single closing price of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

/// High/low/mean of the prices inside one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStats {
    pub high: Decimal,
    pub low: Decimal,
    pub avg: Decimal,
}

/// Fewest observations a window needs before its percentile and stats are defined.
pub const MIN_OBSERVATIONS: usize = 2;

/// Everything a refresh derives from one index's history. Persisted so a
/// restarted process serves the last refresh's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetrics {
    pub current_price: Decimal,
    pub as_of: DateTime<Utc>,
    pub observation_count: usize,
    pub percentile_1m: Option<Decimal>,
    pub percentile_3y: Option<Decimal>,
    pub percentile_since_inception: Option<Decimal>,
    pub stats_3y: Option<WindowStats>,
}

impl IndexMetrics {
    pub fn percentile(&self, window: Window) -> Option<Decimal> {
        match window {
            Window::OneMonth => self.percentile_1m,
            Window::ThreeYear => self.percentile_3y,
            Window::SinceInception => self.percentile_since_inception,
        }
    }

    /// True when even the since-inception window is too short to rank.
    pub fn is_insufficient(&self) -> bool {
        self.observation_count < MIN_OBSERVATIONS
    }
}

/// The list view of one index as served to the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub code: String,
    pub name: String,
    pub full_name: Option<String>,
    pub csindex_url: String,
    pub current_price: Option<Decimal>,
    pub percentile_1m: Option<Decimal>,
    pub percentile_3y: Option<Decimal>,
    pub percentile_since_inception: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl IndexSummary {
    pub fn percentile(&self, window: Window) -> Option<Decimal> {
        match window {
            Window::OneMonth => self.percentile_1m,
            Window::ThreeYear => self.percentile_3y,
            Window::SinceInception => self.percentile_since_inception,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDetail {
    pub summary: IndexSummary,
    pub high_3y: Option<Decimal>,
    pub low_3y: Option<Decimal>,
    pub avg_3y: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPage {
    pub items: Vec<IndexSummary>,
    pub total: usize,
    pub page: i64,
    pub page_size: i64,
}

/// Raw listing parameters as they arrive on the query string. Validation
/// happens in the query service, which knows the configured bounds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListIndicesParams {
    pub q: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub index_code: String,
    pub index_name: String,
    pub metric: HeatmapMetric,
    pub value: Decimal,
    pub percentile: Decimal,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub metrics: Vec<HeatmapMetric>,
    pub cells: Vec<HeatmapCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionBucket {
    pub bucket: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// The percentile column being histogrammed.
    pub metric: Window,
    pub buckets: Vec<DistributionBucket>,
    /// Indices left out because their percentile is null.
    pub excluded: usize,
}

/// A row of the `refresh_tasks` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total_count: usize,
    pub processed_count: usize,
    pub insufficient_count: usize,
    pub progress_percent: Decimal,
}

impl TaskProgress {
    pub fn new(total_count: usize) -> Self {
        let mut progress = Self { total_count, ..Self::default() };
        progress.recalculate();
        progress
    }

    pub fn record(&mut self, insufficient: bool) {
        self.processed_count += 1;
        if insufficient {
            self.insufficient_count += 1;
        }
        self.recalculate();
    }

    fn recalculate(&mut self) {
        self.progress_percent = if self.total_count == 0 {
            Decimal::ONE_HUNDRED
        } else {
            (Decimal::from(self.processed_count) * Decimal::ONE_HUNDRED
                / Decimal::from(self.total_count))
            .round_dp(2)
        };
    }
}

/// A task record together with its live progress, as returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTaskView {
    #[serde(flatten)]
    pub task: RefreshTask,
    pub progress: Option<TaskProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn progress_percent_tracks_processed_share() {
        let mut progress = TaskProgress::new(3);
        assert_eq!(progress.progress_percent, Decimal::ZERO);
        progress.record(false);
        progress.record(true);
        assert_eq!(progress.processed_count, 2);
        assert_eq!(progress.insufficient_count, 1);
        assert_eq!(progress.progress_percent, dec!(66.67));
    }

    #[test]
    fn empty_progress_is_complete() {
        assert_eq!(TaskProgress::new(0).progress_percent, Decimal::ONE_HUNDRED);
    }

    #[test]
    fn summary_serializes_prices_as_numbers_and_nulls() {
        let summary = IndexSummary {
            code: "000300".to_string(),
            name: "CSI 300".to_string(),
            full_name: None,
            csindex_url: "https://example.com/000300".to_string(),
            current_price: Some(dec!(3500.25)),
            percentile_1m: None,
            percentile_3y: Some(dec!(80)),
            percentile_since_inception: None,
            updated_at: DateTime::from_timestamp(0, 0).unwrap(),
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["current_price"], serde_json::json!(3500.25));
        assert!(value["percentile_1m"].is_null());
        assert_eq!(value["percentile_3y"], serde_json::json!(80.0));
    }
}
