use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A trailing lookback window over an index's price history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    OneMonth,
    ThreeYear,
    SinceInception,
}

/// A column of the heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeatmapMetric {
    #[serde(rename = "percentile_1m")]
    Percentile1m,
    #[serde(rename = "percentile_3y")]
    Percentile3y,
    #[serde(rename = "percentile_since_inception")]
    PercentileSinceInception,
    #[serde(rename = "distance_to_high_3y")]
    DistanceToHigh3y,
    #[serde(rename = "distance_to_low_3y")]
    DistanceToLow3y,
}

impl HeatmapMetric {
    pub const ALL: [HeatmapMetric; 5] = [
        HeatmapMetric::Percentile1m,
        HeatmapMetric::Percentile3y,
        HeatmapMetric::PercentileSinceInception,
        HeatmapMetric::DistanceToHigh3y,
        HeatmapMetric::DistanceToLow3y,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HeatmapMetric::Percentile1m => "percentile_1m",
            HeatmapMetric::Percentile3y => "percentile_3y",
            HeatmapMetric::PercentileSinceInception => "percentile_since_inception",
            HeatmapMetric::DistanceToHigh3y => "distance_to_high_3y",
            HeatmapMetric::DistanceToLow3y => "distance_to_low_3y",
        }
    }

    /// The window whose percentile this metric reports directly, if any.
    pub fn window(&self) -> Option<Window> {
        match self {
            HeatmapMetric::Percentile1m => Some(Window::OneMonth),
            HeatmapMetric::Percentile3y => Some(Window::ThreeYear),
            HeatmapMetric::PercentileSinceInception => Some(Window::SinceInception),
            HeatmapMetric::DistanceToHigh3y | HeatmapMetric::DistanceToLow3y => None,
        }
    }
}

impl fmt::Display for HeatmapMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a refresh task. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects pending → running → terminal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending | TaskStatus::Running, TaskStatus::Failed) => true,
            (TaskStatus::Running, TaskStatus::Succeeded) => true,
            _ => false,
        }
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(CoreError::invalid("status", format!("unknown task status '{other}'"))),
        }
    }
}

/// Columns the index listing can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Code,
    Name,
    CurrentPrice,
    Percentile(Window),
    UpdatedAt,
}

impl FromStr for SortField {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "code" => Ok(SortField::Code),
            "name" => Ok(SortField::Name),
            "current_price" => Ok(SortField::CurrentPrice),
            "percentile_1m" => Ok(SortField::Percentile(Window::OneMonth)),
            "percentile_3y" => Ok(SortField::Percentile(Window::ThreeYear)),
            // `percentile` is the dashboard's shorthand for the since-inception column.
            "percentile" | "percentile_since_inception" => {
                Ok(SortField::Percentile(Window::SinceInception))
            }
            "updated_at" => Ok(SortField::UpdatedAt),
            other => Err(CoreError::invalid("sort_by", format!("unsupported sort field '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(CoreError::invalid(
                "sort_order",
                format!("expected 'asc' or 'desc', got '{other}'"),
            )),
        }
    }
}
