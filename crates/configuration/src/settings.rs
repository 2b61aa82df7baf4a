use core_types::{HeatmapMetric, Window};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub query: QuerySettings,
    pub percentile: PercentileSettings,
    pub heatmap: HeatmapSettings,
    pub distribution: DistributionSettings,
    pub refresh: RefreshSettings,
    pub logging: LoggingSettings,
}

/// Where the REST API listens.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8000 }
    }
}

/// The SQLite database backing the index store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// A sqlx SQLite URL, e.g. `sqlite://data/summarize_etf.db` or `sqlite::memory:`.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { url: "sqlite://data/summarize_etf.db".to_string(), max_connections: 5 }
    }
}

/// Listing defaults and bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub default_page_size: i64,
    pub max_page_size: i64,
    /// Link to the index's reference page; `{code}` is replaced by the index code.
    pub csindex_url_template: String,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 200,
            csindex_url_template:
                "https://www.csindex.com.cn/#/indices/family/detail?indexCode={code}".to_string(),
        }
    }
}

impl QuerySettings {
    pub fn csindex_url(&self, code: &str) -> String {
        self.csindex_url_template.replace("{code}", code)
    }
}

/// Lengths of the trailing windows, in days.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PercentileSettings {
    pub one_month_days: i64,
    pub three_year_days: i64,
}

impl Default for PercentileSettings {
    fn default() -> Self {
        Self { one_month_days: 30, three_year_days: 1095 }
    }
}

/// Heatmap columns and the percentile palette.
///
/// `thresholds` split [0, 100] into `thresholds.len() + 1` bands and `colors`
/// holds one color per band, coolest first.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeatmapSettings {
    pub metrics: Vec<HeatmapMetric>,
    pub thresholds: Vec<Decimal>,
    pub colors: Vec<String>,
}

impl Default for HeatmapSettings {
    fn default() -> Self {
        Self {
            metrics: HeatmapMetric::ALL.to_vec(),
            thresholds: vec![dec!(30), dec!(70)],
            colors: vec!["#4CAF50".to_string(), "#FFC107".to_string(), "#F44336".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DistributionSettings {
    /// The percentile column that is histogrammed.
    pub window: Window,
    pub bucket_count: usize,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self { window: Window::SinceInception, bucket_count: 10 }
    }
}

/// Background refresh behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    /// A refresh running longer than this is marked failed.
    pub timeout_secs: u64,
    /// Trigger one refresh when the server starts.
    pub on_startup: bool,
    /// Trigger a refresh periodically; `None` disables the scheduler.
    pub schedule_interval_secs: Option<u64>,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            on_startup: true,
            schedule_interval_secs: Some(7 * 24 * 60 * 60),
        }
    }
}

impl RefreshSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Fallback filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), directory: None }
    }
}
