use crate::error::ConfigError;
use rust_decimal::Decimal;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{
    Config, DatabaseSettings, DistributionSettings, HeatmapSettings, LoggingSettings,
    PercentileSettings, QuerySettings, RefreshSettings, ServerSettings,
};

/// Environment variables with this prefix override file values,
/// e.g. `SUMMARIZE__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "SUMMARIZE";

/// Longest accepted percentile window, in days (about a century).
pub const MAX_WINDOW_DAYS: i64 = 36_500;

/// Loads the application configuration.
///
/// Built-in defaults are overlaid by the optional TOML file at `path`
/// (`config.toml` when `None`) and then by `SUMMARIZE__*` environment variables.
/// The merged result is validated before it is returned.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name("config.toml").required(false),
    };

    let builder = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    validate(&config)?;
    Ok(config)
}

/// Checks cross-field invariants that serde cannot express.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let query = &config.query;
    if query.max_page_size < 1 {
        return Err(ConfigError::ValidationError(
            "query.max_page_size must be at least 1".to_string(),
        ));
    }
    if query.default_page_size < 1 || query.default_page_size > query.max_page_size {
        return Err(ConfigError::ValidationError(format!(
            "query.default_page_size must be within 1..={}",
            query.max_page_size
        )));
    }

    let percentile = &config.percentile;
    for (name, days) in [
        ("one_month_days", percentile.one_month_days),
        ("three_year_days", percentile.three_year_days),
    ] {
        if !(1..=MAX_WINDOW_DAYS).contains(&days) {
            return Err(ConfigError::ValidationError(format!(
                "percentile.{name} must be within 1..={MAX_WINDOW_DAYS}, got {days}"
            )));
        }
    }

    let heatmap = &config.heatmap;
    if heatmap.metrics.is_empty() {
        return Err(ConfigError::ValidationError("heatmap.metrics must not be empty".to_string()));
    }
    if heatmap.colors.len() != heatmap.thresholds.len() + 1 {
        return Err(ConfigError::ValidationError(format!(
            "heatmap.colors needs exactly {} entries for {} thresholds",
            heatmap.thresholds.len() + 1,
            heatmap.thresholds.len()
        )));
    }
    let mut previous = Decimal::ZERO;
    for threshold in &heatmap.thresholds {
        if *threshold <= previous || *threshold >= Decimal::ONE_HUNDRED {
            return Err(ConfigError::ValidationError(
                "heatmap.thresholds must be strictly ascending within (0, 100)".to_string(),
            ));
        }
        previous = *threshold;
    }

    if config.distribution.bucket_count == 0 || config.distribution.bucket_count > 100 {
        return Err(ConfigError::ValidationError(
            "distribution.bucket_count must be within 1..=100".to_string(),
        ));
    }

    if config.refresh.timeout_secs == 0 {
        return Err(ConfigError::ValidationError("refresh.timeout_secs must be positive".to_string()));
    }
    if config.refresh.schedule_interval_secs == Some(0) {
        return Err(ConfigError::ValidationError(
            "refresh.schedule_interval_secs must be positive when set".to_string(),
        ));
    }

    Ok(())
}
