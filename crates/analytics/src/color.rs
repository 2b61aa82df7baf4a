use crate::error::AnalyticsError;
use configuration::HeatmapSettings;
use rust_decimal::Decimal;

/// Maps a percentile in [0, 100] to a palette color.
///
/// With thresholds `t1 < … < tn` the bands are `[0, t1)`, `[t1, t2)`, …,
/// `[tn, 100]` and band `i` gets `colors[i]`. Every percentile falls in exactly
/// one band and a higher percentile never maps to an earlier color.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorScale {
    thresholds: Vec<Decimal>,
    colors: Vec<String>,
}

impl ColorScale {
    pub fn new(thresholds: Vec<Decimal>, colors: Vec<String>) -> Result<Self, AnalyticsError> {
        if colors.len() != thresholds.len() + 1 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "{} thresholds need {} colors, got {}",
                thresholds.len(),
                thresholds.len() + 1,
                colors.len()
            )));
        }
        let ascending = thresholds.windows(2).all(|w| w[0] < w[1]);
        let in_range = thresholds.iter().all(|t| *t > Decimal::ZERO && *t < Decimal::ONE_HUNDRED);
        if !ascending || !in_range {
            return Err(AnalyticsError::InvalidConfig(
                "thresholds must be strictly ascending within (0, 100)".to_string(),
            ));
        }
        Ok(Self { thresholds, colors })
    }

    pub fn from_settings(settings: &HeatmapSettings) -> Result<Self, AnalyticsError> {
        Self::new(settings.thresholds.clone(), settings.colors.clone())
    }

    /// Position of `percentile` in the palette. A value equal to a threshold
    /// takes the upper band. Values outside [0, 100] are clamped into the
    /// first or last band.
    pub fn band(&self, percentile: Decimal) -> usize {
        self.thresholds.iter().filter(|t| percentile >= **t).count()
    }

    pub fn color_for(&self, percentile: Decimal) -> &str {
        &self.colors[self.band(percentile)]
    }
}

impl Default for ColorScale {
    fn default() -> Self {
        let settings = HeatmapSettings::default();
        Self { thresholds: settings.thresholds, colors: settings.colors }
    }
}
