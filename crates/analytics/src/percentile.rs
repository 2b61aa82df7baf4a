use crate::error::AnalyticsError;
use chrono::Duration;
use configuration::PercentileSettings;
use core_types::{PriceObservation, Window, WindowStats};
use rust_decimal::Decimal;

pub use core_types::{IndexMetrics, MIN_OBSERVATIONS};

/// Inclusive percentile rank of `current` within `history`:
/// `100 × |{p ∈ history : p ≤ current}| / |history|`, rounded to two places.
///
/// Returns `None` when `history` has fewer than [`MIN_OBSERVATIONS`] entries.
pub fn percentile_rank(current: Decimal, history: &[Decimal]) -> Option<Decimal> {
    if history.len() < MIN_OBSERVATIONS {
        return None;
    }
    let at_or_below = history.iter().filter(|p| **p <= current).count();
    let rank = Decimal::from(at_or_below) * Decimal::ONE_HUNDRED / Decimal::from(history.len());
    Some(rank.round_dp(2))
}

/// High, low and arithmetic mean of `prices`, or `None` below [`MIN_OBSERVATIONS`].
pub fn window_stats(prices: &[Decimal]) -> Result<Option<WindowStats>, AnalyticsError> {
    if prices.len() < MIN_OBSERVATIONS {
        return Ok(None);
    }

    let mut high = prices[0];
    let mut low = prices[0];
    let mut sum = Decimal::ZERO;
    for price in prices {
        high = high.max(*price);
        low = low.min(*price);
        sum = sum
            .checked_add(*price)
            .ok_or_else(|| AnalyticsError::Overflow("window average".to_string()))?;
    }
    let avg = sum / Decimal::from(prices.len());

    Ok(Some(WindowStats { high, low, avg: avg.round_dp(4) }))
}

/// A stateless calculator for percentile ranks over trailing windows.
///
/// Windows are anchored at the latest observation, not at wall-clock time, so
/// the same history always yields the same result. A window reaching back
/// past the earliest representable time covers the whole history.
#[derive(Debug, Clone)]
pub struct PercentileEngine {
    one_month: Option<Duration>,
    three_year: Option<Duration>,
}

impl Default for PercentileEngine {
    fn default() -> Self {
        Self::new(&PercentileSettings::default())
    }
}

impl PercentileEngine {
    pub fn new(settings: &PercentileSettings) -> Self {
        Self {
            one_month: Duration::try_days(settings.one_month_days),
            three_year: Duration::try_days(settings.three_year_days),
        }
    }

    /// The trailing slice of `history` (chronological) that falls in `window`.
    pub fn window<'a>(&self, history: &'a [PriceObservation], window: Window) -> &'a [PriceObservation] {
        let Some(latest) = history.last() else {
            return history;
        };
        let span = match window {
            Window::OneMonth => self.one_month,
            Window::ThreeYear => self.three_year,
            Window::SinceInception => return history,
        };
        let Some(cutoff) = span.and_then(|span| latest.timestamp.checked_sub_signed(span)) else {
            return history;
        };
        let start = history.partition_point(|o| o.timestamp < cutoff);
        &history[start..]
    }

    /// Computes all window percentiles and the 3-year stats for one index.
    ///
    /// `history` must be in chronological order. Returns `Ok(None)` for an
    /// index with no observations at all.
    pub fn compute(&self, history: &[PriceObservation]) -> Result<Option<IndexMetrics>, AnalyticsError> {
        let Some(latest) = history.last() else {
            return Ok(None);
        };

        let prices_in = |window: Window| -> Vec<Decimal> {
            self.window(history, window).iter().map(|o| o.price).collect()
        };
        let one_month = prices_in(Window::OneMonth);
        let three_year = prices_in(Window::ThreeYear);
        let all: Vec<Decimal> = history.iter().map(|o| o.price).collect();

        Ok(Some(IndexMetrics {
            current_price: latest.price,
            as_of: latest.timestamp,
            observation_count: history.len(),
            percentile_1m: percentile_rank(latest.price, &one_month),
            percentile_3y: percentile_rank(latest.price, &three_year),
            percentile_since_inception: percentile_rank(latest.price, &all),
            stats_3y: window_stats(&three_year)?,
        }))
    }
}
