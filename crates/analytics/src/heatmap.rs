use crate::color::ColorScale;
use crate::percentile::{percentile_rank, IndexMetrics};
use core_types::{Heatmap, HeatmapCell, HeatmapMetric, Index};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// How far the current price sits below the 3-year high, in percent, clamped to [0, 100].
pub fn distance_to_high(metrics: &IndexMetrics) -> Option<Decimal> {
    let stats = metrics.stats_3y?;
    if stats.high <= Decimal::ZERO {
        return None;
    }
    let distance = (Decimal::ONE - metrics.current_price / stats.high) * Decimal::ONE_HUNDRED;
    Some(clamp_percent(distance))
}

/// How far the current price sits above the 3-year low, in percent, clamped to [0, 100].
pub fn distance_to_low(metrics: &IndexMetrics) -> Option<Decimal> {
    let stats = metrics.stats_3y?;
    if stats.low <= Decimal::ZERO {
        return None;
    }
    let distance = (metrics.current_price / stats.low - Decimal::ONE) * Decimal::ONE_HUNDRED;
    Some(clamp_percent(distance))
}

fn clamp_percent(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO).min(Decimal::ONE_HUNDRED).round_dp(2)
}

/// The raw value of `metric` for one index, before ranking.
pub fn metric_value(metric: HeatmapMetric, metrics: &IndexMetrics) -> Option<Decimal> {
    match metric {
        HeatmapMetric::DistanceToHigh3y => distance_to_high(metrics),
        HeatmapMetric::DistanceToLow3y => distance_to_low(metrics),
        windowed => windowed.window().and_then(|w| metrics.percentile(w)),
    }
}

/// Builds the index × metric grid.
///
/// Percentile metrics are their own percentile. The distance metrics are
/// ranked across all indices that have a value for them. A cell whose value
/// or percentile is undefined is left out of the grid.
pub fn build_heatmap(
    metrics: &[HeatmapMetric],
    rows: &[(&Index, &IndexMetrics)],
    scale: &ColorScale,
) -> Heatmap {
    let mut values: HashMap<HeatmapMetric, Vec<Option<Decimal>>> = HashMap::new();
    for metric in metrics {
        let column = rows.iter().map(|(_, m)| metric_value(*metric, m)).collect();
        values.insert(*metric, column);
    }

    // Cross-sectional population per distance metric.
    let populations: HashMap<HeatmapMetric, Vec<Decimal>> = values
        .iter()
        .filter(|(metric, _)| metric.window().is_none())
        .map(|(metric, column)| (*metric, column.iter().flatten().copied().collect()))
        .collect();

    let mut cells = Vec::new();
    for (row, (index, _)) in rows.iter().enumerate() {
        for metric in metrics {
            let Some(value) = values[metric][row] else {
                continue;
            };
            let percentile = match populations.get(metric) {
                Some(population) => percentile_rank(value, population),
                None => Some(value),
            };
            let Some(percentile) = percentile else {
                continue;
            };
            cells.push(HeatmapCell {
                index_code: index.code.clone(),
                index_name: index.name.clone(),
                metric: *metric,
                value,
                percentile,
                color: scale.color_for(percentile).to_string(),
            });
        }
    }

    Heatmap { metrics: metrics.to_vec(), cells }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use core_types::WindowStats;
    use rust_decimal_macros::dec;

    fn index(code: &str) -> Index {
        Index {
            code: code.to_string(),
            name: format!("{code} name"),
            full_name: None,
            current_price: None,
            updated_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        }
    }

    fn metrics(price: Decimal, p1m: Option<Decimal>, stats: Option<WindowStats>) -> IndexMetrics {
        IndexMetrics {
            current_price: price,
            as_of: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            observation_count: 10,
            percentile_1m: p1m,
            percentile_3y: p1m,
            percentile_since_inception: p1m,
            stats_3y: stats,
        }
    }

    #[test]
    fn distances_are_clamped_percentages() {
        let stats = WindowStats { high: dec!(200), low: dec!(50), avg: dec!(100) };
        let m = metrics(dec!(100), None, Some(stats));
        assert_eq!(distance_to_high(&m), Some(dec!(50)));
        assert_eq!(distance_to_low(&m), Some(dec!(100)));
        assert_eq!(distance_to_high(&metrics(dec!(100), None, None)), None);
    }

    #[test]
    fn percentile_cells_carry_their_own_percentile_and_color() {
        let a = index("A");
        let ma = metrics(dec!(10), Some(dec!(12.5)), None);
        let heatmap = build_heatmap(&[HeatmapMetric::Percentile1m], &[(&a, &ma)], &ColorScale::default());

        assert_eq!(heatmap.cells.len(), 1);
        let cell = &heatmap.cells[0];
        assert_eq!(cell.value, dec!(12.5));
        assert_eq!(cell.percentile, dec!(12.5));
        assert_eq!(cell.color, "#4CAF50");
    }

    #[test]
    fn undefined_cells_are_omitted_and_distances_ranked_across_indices() {
        let stats = |high, low| Some(WindowStats { high, low, avg: dec!(1) });
        let (a, b, c) = (index("A"), index("B"), index("C"));
        let ma = metrics(dec!(90), Some(dec!(80)), stats(dec!(100), dec!(50)));
        let mb = metrics(dec!(50), Some(dec!(80)), stats(dec!(100), dec!(50)));
        let mc = metrics(dec!(10), None, None);
        let rows = [(&a, &ma), (&b, &mb), (&c, &mc)];

        let heatmap = build_heatmap(&HeatmapMetric::ALL, &rows, &ColorScale::default());

        assert!(heatmap.cells.iter().all(|cell| cell.index_code != "C"));
        assert_eq!(heatmap.cells.len(), 10);

        let find = |code: &str, metric| {
            heatmap
                .cells
                .iter()
                .find(|c| c.index_code == code && c.metric == metric)
                .unwrap()
        };
        // A is 10% below its high, B is 50% below: B ranks higher on that column.
        assert_eq!(find("A", HeatmapMetric::DistanceToHigh3y).percentile, dec!(50));
        assert_eq!(find("B", HeatmapMetric::DistanceToHigh3y).percentile, dec!(100));

        let colors: HashMap<Decimal, &str> =
            heatmap.cells.iter().map(|c| (c.percentile, c.color.as_str())).collect();
        for cell in &heatmap.cells {
            assert_eq!(colors[&cell.percentile], cell.color);
        }
    }
}
