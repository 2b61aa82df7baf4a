use crate::color::ColorScale;
use crate::distribution::build_distribution;
use crate::error::AnalyticsError;
use crate::heatmap::build_heatmap;
use crate::percentile::{IndexMetrics, PercentileEngine};
use chrono::{DateTime, Utc};
use configuration::Config;
use core_types::{Distribution, Heatmap, HeatmapMetric, Index, PriceObservation, TaskProgress, Window};
use std::collections::HashMap;

/// All derived data produced by one refresh. Never mutated after it is built;
/// a newer refresh replaces it wholesale.
#[derive(Debug, Clone)]
pub struct AnalyticsSnapshot {
    pub generated_at: DateTime<Utc>,
    /// The refresh task that produced this snapshot, `None` for the initial empty one.
    pub task_id: Option<String>,
    pub metrics: HashMap<String, IndexMetrics>,
    pub heatmap: Heatmap,
    pub distribution: Distribution,
}

impl AnalyticsSnapshot {
    pub fn metrics_for(&self, code: &str) -> Option<&IndexMetrics> {
        self.metrics.get(code)
    }
}

/// Turns stored indices and observations into an [`AnalyticsSnapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    engine: PercentileEngine,
    scale: ColorScale,
    heatmap_metrics: Vec<HeatmapMetric>,
    distribution_window: Window,
    bucket_count: usize,
}

impl SnapshotBuilder {
    pub fn new(config: &Config) -> Result<Self, AnalyticsError> {
        Ok(Self {
            engine: PercentileEngine::new(&config.percentile),
            scale: ColorScale::from_settings(&config.heatmap)?,
            heatmap_metrics: config.heatmap.metrics.clone(),
            distribution_window: config.distribution.window,
            bucket_count: config.distribution.bucket_count,
        })
    }

    /// The snapshot served before the first refresh completes.
    pub fn empty(&self) -> AnalyticsSnapshot {
        AnalyticsSnapshot {
            generated_at: Utc::now(),
            task_id: None,
            metrics: HashMap::new(),
            heatmap: Heatmap { metrics: self.heatmap_metrics.clone(), cells: Vec::new() },
            distribution: build_distribution(self.distribution_window, self.bucket_count, std::iter::empty()),
        }
    }

    /// Computes metrics for every index, then the heatmap and distribution.
    ///
    /// `on_progress` is called after each index. Indices without observations
    /// get no metrics and count as insufficient.
    pub fn build(
        &self,
        task_id: Option<String>,
        indices: &[Index],
        observations: &HashMap<String, Vec<PriceObservation>>,
        mut on_progress: impl FnMut(&TaskProgress),
    ) -> Result<AnalyticsSnapshot, AnalyticsError> {
        let mut progress = TaskProgress::new(indices.len());
        let mut metrics = HashMap::with_capacity(indices.len());

        for index in indices {
            let history = observations.get(&index.code).map(Vec::as_slice).unwrap_or_default();
            let computed = self.engine.compute(history)?;
            progress.record(computed.as_ref().is_none_or(IndexMetrics::is_insufficient));
            if let Some(computed) = computed {
                metrics.insert(index.code.clone(), computed);
            }
            on_progress(&progress);
        }

        Ok(self.assemble(task_id, Utc::now(), indices, metrics))
    }

    /// Builds the heatmap and distribution around already computed metrics.
    ///
    /// Used by `build` and to restore a snapshot from stored metrics. Indices
    /// without metrics are left out of the heatmap and counted as excluded.
    pub fn assemble(
        &self,
        task_id: Option<String>,
        generated_at: DateTime<Utc>,
        indices: &[Index],
        metrics: HashMap<String, IndexMetrics>,
    ) -> AnalyticsSnapshot {
        let mut sorted: Vec<&Index> = indices.iter().collect();
        sorted.sort_by(|a, b| a.code.cmp(&b.code));
        let rows: Vec<(&Index, &IndexMetrics)> = sorted
            .into_iter()
            .filter_map(|index| metrics.get(&index.code).map(|m| (index, m)))
            .collect();
        let heatmap = build_heatmap(&self.heatmap_metrics, &rows, &self.scale);

        let distribution = build_distribution(
            self.distribution_window,
            self.bucket_count,
            indices
                .iter()
                .map(|index| metrics.get(&index.code).and_then(|m| m.percentile(self.distribution_window))),
        );

        tracing::debug!(
            indices = indices.len(),
            cells = heatmap.cells.len(),
            excluded = distribution.excluded,
            "Built analytics snapshot."
        );

        AnalyticsSnapshot { generated_at, task_id, metrics, heatmap, distribution }
    }
}
