//! # Index Analytics Engine
//!
//! The orchestration layer between the index store and the analytics
//! calculators. It owns the published snapshot, runs background refreshes and
//! answers every read the web layer and the CLI make.
//!
//! ## Public API
//!
//! - `Services`: bootstraps and bundles everything below from a `Config`.
//! - `QueryService`: listing, detail, heatmap and distribution reads.
//! - `IngestService`: index upserts and price appends.
//! - `RefreshCoordinator`: single-flight background refreshes with a timeout.
//! - `SnapshotCache`: the atomically swapped snapshot readers use.
//! - `spawn_scheduler`: the periodic refresh timer.

use analytics::SnapshotBuilder;
use configuration::Config;
use database::DbRepository;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod cache;
pub mod error;
pub mod ingest;
pub mod query;
pub mod refresh;
pub mod scheduler;

pub use cache::SnapshotCache;
pub use error::EngineError;
pub use ingest::IngestService;
pub use query::QueryService;
pub use refresh::RefreshCoordinator;
pub use scheduler::spawn_scheduler;

/// All services, wired to one repository and one snapshot cache.
#[derive(Debug, Clone)]
pub struct Services {
    pub query: QueryService,
    pub ingest: IngestService,
    pub refresh: Arc<RefreshCoordinator>,
}

impl Services {
    /// Connects to the store, applies migrations and wires the services.
    /// The snapshot starts from the metrics of the last stored refresh, or
    /// empty when there is none.
    pub async fn bootstrap(config: &Config) -> Result<Self, EngineError> {
        let pool = database::connect(&config.database).await?;
        database::run_migrations(&pool).await?;
        let services = Self::from_repo(DbRepository::new(pool), config)?;
        services.refresh.restore().await?;
        Ok(services)
    }

    pub fn from_repo(repo: DbRepository, config: &Config) -> Result<Self, EngineError> {
        let builder = SnapshotBuilder::new(config)?;
        let cache = SnapshotCache::new(builder.empty());

        Ok(Self {
            query: QueryService::new(repo.clone(), cache.clone(), config.query.clone()),
            ingest: IngestService::new(repo.clone()),
            refresh: Arc::new(RefreshCoordinator::new(repo, cache, builder, config.refresh.timeout())),
        })
    }

    /// Server startup: fails tasks a previous process left unfinished, kicks
    /// off the startup refresh if configured and starts the scheduler.
    pub async fn start_background(&self, config: &Config) -> Result<Option<JoinHandle<()>>, EngineError> {
        self.refresh.recover().await?;
        if config.refresh.on_startup {
            let task = self.refresh.trigger().await?;
            tracing::info!(task_id = %task.task_id, "Startup refresh triggered.");
        }
        Ok(spawn_scheduler(Arc::clone(&self.refresh), &config.refresh))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use configuration::DatabaseSettings;
    use database::DbRepository;
    use sqlx::SqlitePool;

    pub async fn memory_pool() -> SqlitePool {
        let settings = DatabaseSettings { url: "sqlite::memory:".to_string(), max_connections: 1 };
        let pool = database::connect(&settings).await.unwrap();
        database::run_migrations(&pool).await.unwrap();
        pool
    }

    pub async fn memory_repo() -> DbRepository {
        DbRepository::new(memory_pool().await)
    }

    pub fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{ListIndicesParams, PriceObservation, TaskStatus};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn writes_become_visible_after_a_refresh() {
        let config = Config::default();
        let services = Services::from_repo(test_support::memory_repo().await, &config).unwrap();

        services.ingest.upsert_index("000300", "CSI 300", Some("CSI 300 Index")).await.unwrap();
        for (i, price) in [dec!(3000), dec!(3200), dec!(3100)].into_iter().enumerate() {
            let observation = PriceObservation { timestamp: test_support::day(i as i64), price };
            services.ingest.append_observation("000300", observation).await.unwrap();
        }

        let before = services.query.get_index("000300").await.unwrap();
        assert_eq!(before.summary.percentile_since_inception, None);

        let task = services.refresh.trigger().await.unwrap();
        let done = services.refresh.wait(&task.task_id, Duration::from_millis(10)).await.unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);

        let page = services.query.list_indices(&ListIndicesParams::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].percentile_since_inception, Some(dec!(66.67)));
        assert_eq!(services.query.distribution().excluded, 0);
        assert!(!services.query.heatmap().cells.is_empty());
    }
}
