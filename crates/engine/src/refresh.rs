use crate::cache::SnapshotCache;
use crate::error::EngineError;
use analytics::SnapshotBuilder;
use chrono::Utc;
use core_types::{RefreshTask, RefreshTaskView, TaskProgress, TaskStatus};
use database::DbRepository;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

type ProgressSlot = Arc<StdMutex<Option<(String, TaskProgress)>>>;

/// Runs analytics refreshes in the background, at most one at a time.
///
/// A refresh reads every index and observation from the store, builds a new
/// snapshot off the async runtime, stores its per-index metrics and publishes
/// it. Publishing is the last step, so a refresh that fails or times out
/// leaves the previous snapshot (stored and in memory) in place.
#[derive(Debug)]
pub struct RefreshCoordinator {
    repo: DbRepository,
    cache: SnapshotCache,
    builder: SnapshotBuilder,
    timeout: Duration,
    in_flight: Mutex<Option<RefreshTask>>,
    // Live progress of the most recent task only.
    progress: ProgressSlot,
}

impl RefreshCoordinator {
    pub fn new(
        repo: DbRepository,
        cache: SnapshotCache,
        builder: SnapshotBuilder,
        timeout: Duration,
    ) -> Self {
        Self {
            repo,
            cache,
            builder,
            timeout,
            in_flight: Mutex::new(None),
            progress: Arc::new(StdMutex::new(None)),
        }
    }

    /// Starts a refresh and returns its task immediately.
    ///
    /// If a refresh is already pending or running, no new one is started and
    /// the in-flight task is returned instead.
    pub async fn trigger(self: &Arc<Self>) -> Result<RefreshTask, EngineError> {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(task) = in_flight.as_ref() {
            tracing::info!(task_id = %task.task_id, "Refresh already in flight; returning existing task.");
            return Ok(task.clone());
        }

        let task = RefreshTask {
            task_id: Uuid::new_v4().to_string(),
            status: TaskStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            message: None,
        };
        self.repo.insert_task(&task).await?;
        *in_flight = Some(task.clone());
        set_progress(&self.progress, &task.task_id, &TaskProgress::default());
        drop(in_flight);

        tracing::info!(task_id = %task.task_id, "Refresh task created.");
        let this = Arc::clone(self);
        let job = task.clone();
        tokio::spawn(async move { this.run(job).await });

        Ok(task)
    }

    /// The stored task together with its live progress, if it is the most recent one.
    pub async fn task(&self, task_id: &str) -> Result<RefreshTaskView, EngineError> {
        let task = self.repo.get_task(task_id).await?;
        let progress = current_progress(&self.progress)
            .filter(|(id, _)| id == task_id)
            .map(|(_, progress)| progress);
        Ok(RefreshTaskView { task, progress })
    }

    pub async fn in_flight(&self) -> Option<RefreshTask> {
        self.in_flight.lock().await.clone()
    }

    /// Id of the most recently triggered task, if any was triggered by this process.
    pub fn latest_task_id(&self) -> Option<String> {
        current_progress(&self.progress).map(|(id, _)| id)
    }

    /// Polls the store until the task reaches a terminal status.
    pub async fn wait(&self, task_id: &str, poll: Duration) -> Result<RefreshTask, EngineError> {
        loop {
            let task = self.repo.get_task(task_id).await?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Publishes the metrics stored by the last successful refresh, rebuilt
    /// into a snapshot against the current index rows. Returns false when
    /// nothing has been stored yet.
    pub async fn restore(&self) -> Result<bool, EngineError> {
        let Some(stored) = self.repo.load_metrics().await? else {
            return Ok(false);
        };
        let indices = self.repo.list_indices(None).await?;
        let count = stored.metrics.len();
        let snapshot =
            self.builder.assemble(Some(stored.task_id.clone()), stored.generated_at, &indices, stored.metrics);
        self.cache.publish(snapshot);

        tracing::info!(task_id = %stored.task_id, indices = count, "Restored analytics snapshot from the store.");
        Ok(true)
    }

    /// Fails tasks left pending or running by a previous process.
    pub async fn recover(&self) -> Result<u64, EngineError> {
        let count = self.repo.fail_unfinished_tasks("Interrupted by restart").await?;
        if count > 0 {
            tracing::warn!(count, "Marked unfinished refresh tasks from a previous run as failed.");
        }
        Ok(count)
    }

    async fn run(self: Arc<Self>, mut task: RefreshTask) {
        let mut running = task.clone();
        running.status = TaskStatus::Running;
        let job = async {
            self.record(&running).await?;
            tracing::info!(task_id = %running.task_id, "Refresh started.");
            self.recompute(&running.task_id).await
        };

        let (status, message) = match tokio::time::timeout(self.timeout, job).await {
            Ok(Ok(summary)) => (TaskStatus::Succeeded, summary),
            Ok(Err(e)) => (TaskStatus::Failed, format!("Refresh failed: {e}")),
            Err(_) => (
                TaskStatus::Failed,
                format!("Refresh timed out after {}s", self.timeout.as_secs_f64()),
            ),
        };

        task.status = status;
        task.finished_at = Some(Utc::now());
        task.message = Some(message);
        match status {
            TaskStatus::Succeeded => {
                tracing::info!(task_id = %task.task_id, message = ?task.message, "Refresh succeeded.")
            }
            _ => tracing::error!(task_id = %task.task_id, message = ?task.message, "Refresh failed."),
        }

        // Triggers wait here until the outcome is stored.
        let mut in_flight = self.in_flight.lock().await;
        if let Err(e) = self.repo.update_task(&task).await {
            tracing::error!(task_id = %task.task_id, error = %e, "Failed to record refresh outcome.");
        }
        *in_flight = None;
    }

    async fn record(&self, task: &RefreshTask) -> Result<(), EngineError> {
        self.repo.update_task(task).await?;
        *self.in_flight.lock().await = Some(task.clone());
        Ok(())
    }

    async fn recompute(&self, task_id: &str) -> Result<String, EngineError> {
        let indices = self.repo.list_indices(None).await?;
        let observations = self.repo.load_observations().await?;
        let total = indices.len();

        let builder = self.builder.clone();
        let progress = Arc::clone(&self.progress);
        let id = task_id.to_string();
        let snapshot = tokio::task::spawn_blocking(move || {
            builder.build(Some(id.clone()), &indices, &observations, |p| set_progress(&progress, &id, p))
        })
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))??;

        let ranked = snapshot.metrics.values().filter(|m| !m.is_insufficient()).count();
        self.repo.replace_metrics(task_id, snapshot.generated_at, &snapshot.metrics).await?;
        self.cache.publish(snapshot);

        Ok(format!(
            "Refresh completed: indices={total}, ranked={ranked}, insufficient={}",
            total - ranked
        ))
    }
}

fn set_progress(slot: &ProgressSlot, task_id: &str, progress: &TaskProgress) {
    let mut guard = match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some((task_id.to_string(), progress.clone()));
}

fn current_progress(slot: &ProgressSlot) -> Option<(String, TaskProgress)> {
    match slot.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{day, memory_pool};
    use configuration::Config;
    use core_types::PriceObservation;
    use rust_decimal_macros::dec;

    const POLL: Duration = Duration::from_millis(10);

    async fn coordinator(timeout: Duration) -> (Arc<RefreshCoordinator>, SnapshotCache, sqlx::SqlitePool) {
        let pool = memory_pool().await;
        let repo = DbRepository::new(pool.clone());
        repo.upsert_index("A", "Alpha", None).await.unwrap();
        repo.upsert_index("B", "Beta", None).await.unwrap();
        for (i, price) in [dec!(10), dec!(12), dec!(11)].into_iter().enumerate() {
            repo.append_observation("A", PriceObservation { timestamp: day(i as i64), price }).await.unwrap();
        }

        let builder = SnapshotBuilder::new(&Config::default()).unwrap();
        let cache = SnapshotCache::new(builder.empty());
        let coordinator = Arc::new(RefreshCoordinator::new(repo, cache.clone(), builder, timeout));
        (coordinator, cache, pool)
    }

    #[tokio::test]
    async fn refresh_publishes_snapshot_and_records_success() {
        let (coordinator, cache, _pool) = coordinator(Duration::from_secs(30)).await;

        let task = coordinator.trigger().await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let done = coordinator.wait(&task.task_id, POLL).await.unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert!(done.finished_at.is_some());
        assert_eq!(
            done.message.as_deref(),
            Some("Refresh completed: indices=2, ranked=1, insufficient=1")
        );

        let snapshot = cache.load();
        assert_eq!(snapshot.task_id.as_deref(), Some(task.task_id.as_str()));
        assert_eq!(snapshot.metrics_for("A").unwrap().percentile_since_inception, Some(dec!(66.67)));

        let view = coordinator.task(&task.task_id).await.unwrap();
        let progress = view.progress.unwrap();
        assert_eq!(progress.processed_count, 2);
        assert_eq!(progress.insufficient_count, 1);
        assert_eq!(progress.progress_percent, dec!(100));
        assert!(coordinator.in_flight().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_triggers_share_one_task() {
        let (coordinator, _cache, pool) = coordinator(Duration::from_secs(30)).await;

        let first = coordinator.trigger().await.unwrap();
        // Holding the only connection keeps the job from finishing.
        let conn = pool.acquire().await.unwrap();
        let second = coordinator.trigger().await.unwrap();
        assert_eq!(first.task_id, second.task_id);
        drop(conn);

        let done = coordinator.wait(&first.task_id, POLL).await.unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);

        let third = coordinator.trigger().await.unwrap();
        assert_ne!(third.task_id, first.task_id);
        coordinator.wait(&third.task_id, POLL).await.unwrap();
    }

    #[tokio::test]
    async fn timed_out_refresh_fails_and_keeps_previous_snapshot() {
        let (coordinator, cache, pool) = coordinator(Duration::from_millis(200)).await;

        let task = coordinator.trigger().await.unwrap();
        let conn = pool.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        drop(conn);

        let done = coordinator.wait(&task.task_id, POLL).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.message.unwrap().contains("timed out"));
        assert!(cache.load().task_id.is_none());
        assert_eq!(DbRepository::new(pool).load_metrics().await.unwrap(), None);
    }

    #[tokio::test]
    async fn stored_results_are_restored_by_a_fresh_coordinator() {
        let (coordinator, _cache, pool) = coordinator(Duration::from_secs(30)).await;
        let task = coordinator.trigger().await.unwrap();
        coordinator.wait(&task.task_id, POLL).await.unwrap();

        let builder = SnapshotBuilder::new(&Config::default()).unwrap();
        let cache = SnapshotCache::new(builder.empty());
        let restarted = RefreshCoordinator::new(DbRepository::new(pool), cache.clone(), builder, POLL);
        assert!(restarted.restore().await.unwrap());

        let snapshot = cache.load();
        assert_eq!(snapshot.task_id.as_deref(), Some(task.task_id.as_str()));
        assert_eq!(snapshot.metrics_for("A").unwrap().percentile_since_inception, Some(dec!(66.67)));
        assert_eq!(snapshot.distribution.excluded, 1);
        assert!(snapshot.heatmap.cells.iter().any(|c| c.index_code == "A"));
    }

    #[tokio::test]
    async fn restore_without_stored_results_keeps_the_empty_snapshot() {
        let (coordinator, cache, _pool) = coordinator(Duration::from_secs(30)).await;
        assert!(!coordinator.restore().await.unwrap());
        assert!(cache.load().task_id.is_none());
    }

    #[tokio::test]
    async fn recover_fails_leftover_tasks() {
        let (coordinator, _cache, pool) = coordinator(Duration::from_secs(30)).await;
        let repo = DbRepository::new(pool);
        let stale = RefreshTask {
            task_id: "stale".to_string(),
            status: TaskStatus::Running,
            started_at: day(0),
            finished_at: None,
            message: None,
        };
        repo.insert_task(&stale).await.unwrap();

        assert_eq!(coordinator.recover().await.unwrap(), 1);
        let view = coordinator.task("stale").await.unwrap();
        assert_eq!(view.task.status, TaskStatus::Failed);
        assert!(view.progress.is_none());
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let (coordinator, _cache, _pool) = coordinator(Duration::from_secs(30)).await;
        assert!(matches!(coordinator.task("missing").await, Err(EngineError::NotFound(_))));
    }
}
