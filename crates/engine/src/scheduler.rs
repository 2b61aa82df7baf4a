use crate::refresh::RefreshCoordinator;
use configuration::RefreshSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Spawns the periodic refresh loop, or returns `None` when no interval is configured.
pub fn spawn_scheduler(
    coordinator: Arc<RefreshCoordinator>,
    settings: &RefreshSettings,
) -> Option<JoinHandle<()>> {
    let every = Duration::from_secs(settings.schedule_interval_secs.filter(|s| *s > 0)?);
    Some(tokio::spawn(refresh_scheduler_task(coordinator, every)))
}

/// Triggers a refresh every `every`. The first tick fires one period after
/// start; the startup refresh is handled separately.
///
/// This function runs indefinitely until cancelled.
pub async fn refresh_scheduler_task(coordinator: Arc<RefreshCoordinator>, every: Duration) {
    tracing::info!(interval_secs = every.as_secs(), "Starting refresh scheduler.");

    let mut timer = interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // `interval` completes its first tick immediately.
    timer.tick().await;

    loop {
        timer.tick().await;
        match coordinator.trigger().await {
            Ok(task) => tracing::info!(task_id = %task.task_id, "Scheduled refresh triggered."),
            Err(e) => tracing::error!(error = %e, "Scheduled refresh could not be started."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SnapshotCache;
    use crate::test_support::memory_repo;
    use analytics::SnapshotBuilder;
    use configuration::Config;

    async fn coordinator() -> Arc<RefreshCoordinator> {
        let builder = SnapshotBuilder::new(&Config::default()).unwrap();
        let cache = SnapshotCache::new(builder.empty());
        Arc::new(RefreshCoordinator::new(memory_repo().await, cache, builder, Duration::from_secs(30)))
    }

    #[tokio::test]
    async fn disabled_interval_spawns_nothing() {
        let settings = RefreshSettings { schedule_interval_secs: None, ..Default::default() };
        assert!(spawn_scheduler(coordinator().await, &settings).is_none());

        let settings = RefreshSettings { schedule_interval_secs: Some(0), ..Default::default() };
        assert!(spawn_scheduler(coordinator().await, &settings).is_none());
    }

    #[tokio::test]
    async fn scheduler_triggers_after_one_period() {
        let coordinator = coordinator().await;
        let handle = tokio::spawn(refresh_scheduler_task(Arc::clone(&coordinator), Duration::from_millis(50)));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.in_flight().await.is_none());

        let mut triggered = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if coordinator.latest_task_id().is_some() {
                triggered = true;
                break;
            }
        }
        handle.abort();
        assert!(triggered);
    }
}
