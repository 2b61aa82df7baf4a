use crate::DbError;
use chrono::{DateTime, Utc};
use core_types::{Index, IndexMetrics, PriceObservation, RefreshTask, TaskStatus, WindowStats};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The persisted output of one successful refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMetrics {
    pub task_id: String,
    pub generated_at: DateTime<Utc>,
    pub metrics: HashMap<String, IndexMetrics>,
}

/// The `DbRepository` provides a high-level, application-specific interface
/// to the index store. It encapsulates all SQL queries and data access logic.
///
/// Cloning is cheap; clones share the pool and the append lock.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: SqlitePool,
    // Serializes appends so the "latest timestamp" check and the insert
    // cannot interleave with another append.
    append_lock: Arc<Mutex<()>>,
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, append_lock: Arc::new(Mutex::new(())) }
    }

    // ==========================================================================
    // Indices
    // ==========================================================================

    /// Creates the index or updates its display names. The code never changes.
    pub async fn upsert_index(
        &self,
        code: &str,
        name: &str,
        full_name: Option<&str>,
    ) -> Result<Index, DbError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO indices (code, name, full_name, current_price, created_at, updated_at)
            VALUES (?1, ?2, ?3, NULL, ?4, ?4)
            ON CONFLICT (code) DO UPDATE SET
                name = excluded.name,
                full_name = excluded.full_name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(code)
        .bind(name)
        .bind(full_name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_index(code).await
    }

    pub async fn get_index(&self, code: &str) -> Result<Index, DbError> {
        let row = sqlx::query(
            "SELECT code, name, full_name, current_price, updated_at FROM indices WHERE code = ?1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Index '{code}'")))?;

        index_from_row(&row)
    }

    /// Fetches all indices ordered by code, optionally restricted to those whose
    /// code, name or full name contains `q`, ignoring case.
    ///
    /// Matching happens here rather than in SQL: SQLite's `LOWER` only folds
    /// ASCII, so names like "Égalité" would never match.
    pub async fn list_indices(&self, q: Option<&str>) -> Result<Vec<Index>, DbError> {
        let rows = sqlx::query(
            "SELECT code, name, full_name, current_price, updated_at FROM indices ORDER BY code ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        let indices = rows.iter().map(index_from_row).collect::<Result<Vec<_>, _>>()?;

        let Some(keyword) = q.map(str::trim).filter(|k| !k.is_empty()) else {
            return Ok(indices);
        };
        let keyword = keyword.to_lowercase();
        Ok(indices.into_iter().filter(|index| matches_keyword(index, &keyword)).collect())
    }

    // ==========================================================================
    // Price observations
    // ==========================================================================

    /// Appends a price to an index's history and makes it the current price.
    ///
    /// Fails with `NotFound` for an unknown index and with `OutOfOrder` when the
    /// timestamp is not strictly after the latest stored observation.
    pub async fn append_observation(
        &self,
        code: &str,
        observation: PriceObservation,
    ) -> Result<(), DbError> {
        let _guard = self.append_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> = sqlx::query_scalar("SELECT code FROM indices WHERE code = ?1")
            .bind(code)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DbError::NotFound(format!("Index '{code}'")));
        }

        // Unix microseconds; finer precision is dropped by the caller.
        let latest: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(observed_at) FROM price_observations WHERE index_code = ?1",
        )
        .bind(code)
        .fetch_one(&mut *tx)
        .await?;

        let attempted = observation.timestamp.timestamp_micros();
        if let Some(latest) = latest {
            if attempted <= latest {
                return Err(DbError::OutOfOrder {
                    code: code.to_string(),
                    latest: micros_to_datetime(latest)?,
                    attempted: observation.timestamp,
                });
            }
        }

        sqlx::query("INSERT INTO price_observations (index_code, observed_at, price) VALUES (?1, ?2, ?3)")
            .bind(code)
            .bind(attempted)
            .bind(observation.price.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE indices SET current_price = ?1, updated_at = ?2 WHERE code = ?3")
            .bind(observation.price.to_string())
            .bind(observation.timestamp)
            .bind(code)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Fetches the full history of one index in chronological order.
    pub async fn observations_for(&self, code: &str) -> Result<Vec<PriceObservation>, DbError> {
        let rows = sqlx::query(
            "SELECT observed_at, price FROM price_observations WHERE index_code = ?1 ORDER BY observed_at ASC",
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(observation_from_row).collect()
    }

    /// Fetches every index's history, grouped by code, each in chronological order.
    pub async fn load_observations(&self) -> Result<HashMap<String, Vec<PriceObservation>>, DbError> {
        let rows = sqlx::query(
            "SELECT index_code, observed_at, price FROM price_observations ORDER BY index_code ASC, observed_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<String, Vec<PriceObservation>> = HashMap::new();
        for row in &rows {
            let code: String = row.try_get("index_code")?;
            grouped.entry(code).or_default().push(observation_from_row(row)?);
        }
        Ok(grouped)
    }

    // ==========================================================================
    // Derived metrics
    // ==========================================================================

    /// Replaces the stored metrics with those of a finished refresh, in one
    /// transaction. Readers of `load_metrics` see the old set or the new one.
    pub async fn replace_metrics(
        &self,
        task_id: &str,
        generated_at: DateTime<Utc>,
        metrics: &HashMap<String, IndexMetrics>,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_metrics").execute(&mut *tx).await?;

        for (code, m) in metrics {
            let stats = m.stats_3y;
            sqlx::query(
                r#"
                INSERT INTO index_metrics (
                    index_code, task_id, generated_at, current_price, as_of, observation_count,
                    percentile_1m, percentile_3y, percentile_since_inception, high_3y, low_3y, avg_3y
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
            )
            .bind(code)
            .bind(task_id)
            .bind(generated_at)
            .bind(m.current_price.to_string())
            .bind(m.as_of.timestamp_micros())
            .bind(i64::try_from(m.observation_count).unwrap_or(i64::MAX))
            .bind(m.percentile_1m.map(|d| d.to_string()))
            .bind(m.percentile_3y.map(|d| d.to_string()))
            .bind(m.percentile_since_inception.map(|d| d.to_string()))
            .bind(stats.map(|s| s.high.to_string()))
            .bind(stats.map(|s| s.low.to_string()))
            .bind(stats.map(|s| s.avg.to_string()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(task_id, rows = metrics.len(), "Replaced stored index metrics.");
        Ok(())
    }

    /// The metrics written by the latest `replace_metrics`, or `None` when no
    /// refresh has stored any yet.
    pub async fn load_metrics(&self) -> Result<Option<StoredMetrics>, DbError> {
        let rows = sqlx::query("SELECT * FROM index_metrics ORDER BY index_code ASC")
            .fetch_all(&self.pool)
            .await?;
        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let mut metrics = HashMap::with_capacity(rows.len());
        for row in &rows {
            let code: String = row.try_get("index_code")?;
            metrics.insert(code, metrics_from_row(row)?);
        }
        Ok(Some(StoredMetrics {
            task_id: first.try_get("task_id")?,
            generated_at: first.try_get("generated_at")?,
            metrics,
        }))
    }

    // ==========================================================================
    // Refresh tasks
    // ==========================================================================

    pub async fn insert_task(&self, task: &RefreshTask) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO refresh_tasks (task_id, status, started_at, finished_at, message) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&task.task_id)
        .bind(task.status.as_str())
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(&task.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stores a new status, finish time and message for an existing task.
    ///
    /// Only pending → running → succeeded/failed moves are accepted; a task
    /// never leaves a terminal status.
    pub async fn update_task(&self, task: &RefreshTask) -> Result<(), DbError> {
        let current = self.get_task(&task.task_id).await?;
        if !current.status.can_transition_to(task.status) {
            return Err(DbError::InvalidTransition {
                task_id: task.task_id.clone(),
                from: current.status,
                to: task.status,
            });
        }

        let result = sqlx::query(
            "UPDATE refresh_tasks SET status = ?1, finished_at = ?2, message = ?3 WHERE task_id = ?4 AND status = ?5",
        )
        .bind(task.status.as_str())
        .bind(task.finished_at)
        .bind(&task.message)
        .bind(&task.task_id)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::InvalidTransition {
                task_id: task.task_id.clone(),
                from: current.status,
                to: task.status,
            });
        }
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<RefreshTask, DbError> {
        let row = sqlx::query(
            "SELECT task_id, status, started_at, finished_at, message FROM refresh_tasks WHERE task_id = ?1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Refresh task '{task_id}'")))?;

        task_from_row(&row)
    }

    /// Marks every pending or running task as failed. Called at startup, when no
    /// task from a previous process can still be making progress.
    pub async fn fail_unfinished_tasks(&self, reason: &str) -> Result<u64, DbError> {
        let result = sqlx::query(
            "UPDATE refresh_tasks SET status = ?1, finished_at = ?2, message = ?3 WHERE status IN ('pending', 'running')",
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(Utc::now())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn index_from_row(row: &SqliteRow) -> Result<Index, DbError> {
    let current_price: Option<String> = row.try_get("current_price")?;
    Ok(Index {
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        full_name: row.try_get("full_name")?,
        current_price: current_price.as_deref().map(parse_decimal).transpose()?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn observation_from_row(row: &SqliteRow) -> Result<PriceObservation, DbError> {
    let observed_at: i64 = row.try_get("observed_at")?;
    let price: String = row.try_get("price")?;
    Ok(PriceObservation {
        timestamp: micros_to_datetime(observed_at)?,
        price: parse_decimal(&price)?,
    })
}

fn metrics_from_row(row: &SqliteRow) -> Result<IndexMetrics, DbError> {
    let current_price: String = row.try_get("current_price")?;
    let observation_count: i64 = row.try_get("observation_count")?;
    let stats = match (
        parse_optional_decimal(row.try_get("high_3y")?)?,
        parse_optional_decimal(row.try_get("low_3y")?)?,
        parse_optional_decimal(row.try_get("avg_3y")?)?,
    ) {
        (Some(high), Some(low), Some(avg)) => Some(WindowStats { high, low, avg }),
        _ => None,
    };

    Ok(IndexMetrics {
        current_price: parse_decimal(&current_price)?,
        as_of: micros_to_datetime(row.try_get("as_of")?)?,
        observation_count: usize::try_from(observation_count)
            .map_err(|_| DbError::DecodeError(format!("observation count {observation_count}")))?,
        percentile_1m: parse_optional_decimal(row.try_get("percentile_1m")?)?,
        percentile_3y: parse_optional_decimal(row.try_get("percentile_3y")?)?,
        percentile_since_inception: parse_optional_decimal(row.try_get("percentile_since_inception")?)?,
        stats_3y: stats,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<RefreshTask, DbError> {
    let status: String = row.try_get("status")?;
    Ok(RefreshTask {
        task_id: row.try_get("task_id")?,
        status: TaskStatus::from_str(&status).map_err(|e| DbError::DecodeError(e.to_string()))?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        message: row.try_get("message")?,
    })
}

fn parse_decimal(raw: &str) -> Result<Decimal, DbError> {
    Decimal::from_str(raw).map_err(|e| DbError::DecodeError(format!("price '{raw}': {e}")))
}

fn parse_optional_decimal(raw: Option<String>) -> Result<Option<Decimal>, DbError> {
    raw.as_deref().map(parse_decimal).transpose()
}

fn micros_to_datetime(micros: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| DbError::DecodeError(format!("timestamp {micros} out of range")))
}

fn matches_keyword(index: &Index, keyword: &str) -> bool {
    [Some(index.code.as_str()), Some(index.name.as_str()), index.full_name.as_deref()]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(keyword))
}
