use crate::{error::AppError, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use core_types::{
    Distribution, Heatmap, IndexDetail, IndexPage, IndexSummary, ListIndicesParams,
    PriceObservation, RefreshTask, RefreshTaskView,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct UpsertIndexBody {
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ObservationBody {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ObservationCreated {
    pub code: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

/// # GET /api/v1/indices
pub async fn list_indices(
    State(state): State<Arc<AppState>>,
    WithRejection(Query(params), _): WithRejection<Query<ListIndicesParams>, AppError>,
) -> Result<Json<IndexPage>, AppError> {
    let page = state.services.query.list_indices(&params).await?;
    Ok(Json(page))
}

/// # GET /api/v1/indices/:code
pub async fn get_index(
    State(state): State<Arc<AppState>>,
    WithRejection(Path(code), _): WithRejection<Path<String>, AppError>,
) -> Result<Json<IndexDetail>, AppError> {
    let detail = state.services.query.get_index(&code).await?;
    Ok(Json(detail))
}

/// # PUT /api/v1/indices/:code
/// Creates the index or renames it. Percentiles stay as of the last refresh.
pub async fn upsert_index(
    State(state): State<Arc<AppState>>,
    WithRejection(Path(code), _): WithRejection<Path<String>, AppError>,
    WithRejection(Json(body), _): WithRejection<Json<UpsertIndexBody>, AppError>,
) -> Result<Json<IndexSummary>, AppError> {
    let index = state
        .services
        .ingest
        .upsert_index(&code, &body.name, body.full_name.as_deref())
        .await?;
    let detail = state.services.query.get_index(&index.code).await?;
    Ok(Json(detail.summary))
}

/// # POST /api/v1/indices/:code/observations
pub async fn append_observation(
    State(state): State<Arc<AppState>>,
    WithRejection(Path(code), _): WithRejection<Path<String>, AppError>,
    WithRejection(Json(body), _): WithRejection<Json<ObservationBody>, AppError>,
) -> Result<(StatusCode, Json<ObservationCreated>), AppError> {
    let observation = PriceObservation { timestamp: body.timestamp, price: body.price };
    let stored = state.services.ingest.append_observation(&code, observation).await?;
    Ok((
        StatusCode::CREATED,
        Json(ObservationCreated { code, timestamp: stored.timestamp, price: stored.price }),
    ))
}

/// # GET /api/v1/stats/heatmap
pub async fn heatmap(State(state): State<Arc<AppState>>) -> Json<Heatmap> {
    Json(state.services.query.heatmap())
}

/// # GET /api/v1/stats/distribution
pub async fn distribution(State(state): State<Arc<AppState>>) -> Json<Distribution> {
    Json(state.services.query.distribution())
}

/// # POST /api/v1/tasks/refresh
/// Returns as soon as the task is recorded; the refresh runs in the background.
pub async fn trigger_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<RefreshTask>), AppError> {
    let task = state.services.refresh.trigger().await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// # GET /api/v1/tasks/refresh/:task_id
pub async fn get_refresh_task(
    State(state): State<Arc<AppState>>,
    WithRejection(Path(task_id), _): WithRejection<Path<String>, AppError>,
) -> Result<Json<RefreshTaskView>, AppError> {
    let view = state.services.refresh.task(&task_id).await?;
    Ok(Json(view))
}
