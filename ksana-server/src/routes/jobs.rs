use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use ksana_core::{Job, JobStatus};
use tracing::info;

use crate::dto::{CreateJobRequest, UpdateJobRequest};
use crate::error::ApiError;
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = payload.into_job();
    job.validate(Utc::now())?;

    let created = state.store.put(job).await?;
    state.scheduler.add_job(created.clone()).await?;
    info!(job_id = %created.id, job_name = %created.name, "job created");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.store.get(&id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateJobRequest>,
) -> Result<Json<Job>, ApiError> {
    let existing = state.store.get(&id).await?;
    let updated = payload.apply_to(existing);
    updated.validate(Utc::now())?;

    let saved = state.store.put(updated).await?;
    state.scheduler.update_job(saved.clone()).await?;
    Ok(Json(saved))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&id).await?;
    state.scheduler.remove_job(&id).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn run_now(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.run_now(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn pause(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    toggle_enabled(state, id, false).await
}

pub async fn resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    toggle_enabled(state, id, true).await
}

async fn toggle_enabled(
    state: AppState,
    id: String,
    enabled: bool,
) -> Result<Json<Job>, ApiError> {
    let mut job = state.store.get(&id).await?;
    job.enabled = enabled;
    if !enabled {
        job.last_status = JobStatus::Paused;
    }

    let saved = state.store.put(job).await?;
    state.scheduler.update_job(saved.clone()).await?;
    Ok(Json(saved))
}
