//! HTTP surface for job management.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::core::types::{
    ErrorResponse, JobListQuery, JobListResponse, JobResultsResponse, JobView, StartJobResponse,
};
use crate::core::AppState;
use crate::jobs::error::JobRequestError;
use crate::jobs::record::JobParams;
use crate::realtime::socket::ws_handler;

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/api/scrape/start", post(start_job_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/{id}", get(get_job_handler).delete(purge_job_handler))
        .route("/api/jobs/{id}/results", get(job_results_handler))
        .route("/api/jobs/{id}/cancel", post(cancel_job_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn status_for(err: &JobRequestError) -> StatusCode {
    match err {
        JobRequestError::InvalidRange | JobRequestError::InvalidCount => StatusCode::BAD_REQUEST,
        JobRequestError::ClientBusy(_)
        | JobRequestError::NotCancellable
        | JobRequestError::StillRunning => StatusCode::CONFLICT,
        JobRequestError::TooManyJobs(_) => StatusCode::TOO_MANY_REQUESTS,
        JobRequestError::NotFound => StatusCode::NOT_FOUND,
        JobRequestError::AutomationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn reject(err: JobRequestError) -> ApiError {
    (
        status_for(&err),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "docket-scout",
        "version": env!("CARGO_PKG_VERSION"),
        "active_jobs": state.jobs.active_count(),
        "connected_clients": state.registry.connected_clients(),
    }))
}

async fn start_job_handler(
    State(state): State<Arc<AppState>>,
    Json(params): Json<JobParams>,
) -> Result<(StatusCode, Json<StartJobResponse>), ApiError> {
    if params.client_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "client_id is required".to_string(),
            }),
        ));
    }
    if !state.registry.is_connected(&params.client_id) {
        warn!(
            client_id = %params.client_id,
            "starting job for a client with no open channel; events are dropped until it connects"
        );
    }
    let job = state.jobs.start(params).map_err(reject)?;
    info!(job_id = %job.job_id, "scrape job accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(StartJobResponse {
            job_id: job.job_id.clone(),
            client_id: job.client_id.clone(),
            status: job.status(),
            message: "Scraping job started".to_string(),
        }),
    ))
}

async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobListQuery>,
) -> Json<JobListResponse> {
    let jobs: Vec<JobView> = state
        .jobs
        .list(query.status, query.limit)
        .iter()
        .map(JobView::from)
        .collect();
    Json(JobListResponse {
        total: jobs.len(),
        jobs,
    })
}

async fn get_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    state
        .jobs
        .get(&id)
        .map(|job| Json(JobView::from(&job)))
        .ok_or_else(|| reject(JobRequestError::NotFound))
}

async fn job_results_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResultsResponse>, ApiError> {
    state
        .jobs
        .get(&id)
        .map(|job| Json(JobResultsResponse::from(&job)))
        .ok_or_else(|| reject(JobRequestError::NotFound))
}

async fn cancel_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.jobs.cancel(&id).map_err(reject)?;
    Ok(Json(JobView::from(&job)))
}

async fn purge_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.jobs.purge(&id).map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_map_to_http_statuses() {
        assert_eq!(status_for(&JobRequestError::InvalidRange), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&JobRequestError::ClientBusy("c".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(&JobRequestError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&JobRequestError::AutomationUnavailable("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
