use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::phase::Phase;
use crate::jobs::record::{DocumentOutcome, DownloadedFile, JobRecord, JobStatus, JobSummary};

#[derive(Debug, Serialize, Deserialize)]
pub struct StartJobResponse {
    pub job_id: String,
    pub client_id: String,
    pub status: JobStatus,
    pub message: String,
}

/// List / detail view of a job. Results are served separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub client_id: String,
    pub status: JobStatus,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_results: usize,
    pub results_count: usize,
    #[serde(default)]
    pub error: Option<String>,
    pub cancel_requested: bool,
}

impl From<&JobRecord> for JobView {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.job_id.clone(),
            client_id: job.client_id.clone(),
            status: job.status(),
            phase: job.phase,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            total_results: job.total_results,
            results_count: job.results.len(),
            error: job.error.clone(),
            cancel_requested: job.cancel_requested,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobResultsResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub summary: JobSummary,
    pub documents: Vec<DocumentOutcome>,
    pub results: Vec<DownloadedFile>,
}

impl From<&JobRecord> for JobResultsResponse {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status(),
            summary: job.summary(),
            documents: job.documents.clone(),
            results: job.results.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
