//! The Job Record: what was asked for, where the job is, what it produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::JobRequestError;
use super::phase::Phase;

pub type JobId = String;
pub type ClientId = String;

/// Search form input. Opaque to the core; the collaborator interprets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub keywords: String,
    pub court_name: String,
    pub judge_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    All,
    Range,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    /// Entries chosen by the operator, or pattern matches when nobody asks.
    Selected,
    #[default]
    All,
}

/// Coarse lifecycle view derived from the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn of(phase: Phase) -> Self {
        match phase {
            Phase::Idle => JobStatus::Pending,
            Phase::Completed => JobStatus::Completed,
            Phase::Error => JobStatus::Failed,
            Phase::Cancelled => JobStatus::Cancelled,
            p if p.is_checkpoint() => JobStatus::Paused,
            _ => JobStatus::Running,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running | JobStatus::Paused)
    }
}

/// Parameters a caller supplies when creating a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobParams {
    pub client_id: ClientId,
    #[serde(flatten)]
    pub search_criteria: SearchCriteria,
    #[serde(default)]
    pub selection_mode: SelectionMode,
    #[serde(default)]
    pub range_start: Option<usize>,
    #[serde(default)]
    pub range_end: Option<usize>,
    /// Caps the number of visited documents regardless of selection mode.
    #[serde(default)]
    pub max_documents: Option<usize>,
    #[serde(default)]
    pub download_mode: DownloadMode,
}

impl JobParams {
    pub fn validate(&self) -> Result<(), JobRequestError> {
        if matches!(self.range_start, Some(0)) || matches!(self.range_end, Some(0)) {
            return Err(JobRequestError::InvalidRange);
        }
        if let (Some(start), Some(end)) = (self.range_start, self.range_end) {
            if end < start {
                return Err(JobRequestError::InvalidRange);
            }
        }
        if matches!(self.max_documents, Some(0)) {
            return Err(JobRequestError::InvalidCount);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub filename: String,
    pub path: String,
    pub document_ordinal: usize,
    /// Index of the entry within its document's option list.
    pub entry_index: usize,
    pub entry_num: String,
    pub downloaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub ordinal: usize,
    pub title: String,
    pub entries_found: usize,
    pub entries_downloaded: usize,
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_results: usize,
    pub documents_processed: usize,
    pub entries_found: usize,
    pub entries_downloaded: usize,
    pub errors: usize,
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub client_id: ClientId,
    pub search_criteria: SearchCriteria,
    pub selection_mode: SelectionMode,
    pub range_start: Option<usize>,
    pub range_end: Option<usize>,
    pub max_documents: Option<usize>,
    pub download_mode: DownloadMode,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_results: usize,
    pub documents: Vec<DocumentOutcome>,
    pub results: Vec<DownloadedFile>,
    pub error: Option<String>,
    pub cancel_requested: bool,
}

impl JobRecord {
    pub fn new(params: JobParams) -> Result<Self, JobRequestError> {
        params.validate()?;
        Ok(Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            client_id: params.client_id,
            search_criteria: params.search_criteria,
            selection_mode: params.selection_mode,
            range_start: params.range_start,
            range_end: params.range_end,
            max_documents: params.max_documents,
            download_mode: params.download_mode,
            phase: Phase::Idle,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            total_results: 0,
            documents: Vec::new(),
            results: Vec::new(),
            error: None,
            cancel_requested: false,
        })
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::of(self.phase)
    }

    /// 1-based ordinals of the documents to visit, in visiting order.
    pub fn plan_documents(&self, total: usize) -> Vec<usize> {
        let (first, last) = match self.selection_mode {
            SelectionMode::All => (1, total),
            SelectionMode::Range => (
                self.range_start.unwrap_or(1),
                self.range_end.map_or(total, |end| end.min(total)),
            ),
        };
        if first == 0 || first > last {
            return Vec::new();
        }
        let mut plan: Vec<usize> = (first..=last).collect();
        if let Some(max) = self.max_documents {
            plan.truncate(max);
        }
        plan
    }

    /// Results are only ever appended while downloading.
    pub fn push_result(&mut self, file: DownloadedFile) -> bool {
        if self.phase != Phase::Downloading {
            return false;
        }
        self.results.push(file);
        true
    }

    pub fn mark_cancel_requested(&mut self) {
        self.cancel_requested = true;
    }

    pub fn duration_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            status: self.status(),
            total_results: self.total_results,
            documents_processed: self.documents.len(),
            entries_found: self.documents.iter().map(|d| d.entries_found).sum(),
            entries_downloaded: self.results.len(),
            errors: usize::from(self.error.is_some()),
            duration_secs: self.duration_secs(),
        }
    }
}
