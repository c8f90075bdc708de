//! The narrow interface the orchestrator drives.
//!
//! Everything page-specific (form filling, selector tables, pattern matching
//! against entry descriptions) lives behind [`PortalAutomation`]. The
//! orchestrator never retries a browser action itself; it classifies the
//! returned [`AutomationFault`] and terminates the job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jobs::record::{JobRecord, SearchCriteria};

/// Classification of a collaborator failure. The snake_case form doubles as
/// the `error_code` of the ERROR event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    NavigationTimeout,
    ElementNotFound,
    AuthenticationRejected,
    DownloadFailed,
    BrowserUnavailable,
    Other,
}

impl FaultKind {
    pub fn code(&self) -> &'static str {
        match self {
            FaultKind::NavigationTimeout => "navigation_timeout",
            FaultKind::ElementNotFound => "element_not_found",
            FaultKind::AuthenticationRejected => "authentication_rejected",
            FaultKind::DownloadFailed => "download_failed",
            FaultKind::BrowserUnavailable => "browser_unavailable",
            FaultKind::Other => "automation_fault",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct AutomationFault {
    pub kind: FaultKind,
    pub message: String,
}

impl AutomationFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn navigation_timeout(message: impl Into<String>) -> Self {
        Self::new(FaultKind::NavigationTimeout, message)
    }

    pub fn element_not_found(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ElementNotFound, message)
    }

    pub fn auth_rejected(message: impl Into<String>) -> Self {
        Self::new(FaultKind::AuthenticationRejected, message)
    }

    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::new(FaultKind::DownloadFailed, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Other, message)
    }
}

pub type AutomationResult<T> = Result<T, AutomationFault>;

/// Courts offered by the portal for the operator's court input.
///
/// `exact_matches` and `fuzzy_matches` are subsets of `options`; their order is
/// presentation order only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourtCandidates {
    pub user_input: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub exact_matches: Vec<String>,
    #[serde(default)]
    pub fuzzy_matches: Vec<String>,
}

impl CourtCandidates {
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn contains(&self, court: &str) -> bool {
        self.options.iter().any(|o| o == court)
    }
}

/// How the court field should be settled before the search is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "court", rename_all = "snake_case")]
pub enum CourtChoice {
    Selected(String),
    /// The operator picked the court directly in the browser window.
    ResolvedInBrowser,
}

/// One search result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// 1-based position in the result set.
    pub ordinal: usize,
    pub title: String,
    pub url: String,
}

/// One downloadable entry found on a document's detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocketEntry {
    pub entry_num: String,
    pub filed_date: String,
    pub description: String,
    #[serde(default)]
    pub matched_pattern: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

impl DocketEntry {
    pub fn matches_pattern(&self) -> bool {
        self.matched_pattern.is_some()
    }
}

/// Descriptor of a file written by the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub filename: String,
    pub path: String,
    pub downloaded_at: DateTime<Utc>,
}

/// Browser-automation collaborator. One instance is owned by exactly one job
/// for its whole lifetime; `launch` acquires the browser session and
/// `shutdown` releases it.
#[async_trait]
pub trait PortalAutomation: Send {
    async fn launch(&mut self) -> AutomationResult<()>;

    async fn login(&mut self) -> AutomationResult<()>;

    /// Fill the search form and report the court candidates for the
    /// criteria's court name.
    async fn search(&mut self, criteria: &SearchCriteria) -> AutomationResult<CourtCandidates>;

    /// Apply the court choice, submit the search and list the result set.
    async fn submit_search(&mut self, court: &CourtChoice) -> AutomationResult<Vec<DocumentRef>>;

    /// Court currently applied in the page, if it can be read back.
    async fn current_court(&mut self) -> AutomationResult<Option<String>>;

    async fn open_document(&mut self, document: &DocumentRef) -> AutomationResult<Vec<DocketEntry>>;

    async fn download(
        &mut self,
        document: &DocumentRef,
        entry: &DocketEntry,
    ) -> AutomationResult<FileDescriptor>;

    async fn go_back(&mut self) -> AutomationResult<()>;

    /// Best-effort diagnostic capture; returns an artifact reference.
    async fn capture_diagnostic(&mut self, label: &str) -> Option<String>;

    /// Release the browser session. Must be safe to call more than once.
    async fn shutdown(&mut self);
}

/// Builds one collaborator per job.
pub trait AutomationFactory: Send + Sync {
    fn create(&self, job: &JobRecord) -> AutomationResult<Box<dyn PortalAutomation>>;
}
