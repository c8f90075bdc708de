//! Wire vocabulary between a job and its operator.
//!
//! Outbound events are a closed tagged union serialised with a `type` tag.
//! Inbound operator messages are `{action, payload}` objects decoded into
//! [`OperatorDecision`]; unknown actions are rejected, never ignored.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ValidationError;
use super::phase::Phase;
use super::record::{JobId, JobSummary};
use crate::scraping::automation::{CourtCandidates, DocketEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    CourtSelection,
    EntrySelection,
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionKind::CourtSelection => f.write_str("court selection"),
            InteractionKind::EntrySelection => f.write_str("entry selection"),
        }
    }
}

/// An entry as presented to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOption {
    pub index: usize,
    pub entry_num: String,
    pub filed_date: String,
    pub description: String,
    pub matches_pattern: bool,
    pub matched_pattern: Option<String>,
}

impl EntryOption {
    pub fn from_entries(entries: &[DocketEntry]) -> Vec<Self> {
        entries
            .iter()
            .enumerate()
            .map(|(index, e)| EntryOption {
                index,
                entry_num: e.entry_num.clone(),
                filed_date: e.filed_date.clone(),
                description: e.description.clone(),
                matches_pattern: e.matches_pattern(),
                matched_pattern: e.matched_pattern.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundEvent {
    Connected {
        client_id: String,
    },
    StateChange {
        job_id: JobId,
        phase: Phase,
        previous_phase: Option<Phase>,
        message: String,
    },
    CourtSelection {
        job_id: JobId,
        user_input: String,
        candidates: Vec<String>,
        exact_matches: Vec<String>,
        fuzzy_matches: Vec<String>,
        message: String,
    },
    TranscriptOptions {
        job_id: JobId,
        document_title: String,
        document_index: usize,
        total_documents: usize,
        entries: Vec<EntryOption>,
        message: String,
    },
    Progress {
        job_id: JobId,
        message: String,
        current: usize,
        total: usize,
        percentage: Option<f64>,
    },
    DownloadSuccess {
        job_id: JobId,
        filename: String,
        entry_index: usize,
        entry_num: String,
    },
    DownloadFailed {
        job_id: JobId,
        entry_index: usize,
        entry_num: String,
        message: String,
    },
    Info {
        job_id: JobId,
        message: String,
    },
    Warning {
        job_id: JobId,
        message: String,
    },
    Error {
        job_id: JobId,
        message: String,
        error_code: String,
        details: Option<Value>,
    },
    Complete {
        job_id: JobId,
        message: String,
        summary: JobSummary,
    },
    Pong,
}

impl OutboundEvent {
    pub fn progress(job_id: &str, message: impl Into<String>, current: usize, total: usize) -> Self {
        let percentage = (total > 0).then(|| current as f64 / total as f64 * 100.0);
        OutboundEvent::Progress {
            job_id: job_id.to_string(),
            message: message.into(),
            current,
            total,
            percentage,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Connected { .. } => "CONNECTED",
            OutboundEvent::StateChange { .. } => "STATE_CHANGE",
            OutboundEvent::CourtSelection { .. } => "COURT_SELECTION",
            OutboundEvent::TranscriptOptions { .. } => "TRANSCRIPT_OPTIONS",
            OutboundEvent::Progress { .. } => "PROGRESS",
            OutboundEvent::DownloadSuccess { .. } => "DOWNLOAD_SUCCESS",
            OutboundEvent::DownloadFailed { .. } => "DOWNLOAD_FAILED",
            OutboundEvent::Info { .. } => "INFO",
            OutboundEvent::Warning { .. } => "WARNING",
            OutboundEvent::Error { .. } => "ERROR",
            OutboundEvent::Complete { .. } => "COMPLETE",
            OutboundEvent::Pong => "PONG",
        }
    }
}

/// What actually goes over the socket.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<'a> {
    #[serde(flatten)]
    pub event: &'a OutboundEvent,
    pub timestamp: DateTime<Utc>,
}

/// Raw inbound operator message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl InboundMessage {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorDecision {
    SelectCourt(String),
    SkipCourtSelection,
    DownloadSelected(Vec<usize>),
    DownloadAll,
    Skip,
}

impl OperatorDecision {
    pub fn kind(&self) -> InteractionKind {
        match self {
            OperatorDecision::SelectCourt(_) | OperatorDecision::SkipCourtSelection => {
                InteractionKind::CourtSelection
            }
            OperatorDecision::DownloadSelected(_)
            | OperatorDecision::DownloadAll
            | OperatorDecision::Skip => InteractionKind::EntrySelection,
        }
    }
}

impl TryFrom<&InboundMessage> for OperatorDecision {
    type Error = ValidationError;

    fn try_from(msg: &InboundMessage) -> Result<Self, Self::Error> {
        match msg.action.as_str() {
            "select_court" => {
                let court = ["court", "selected_court"]
                    .iter()
                    .find_map(|k| msg.payload.get(*k).and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(ValidationError::BadPayload("court"))?;
                Ok(OperatorDecision::SelectCourt(court.to_string()))
            }
            "skip_court_selection" => Ok(OperatorDecision::SkipCourtSelection),
            "download_selected" => {
                let raw = ["indices", "selected_indices"]
                    .iter()
                    .find_map(|k| msg.payload.get(*k).and_then(Value::as_array))
                    .ok_or(ValidationError::BadPayload("indices"))?;
                let indices = raw
                    .iter()
                    .map(|v| v.as_u64().map(|n| n as usize))
                    .collect::<Option<Vec<_>>>()
                    .ok_or(ValidationError::BadPayload("indices"))?;
                Ok(OperatorDecision::DownloadSelected(indices))
            }
            "download_all" => Ok(OperatorDecision::DownloadAll),
            "skip" => Ok(OperatorDecision::Skip),
            other => Err(ValidationError::UnknownAction(other.to_string())),
        }
    }
}

/// What a suspended job is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionRequest {
    Court(CourtCandidates),
    Entries { count: usize },
}

impl InteractionRequest {
    pub fn kind(&self) -> InteractionKind {
        match self {
            InteractionRequest::Court(_) => InteractionKind::CourtSelection,
            InteractionRequest::Entries { .. } => InteractionKind::EntrySelection,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourtDecision {
    Selected(String),
    ResolvedInBrowser,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryDecision {
    All,
    /// Sorted, de-duplicated, in range.
    Subset(Vec<usize>),
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Court(CourtDecision),
    Entries(EntryDecision),
}

impl InteractionRequest {
    /// Decode and check an inbound message against this request.
    pub fn validate(&self, msg: &InboundMessage) -> Result<Decision, ValidationError> {
        let decision = OperatorDecision::try_from(msg)?;
        if decision.kind() != self.kind() {
            return Err(ValidationError::WrongKind {
                action: msg.action.clone(),
                expected: self.kind(),
            });
        }

        match (self, decision) {
            (InteractionRequest::Court(candidates), OperatorDecision::SelectCourt(court)) => {
                if !candidates.contains(&court) {
                    return Err(ValidationError::UnknownCourt(court));
                }
                Ok(Decision::Court(CourtDecision::Selected(court)))
            }
            (InteractionRequest::Court(_), OperatorDecision::SkipCourtSelection) => {
                Ok(Decision::Court(CourtDecision::ResolvedInBrowser))
            }
            (InteractionRequest::Entries { count }, OperatorDecision::DownloadSelected(mut indices)) => {
                if indices.is_empty() {
                    return Err(ValidationError::EmptySelection);
                }
                if let Some(&index) = indices.iter().find(|&&i| i >= *count) {
                    return Err(ValidationError::IndexOutOfRange { index, len: *count });
                }
                indices.sort_unstable();
                indices.dedup();
                Ok(Decision::Entries(EntryDecision::Subset(indices)))
            }
            (InteractionRequest::Entries { .. }, OperatorDecision::DownloadAll) => {
                Ok(Decision::Entries(EntryDecision::All))
            }
            (InteractionRequest::Entries { .. }, OperatorDecision::Skip) => {
                Ok(Decision::Entries(EntryDecision::Skip))
            }
            _ => Err(ValidationError::WrongKind {
                action: msg.action.clone(),
                expected: self.kind(),
            }),
        }
    }
}
