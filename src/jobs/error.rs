use std::time::Duration;

use thiserror::Error;

use super::events::InteractionKind;
use super::phase::Phase;
use crate::scraping::automation::AutomationFault;

/// Conditions that end an orchestration run early.
///
/// `Cancelled` is not a failure: it terminates the job as CANCELLED and is
/// never reported through an ERROR event.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("automation failed: {0}")]
    Automation(#[from] AutomationFault),

    #[error("operator did not answer the {kind} prompt within {}s", waited.as_secs())]
    InteractionTimeout {
        kind: InteractionKind,
        waited: Duration,
    },

    #[error("job cancelled")]
    Cancelled,

    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: Phase, to: Phase },
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            JobError::Automation(fault) => fault.kind.code(),
            JobError::InteractionTimeout { .. } => "interaction_timeout",
            JobError::Cancelled => "cancelled",
            JobError::IllegalTransition { .. } => "illegal_transition",
        }
    }
}

/// A malformed operator decision. Handled inside the gate by re-awaiting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action '{action}' does not answer a {expected} prompt")]
    WrongKind {
        action: String,
        expected: InteractionKind,
    },

    #[error("missing or malformed payload field '{0}'")]
    BadPayload(&'static str),

    #[error("court '{0}' is not among the offered candidates")]
    UnknownCourt(String),

    #[error("entry index {index} out of range (0..{len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("empty selection")]
    EmptySelection,

    #[error("court could not be verified in the browser")]
    UnverifiedCourt,
}

/// Rejections surfaced to the job-management caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobRequestError {
    #[error("range_start must be >= 1 and range_end >= range_start")]
    InvalidRange,

    #[error("max_documents must be >= 1")]
    InvalidCount,

    #[error("client {0} already has an active job")]
    ClientBusy(String),

    #[error("too many active jobs (limit {0})")]
    TooManyJobs(usize),

    #[error("job not found")]
    NotFound,

    #[error("job already finished")]
    NotCancellable,

    #[error("job is still running")]
    StillRunning,

    #[error("automation unavailable: {0}")]
    AutomationUnavailable(String),
}
