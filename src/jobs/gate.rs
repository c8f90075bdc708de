//! Interaction Gate: the single suspension point of a job.
//!
//! The orchestrator installs a request and awaits; the realtime registry
//! delivers inbound operator messages. A message arriving while nothing is
//! pending is dropped, which is how duplicate and late decisions are ignored.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::JobError;
use super::events::{Decision, InboundMessage, InteractionKind, InteractionRequest};
use super::record::JobId;

struct Pending {
    kind: InteractionKind,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

pub struct InteractionGate {
    job_id: JobId,
    pending: Mutex<Option<Pending>>,
}

/// An armed request. Messages delivered from the moment it exists are
/// queued for it; dropping it clears the pending slot.
pub struct PendingWait<'a> {
    gate: &'a InteractionGate,
    request: InteractionRequest,
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    _keep_open: mpsc::UnboundedSender<InboundMessage>,
}

impl Drop for PendingWait<'_> {
    fn drop(&mut self) {
        *self.gate.lock() = None;
    }
}

impl PendingWait<'_> {
    /// Suspend until a valid decision arrives.
    ///
    /// Invalid messages are logged and the wait continues. The timeout is a
    /// single deadline for the whole wait, not reset by rejected messages.
    pub async fn decide(
        mut self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Decision, JobError> {
        let kind = self.request.kind();
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let sleep = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => futures::future::pending::<()>().await,
            }
        };
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = &mut sleep => {
                    return Err(JobError::InteractionTimeout {
                        kind,
                        waited: timeout.unwrap_or_default(),
                    });
                }
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { continue };
                    match self.request.validate(&msg) {
                        Ok(decision) => {
                            debug!(job_id = %self.gate.job_id, action = %msg.action, "decision accepted");
                            return Ok(decision);
                        }
                        Err(e) => {
                            warn!(job_id = %self.gate.job_id, action = %msg.action, "rejected operator message: {}", e);
                        }
                    }
                }
            }
        }
    }
}

impl InteractionGate {
    pub fn new(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            pending: Mutex::new(None),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Install `request` as the pending interaction. Prompt the operator
    /// only after this returns so no early answer is lost.
    pub fn open(&self, request: InteractionRequest) -> PendingWait<'_> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slot = self.lock();
        if slot.is_some() {
            warn!(job_id = %self.job_id, "replacing a pending interaction request");
        }
        *slot = Some(Pending {
            kind: request.kind(),
            tx: tx.clone(),
        });
        PendingWait {
            gate: self,
            request,
            rx,
            _keep_open: tx,
        }
    }

    /// `open` followed by `decide`.
    pub async fn await_response(
        &self,
        request: InteractionRequest,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Decision, JobError> {
        self.open(request).decide(timeout, cancel).await
    }

    /// Hand an inbound message to the waiting job. Returns false, and drops
    /// the message, when nothing is pending.
    pub fn deliver(&self, msg: InboundMessage) -> bool {
        let slot = self.lock();
        match slot.as_ref() {
            Some(pending) => {
                debug!(
                    job_id = %self.job_id,
                    awaiting = %pending.kind,
                    action = %msg.action,
                    "routing operator message"
                );
                pending.tx.send(msg).is_ok()
            }
            None => {
                warn!(
                    job_id = %self.job_id,
                    action = %msg.action,
                    "no pending interaction; dropping operator message"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::events::{CourtDecision, EntryDecision};
    use crate::scraping::automation::CourtCandidates;
    use serde_json::json;
    use std::sync::Arc;

    fn court_request() -> InteractionRequest {
        InteractionRequest::Court(CourtCandidates {
            user_input: "nev".into(),
            options: vec!["D. Nev.".into(), "D. N.M.".into()],
            exact_matches: vec!["D. Nev.".into()],
            fuzzy_matches: vec![],
        })
    }

    async fn wait_until_pending(gate: &InteractionGate) {
        while !gate.is_pending() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn delivers_valid_decision() {
        let gate = Arc::new(InteractionGate::new("job-1"));
        let cancel = CancellationToken::new();
        let g = gate.clone();
        let c = cancel.clone();
        let waiter = tokio::spawn(async move { g.await_response(court_request(), None, &c).await });

        wait_until_pending(&gate).await;
        assert!(gate.deliver(InboundMessage::new("select_court", json!({"court": "D. N.M."}))));

        let decision = waiter.await.unwrap().unwrap();
        assert_eq!(decision, Decision::Court(CourtDecision::Selected("D. N.M.".into())));
        assert!(!gate.is_pending());
    }

    #[tokio::test]
    async fn invalid_messages_do_not_resolve_the_wait() {
        let gate = Arc::new(InteractionGate::new("job-2"));
        let cancel = CancellationToken::new();
        let g = gate.clone();
        let c = cancel.clone();
        let waiter = tokio::spawn(async move {
            g.await_response(InteractionRequest::Entries { count: 2 }, None, &c)
                .await
        });

        wait_until_pending(&gate).await;
        gate.deliver(InboundMessage::new("select_court", json!({"court": "x"})));
        gate.deliver(InboundMessage::new("download_selected", json!({"indices": [5]})));
        gate.deliver(InboundMessage::new("frobnicate", json!({})));
        gate.deliver(InboundMessage::new("download_selected", json!({"indices": [1]})));

        let decision = waiter.await.unwrap().unwrap();
        assert_eq!(decision, Decision::Entries(EntryDecision::Subset(vec![1])));
    }

    #[tokio::test]
    async fn answers_sent_right_after_open_are_kept() {
        let gate = InteractionGate::new("job-6");
        let cancel = CancellationToken::new();
        let wait = gate.open(InteractionRequest::Entries { count: 3 });
        assert!(gate.deliver(InboundMessage::new("download_all", json!({}))));
        let decision = wait.decide(None, &cancel).await.unwrap();
        assert_eq!(decision, Decision::Entries(EntryDecision::All));
        assert!(!gate.is_pending());
    }

    #[tokio::test]
    async fn message_without_pending_request_is_dropped() {
        let gate = InteractionGate::new("job-3");
        assert!(!gate.deliver(InboundMessage::new("download_all", json!({}))));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let gate = InteractionGate::new("job-4");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = tokio_test::assert_err!(gate.await_response(court_request(), None, &cancel).await);
        assert!(matches!(err, JobError::Cancelled));
        assert!(!gate.is_pending());
    }

    #[tokio::test]
    async fn timeout_fails_the_wait() {
        let gate = InteractionGate::new("job-5");
        let cancel = CancellationToken::new();
        let err = gate
            .await_response(
                InteractionRequest::Entries { count: 1 },
                Some(Duration::from_millis(20)),
                &cancel,
            )
            .await
            .unwrap_err();
        match err {
            JobError::InteractionTimeout { kind, waited } => {
                assert_eq!(kind, crate::jobs::events::InteractionKind::EntrySelection);
                assert_eq!(waited, Duration::from_millis(20));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!gate.is_pending());
    }
}
