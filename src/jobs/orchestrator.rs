//! Job Orchestrator: drives one job through its phases.
//!
//! One orchestrator owns one [`JobRecord`] and one browser collaborator for
//! the whole run. Every phase change is emitted as a STATE_CHANGE event and
//! published as a snapshot. The run always ends in exactly one terminal
//! phase, and the collaborator is shut down on every exit path.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::error::{JobError, ValidationError};
use super::events::{
    CourtDecision, Decision, EntryDecision, EntryOption, InteractionRequest, OutboundEvent,
};
use super::gate::InteractionGate;
use super::phase::{CheckpointPolicy, CourtResolution, CourtSkipTrust, EntryResolution, Phase};
use super::record::{DocumentOutcome, DownloadedFile, JobRecord, JobStatus};
use crate::realtime::registry::ChannelRegistry;
use crate::scraping::automation::{
    AutomationFault, CourtCandidates, CourtChoice, DocketEntry, DocumentRef, PortalAutomation,
};

pub struct Orchestrator {
    record: JobRecord,
    automation: Box<dyn PortalAutomation>,
    registry: Arc<ChannelRegistry>,
    gate: Arc<InteractionGate>,
    policy: CheckpointPolicy,
    cancel: CancellationToken,
    snapshots: watch::Sender<JobRecord>,
}

impl Orchestrator {
    pub fn new(
        record: JobRecord,
        automation: Box<dyn PortalAutomation>,
        registry: Arc<ChannelRegistry>,
        policy: CheckpointPolicy,
    ) -> Self {
        let gate = Arc::new(InteractionGate::new(record.job_id.clone()));
        let (snapshots, _) = watch::channel(record.clone());
        Self {
            record,
            automation,
            registry,
            gate,
            policy,
            cancel: CancellationToken::new(),
            snapshots,
        }
    }

    /// Use an externally owned token, e.g. a child of a shutdown token.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Read-only view of the record, updated after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<JobRecord> {
        self.snapshots.subscribe()
    }

    pub fn job_id(&self) -> &str {
        &self.record.job_id
    }

    /// Run the job to a terminal phase and return the final record.
    pub async fn run(mut self) -> JobRecord {
        let client_id = self.record.client_id.clone();
        let job_id = self.record.job_id.clone();
        self.registry.bind(&client_id, &job_id, self.gate.clone());
        info!(%job_id, %client_id, mode = ?self.policy.mode, "job started");

        let outcome = self.drive().await;
        if self.cancel.is_cancelled() && !self.record.cancel_requested {
            self.record.mark_cancel_requested();
            self.publish();
        }

        let artifact = match &outcome {
            Err(JobError::Automation(_)) | Err(JobError::InteractionTimeout { .. }) => {
                self.automation.capture_diagnostic(self.record.phase.as_str()).await
            }
            _ => None,
        };
        self.automation.shutdown().await;
        self.finish(outcome, artifact);

        self.registry.unbind(&client_id, &job_id);
        info!(%job_id, phase = %self.record.phase, "job finished");
        self.record
    }

    fn finish(&mut self, outcome: Result<(), JobError>, artifact: Option<String>) {
        let err = match outcome {
            Ok(()) => return,
            Err(e) => e,
        };

        if self.record.phase.is_terminal() {
            warn!(job_id = %self.record.job_id, "job already terminal; ignoring late failure: {}", err);
            return;
        }

        match err {
            JobError::Cancelled => {
                self.record.mark_cancel_requested();
                self.enter_terminal(Phase::Cancelled, "Job cancelled");
            }
            err => {
                let failed_in = self.record.phase;
                error!(job_id = %self.record.job_id, phase = %failed_in, code = err.code(), "job failed: {}", err);
                self.record.error = Some(err.to_string());
                self.emit(OutboundEvent::Error {
                    job_id: self.record.job_id.clone(),
                    message: err.to_string(),
                    error_code: err.code().to_string(),
                    details: Some(json!({
                        "phase": failed_in,
                        "artifact": artifact,
                    })),
                });
                self.enter_terminal(Phase::Error, format!("Failed during {failed_in}"));
            }
        }
    }

    /// Terminal transitions are legal from any live phase and skip the
    /// cancellation check.
    fn enter_terminal(&mut self, phase: Phase, message: impl Into<String>) {
        if let Err(e) = self.transition(phase, message) {
            error!(job_id = %self.record.job_id, "could not enter {}: {}", phase, e);
        }
    }

    fn transition(&mut self, next: Phase, message: impl Into<String>) -> Result<(), JobError> {
        if !next.is_terminal() {
            self.check_cancel()?;
        }
        let previous = self.record.phase;
        if !previous.can_transition_to(next) {
            return Err(JobError::IllegalTransition {
                from: previous,
                to: next,
            });
        }

        let message = message.into();
        self.record.phase = next;
        match next {
            Phase::Initializing => self.record.started_at = Some(Utc::now()),
            p if p.is_terminal() => self.record.completed_at = Some(Utc::now()),
            _ => {}
        }
        info!(job_id = %self.record.job_id, "{} -> {} | {}", previous, next, message);

        self.emit(OutboundEvent::StateChange {
            job_id: self.record.job_id.clone(),
            phase: next,
            previous_phase: Some(previous),
            message,
        });
        self.publish();
        Ok(())
    }

    fn check_cancel(&mut self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            if !self.record.cancel_requested {
                self.record.mark_cancel_requested();
                self.publish();
            }
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    fn emit(&self, event: OutboundEvent) {
        self.registry.send(&self.record.client_id, event);
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.record.clone());
    }

    fn info_event(&self, message: impl Into<String>) {
        self.emit(OutboundEvent::Info {
            job_id: self.record.job_id.clone(),
            message: message.into(),
        });
    }

    fn warning_event(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(job_id = %self.record.job_id, "{}", message);
        self.emit(OutboundEvent::Warning {
            job_id: self.record.job_id.clone(),
            message,
        });
    }

    async fn drive(&mut self) -> Result<(), JobError> {
        self.transition(Phase::Initializing, "Launching browser")?;
        self.automation.launch().await?;

        self.transition(Phase::LoggingIn, "Logging in to portal")?;
        self.automation.login().await?;

        self.transition(Phase::Searching, "Performing search")?;
        let criteria = self.record.search_criteria.clone();
        let candidates = self.automation.search(&criteria).await?;
        let choice = self.settle_court(candidates).await?;

        self.transition(Phase::ProcessingResults, "Processing search results")?;
        let documents = self.automation.submit_search(&choice).await?;
        self.record.total_results = documents.len();
        let plan = self.record.plan_documents(documents.len());
        self.publish();

        if plan.is_empty() {
            self.warning_event(format!(
                "No documents to process ({} results found)",
                documents.len()
            ));
        } else {
            self.info_event(format!(
                "Found {} results; processing {} documents",
                documents.len(),
                plan.len()
            ));
        }

        let total = plan.len();
        for (i, ordinal) in plan.into_iter().enumerate() {
            self.check_cancel()?;
            let document = documents
                .iter()
                .find(|d| d.ordinal == ordinal)
                .cloned()
                .ok_or_else(|| {
                    AutomationFault::element_not_found(format!("result {ordinal} not listed"))
                })?;
            self.process_document(i + 1, total, &document).await?;
        }

        // COMPLETED skips the transition check, so the last boundary is here.
        self.check_cancel()?;
        let mut summary = self.record.summary();
        summary.status = JobStatus::Completed;
        self.emit(OutboundEvent::Complete {
            job_id: self.record.job_id.clone(),
            message: format!(
                "Processed {} documents, downloaded {} entries",
                summary.documents_processed, summary.entries_downloaded
            ),
            summary,
        });
        self.transition(Phase::Completed, "Job completed")?;
        Ok(())
    }

    /// Resolve the court checkpoint. Leaves the phase at SEARCHING or
    /// AWAITING_COURT_SELECTION.
    async fn settle_court(&mut self, candidates: CourtCandidates) -> Result<CourtChoice, JobError> {
        if candidates.is_empty() {
            return Err(AutomationFault::element_not_found(format!(
                "no courts found matching '{}'",
                candidates.user_input
            ))
            .into());
        }

        match self.policy.resolve_court(&candidates) {
            CourtResolution::Auto(court) => {
                info!(job_id = %self.record.job_id, %court, "court selected automatically");
                self.info_event(format!("Court selected automatically: {court}"));
                return Ok(CourtChoice::Selected(court));
            }
            CourtResolution::NoDefault => {
                return Err(AutomationFault::element_not_found(format!(
                    "no exact court match for '{}'",
                    candidates.user_input
                ))
                .into());
            }
            CourtResolution::Prompt => {}
        }

        self.transition(Phase::AwaitingCourtSelection, "Waiting for court selection")?;
        let prompt = OutboundEvent::CourtSelection {
            job_id: self.record.job_id.clone(),
            user_input: candidates.user_input.clone(),
            candidates: candidates.options.clone(),
            exact_matches: candidates.exact_matches.clone(),
            fuzzy_matches: candidates.fuzzy_matches.clone(),
            message: format!(
                "{} courts match '{}'; please choose one",
                candidates.options.len(),
                candidates.user_input
            ),
        };

        let gate = self.gate.clone();
        loop {
            let wait = gate.open(InteractionRequest::Court(candidates.clone()));
            self.emit(prompt.clone());
            let decision = wait
                .decide(self.policy.interaction_timeout, &self.cancel)
                .await?;

            match decision {
                Decision::Court(CourtDecision::Selected(court)) => {
                    info!(job_id = %self.record.job_id, %court, "operator selected court");
                    return Ok(CourtChoice::Selected(court));
                }
                Decision::Court(CourtDecision::ResolvedInBrowser) => {
                    if self.policy.court_skip_trust == CourtSkipTrust::Trust {
                        self.info_event("Skipped court selection; using the browser's selection");
                        return Ok(CourtChoice::ResolvedInBrowser);
                    }
                    match self.automation.current_court().await? {
                        Some(court) if candidates.contains(&court) => {
                            self.info_event(format!("Verified court in browser: {court}"));
                            return Ok(CourtChoice::ResolvedInBrowser);
                        }
                        other => {
                            self.warning_event(format!(
                                "{} (browser shows {}); select again",
                                ValidationError::UnverifiedCourt,
                                other.as_deref().unwrap_or("no court")
                            ));
                        }
                    }
                }
                Decision::Entries(_) => {}
            }
        }
    }

    /// Resolve the entry checkpoint. Leaves the phase at EXTRACTING_ENTRIES
    /// or AWAITING_TRANSCRIPT_SELECTION.
    async fn settle_entries(
        &mut self,
        position: usize,
        total: usize,
        document: &DocumentRef,
        entries: &[DocketEntry],
    ) -> Result<Vec<usize>, JobError> {
        match self.policy.resolve_entries(self.record.download_mode, entries) {
            EntryResolution::Auto(indices) => {
                if indices.is_empty() {
                    self.warning_event(format!(
                        "No matching entries in document {position}; skipping"
                    ));
                }
                return Ok(indices);
            }
            EntryResolution::Prompt => {}
        }

        self.transition(
            Phase::AwaitingTranscriptSelection,
            format!("Waiting for entry selection in document {position}"),
        )?;
        let wait = self.gate.open(InteractionRequest::Entries {
            count: entries.len(),
        });
        self.emit(OutboundEvent::TranscriptOptions {
            job_id: self.record.job_id.clone(),
            document_title: document.title.clone(),
            document_index: position,
            total_documents: total,
            entries: EntryOption::from_entries(entries),
            message: format!("Select entries to download from '{}'", document.title),
        });
        let decision = wait
            .decide(self.policy.interaction_timeout, &self.cancel)
            .await?;

        match decision {
            Decision::Entries(EntryDecision::All) => Ok((0..entries.len()).collect()),
            Decision::Entries(EntryDecision::Subset(indices)) => Ok(indices),
            Decision::Entries(EntryDecision::Skip) => {
                self.info_event(format!("Skipped document {position}"));
                Ok(Vec::new())
            }
            Decision::Court(_) => Ok(Vec::new()),
        }
    }

    async fn process_document(
        &mut self,
        position: usize,
        total: usize,
        document: &DocumentRef,
    ) -> Result<(), JobError> {
        self.emit(OutboundEvent::progress(
            &self.record.job_id,
            format!("Processing document {position} of {total}"),
            position,
            total,
        ));
        self.transition(
            Phase::NavigatingToDocument,
            format!("Opening document {position} of {total}: {}", document.title),
        )?;
        let entries = self.automation.open_document(document).await?;

        self.transition(
            Phase::ExtractingEntries,
            format!("Found {} entries", entries.len()),
        )?;
        let selection = if entries.is_empty() {
            self.warning_event(format!(
                "No downloadable entries in document {position}"
            ));
            Vec::new()
        } else {
            self.settle_entries(position, total, document, &entries).await?
        };

        let mut outcome = DocumentOutcome {
            ordinal: document.ordinal,
            title: document.title.clone(),
            entries_found: entries.len(),
            entries_downloaded: 0,
            skipped: selection.is_empty(),
        };

        if !selection.is_empty() {
            self.transition(
                Phase::Downloading,
                format!("Downloading {} entries", selection.len()),
            )?;
            let result = self
                .download_selection(document, &entries, &selection, &mut outcome)
                .await;
            if result.is_err() {
                self.record.documents.push(outcome);
                self.publish();
                return result;
            }
        }

        self.record.documents.push(outcome);
        self.transition(Phase::ReturningToResults, "Returning to results")?;
        self.automation.go_back().await?;
        Ok(())
    }

    async fn download_selection(
        &mut self,
        document: &DocumentRef,
        entries: &[DocketEntry],
        selection: &[usize],
        outcome: &mut DocumentOutcome,
    ) -> Result<(), JobError> {
        for (n, &index) in selection.iter().enumerate() {
            self.check_cancel()?;
            let Some(entry) = entries.get(index) else {
                continue;
            };
            self.emit(OutboundEvent::progress(
                &self.record.job_id,
                format!("Downloading entry {}", entry.entry_num),
                n + 1,
                selection.len(),
            ));

            match self.automation.download(document, entry).await {
                Ok(file) => {
                    let appended = self.record.push_result(DownloadedFile {
                        filename: file.filename.clone(),
                        path: file.path,
                        document_ordinal: document.ordinal,
                        entry_index: index,
                        entry_num: entry.entry_num.clone(),
                        downloaded_at: file.downloaded_at,
                    });
                    if appended {
                        outcome.entries_downloaded += 1;
                    }
                    self.emit(OutboundEvent::DownloadSuccess {
                        job_id: self.record.job_id.clone(),
                        filename: file.filename,
                        entry_index: index,
                        entry_num: entry.entry_num.clone(),
                    });
                    self.publish();
                }
                Err(fault) => {
                    self.emit(OutboundEvent::DownloadFailed {
                        job_id: self.record.job_id.clone(),
                        entry_index: index,
                        entry_num: entry.entry_num.clone(),
                        message: fault.message.clone(),
                    });
                    return Err(fault.into());
                }
            }
        }
        Ok(())
    }
}
