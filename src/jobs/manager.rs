//! Job management: create, query, cancel and purge jobs.
//!
//! Each started job runs in its own tokio task. The manager only keeps a
//! snapshot receiver, a cancel token and the task handle per job; the record
//! itself stays owned by the orchestrator until the run ends.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::JobRequestError;
use super::orchestrator::Orchestrator;
use super::phase::CheckpointPolicy;
use super::record::{JobId, JobParams, JobRecord, JobStatus};
use crate::realtime::registry::ChannelRegistry;
use crate::scraping::automation::AutomationFactory;

struct JobHandle {
    snapshot: watch::Receiver<JobRecord>,
    cancel: CancellationToken,
    task: Option<JoinHandle<JobRecord>>,
}

impl JobHandle {
    /// Latest snapshot. A live job whose token has fired reports the request
    /// right away, before the orchestrator reaches its next boundary.
    fn current(&self) -> JobRecord {
        let mut record = self.snapshot.borrow().clone();
        if !record.phase.is_terminal() && self.cancel.is_cancelled() {
            record.mark_cancel_requested();
        }
        record
    }
}

pub struct JobManager {
    registry: Arc<ChannelRegistry>,
    factory: Arc<dyn AutomationFactory>,
    policy: CheckpointPolicy,
    max_active: usize,
    shutdown: CancellationToken,
    jobs: RwLock<HashMap<JobId, JobHandle>>,
}

impl JobManager {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        factory: Arc<dyn AutomationFactory>,
        policy: CheckpointPolicy,
        max_active: usize,
    ) -> Self {
        Self {
            registry,
            factory,
            policy,
            max_active: max_active.max(1),
            shutdown: CancellationToken::new(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &CheckpointPolicy {
        &self.policy
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobHandle>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobHandle>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate, build a collaborator and spawn the orchestrator task.
    /// Returns the initial snapshot.
    pub fn start(&self, params: JobParams) -> Result<JobRecord, JobRequestError> {
        let record = JobRecord::new(params)?;

        let mut jobs = self.write();
        let active: Vec<JobRecord> = jobs
            .values()
            .map(JobHandle::current)
            .filter(|r| r.status().is_active())
            .collect();
        if active.iter().any(|r| r.client_id == record.client_id) {
            return Err(JobRequestError::ClientBusy(record.client_id));
        }
        if active.len() >= self.max_active {
            return Err(JobRequestError::TooManyJobs(self.max_active));
        }

        let automation = self
            .factory
            .create(&record)
            .map_err(|fault| JobRequestError::AutomationUnavailable(fault.to_string()))?;

        let orchestrator = Orchestrator::new(
            record.clone(),
            automation,
            self.registry.clone(),
            self.policy.clone(),
        )
        .with_cancel_token(self.shutdown.child_token());

        let handle = JobHandle {
            snapshot: orchestrator.subscribe(),
            cancel: orchestrator.cancel_token(),
            task: Some(tokio::spawn(orchestrator.run())),
        };
        info!(job_id = %record.job_id, client_id = %record.client_id, "job queued");
        jobs.insert(record.job_id.clone(), handle);
        Ok(record)
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.read().get(job_id).map(JobHandle::current)
    }

    /// Newest first.
    pub fn list(&self, status: Option<JobStatus>, limit: Option<usize>) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .read()
            .values()
            .map(JobHandle::current)
            .filter(|r| status.map_or(true, |s| r.status() == s))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        records
    }

    pub fn active_count(&self) -> usize {
        self.read()
            .values()
            .filter(|h| h.current().status().is_active())
            .count()
    }

    /// Request cooperative cancellation. The job reaches CANCELLED at its
    /// next phase boundary or gate wait.
    pub fn cancel(&self, job_id: &str) -> Result<JobRecord, JobRequestError> {
        let jobs = self.read();
        let handle = jobs.get(job_id).ok_or(JobRequestError::NotFound)?;
        if handle.current().phase.is_terminal() {
            return Err(JobRequestError::NotCancellable);
        }
        handle.cancel.cancel();
        let record = handle.current();
        info!(%job_id, phase = %record.phase, "cancellation requested");
        Ok(record)
    }

    /// Forget a finished job.
    pub fn purge(&self, job_id: &str) -> Result<JobRecord, JobRequestError> {
        let mut jobs = self.write();
        let record = jobs
            .get(job_id)
            .map(JobHandle::current)
            .ok_or(JobRequestError::NotFound)?;
        if !record.phase.is_terminal() {
            return Err(JobRequestError::StillRunning);
        }
        jobs.remove(job_id);
        Ok(record)
    }

    /// Resolve once the job reaches a terminal phase.
    pub async fn wait(&self, job_id: &str) -> Option<JobRecord> {
        let mut rx = self.read().get(job_id)?.snapshot.clone();
        let reached = rx.wait_for(|r| r.phase.is_terminal()).await.is_ok();
        if !reached {
            warn!(%job_id, "job task dropped before reaching a terminal phase");
        }
        let record = rx.borrow().clone();
        Some(record)
    }

    /// Cancel every job and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<(JobId, JoinHandle<JobRecord>)> = self
            .write()
            .iter_mut()
            .filter_map(|(id, h)| h.task.take().map(|t| (id.clone(), t)))
            .collect();
        if !tasks.is_empty() {
            info!(count = tasks.len(), "waiting for jobs to stop");
        }
        for (job_id, task) in tasks {
            if let Err(e) = task.await {
                warn!(%job_id, "job task ended abnormally: {}", e);
            }
        }
    }
}
