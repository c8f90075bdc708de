//! In-memory portal and operator helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use docket_scout::jobs::record::{JobRecord, SearchCriteria};
use docket_scout::scraping::automation::{
    AutomationFactory, AutomationFault, AutomationResult, CourtCandidates, CourtChoice,
    DocketEntry, DocumentRef, FileDescriptor, PortalAutomation,
};
use docket_scout::scraping::court_match;
use docket_scout::OutboundEvent;

pub fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn entry(num: &str, description: &str, transcript: bool) -> DocketEntry {
    DocketEntry {
        entry_num: num.to_string(),
        filed_date: "2024-03-01".to_string(),
        description: description.to_string(),
        matched_pattern: transcript.then(|| "transcript".to_string()),
        download_url: Some(format!("https://portal.test/doc/{num}")),
    }
}

/// What the fake portal shows. Each document gets the same entry list unless
/// `documents` is filled explicitly.
#[derive(Clone, Debug)]
pub struct Script {
    pub courts: Vec<String>,
    pub documents: Vec<(String, Vec<DocketEntry>)>,
    pub browser_court: Option<String>,
    /// (document ordinal, entry number) whose download fails.
    pub fail_download: Option<(usize, String)>,
    pub fail_login: bool,
    /// Fire `cancel` while handling the first call that starts with this.
    pub cancel_during: Option<String>,
    pub cancel: CancellationToken,
    /// Keep `launch` busy this long.
    pub launch_delay: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            courts: vec![
                "District of Nevada".to_string(),
                "Bankruptcy Court, District of Nevada".to_string(),
                "District of Utah".to_string(),
            ],
            documents: (1..=3)
                .map(|n| {
                    (
                        format!("Case {n}"),
                        vec![
                            entry(&format!("{n}1"), "Motion to dismiss", false),
                            entry(&format!("{n}2"), "Transcript of hearing", true),
                            entry(&format!("{n}3"), "Order", false),
                        ],
                    )
                })
                .collect(),
            browser_court: None,
            fail_download: None,
            fail_login: false,
            cancel_during: None,
            cancel: CancellationToken::new(),
            launch_delay: None,
        }
    }
}

impl Script {
    pub fn cancel_during(mut self, call: &str) -> Self {
        self.cancel_during = Some(call.to_string());
        self
    }

    pub fn with_documents(mut self, count: usize) -> Self {
        self.documents = (1..=count)
            .map(|n| {
                (
                    format!("Case {n}"),
                    vec![
                        entry(&format!("{n}1"), "Motion", false),
                        entry(&format!("{n}2"), "Transcript of trial day 1", true),
                    ],
                )
            })
            .collect();
        self
    }
}

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub struct ScriptedPortal {
    script: Script,
    log: CallLog,
}

impl ScriptedPortal {
    pub fn new(script: Script) -> (Self, CallLog) {
        let log: CallLog = Arc::default();
        (
            Self {
                script,
                log: log.clone(),
            },
            log,
        )
    }

    fn record(&self, call: String) {
        if let Some(trigger) = &self.script.cancel_during {
            if call.starts_with(trigger.as_str()) {
                self.script.cancel.cancel();
            }
        }
        self.log.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PortalAutomation for ScriptedPortal {
    async fn launch(&mut self) -> AutomationResult<()> {
        self.record("launch".into());
        if let Some(delay) = self.script.launch_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn login(&mut self) -> AutomationResult<()> {
        self.record("login".into());
        if self.script.fail_login {
            return Err(AutomationFault::auth_rejected("bad password"));
        }
        Ok(())
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> AutomationResult<CourtCandidates> {
        self.record(format!("search:{}", criteria.court_name));
        Ok(court_match::classify(&criteria.court_name, &self.script.courts))
    }

    async fn submit_search(&mut self, court: &CourtChoice) -> AutomationResult<Vec<DocumentRef>> {
        let label = match court {
            CourtChoice::Selected(c) => c.clone(),
            CourtChoice::ResolvedInBrowser => "<browser>".to_string(),
        };
        self.record(format!("submit:{label}"));
        Ok(self
            .script
            .documents
            .iter()
            .enumerate()
            .map(|(i, (title, _))| DocumentRef {
                ordinal: i + 1,
                title: title.clone(),
                url: format!("https://portal.test/case/{}", i + 1),
            })
            .collect())
    }

    async fn current_court(&mut self) -> AutomationResult<Option<String>> {
        self.record("current_court".into());
        Ok(self.script.browser_court.clone())
    }

    async fn open_document(&mut self, document: &DocumentRef) -> AutomationResult<Vec<DocketEntry>> {
        self.record(format!("open:{}", document.ordinal));
        self.script
            .documents
            .get(document.ordinal - 1)
            .map(|(_, entries)| entries.clone())
            .ok_or_else(|| AutomationFault::element_not_found("no such document"))
    }

    async fn download(
        &mut self,
        document: &DocumentRef,
        entry: &DocketEntry,
    ) -> AutomationResult<FileDescriptor> {
        self.record(format!("download:{}:{}", document.ordinal, entry.entry_num));
        if self.script.fail_download.as_ref() == Some(&(document.ordinal, entry.entry_num.clone())) {
            return Err(AutomationFault::download_failed("HTTP 500"));
        }
        let filename = format!("case_{}_{}.pdf", document.ordinal, entry.entry_num);
        Ok(FileDescriptor {
            path: format!("/tmp/docket-scout-test/{filename}"),
            filename,
            downloaded_at: Utc::now(),
        })
    }

    async fn go_back(&mut self) -> AutomationResult<()> {
        self.record("back".into());
        Ok(())
    }

    async fn capture_diagnostic(&mut self, label: &str) -> Option<String> {
        self.record(format!("diagnostic:{label}"));
        Some(format!("/tmp/docket-scout-test/{label}.png"))
    }

    async fn shutdown(&mut self) {
        self.record("shutdown".into());
    }
}

/// Hands out scripted portals and keeps their call logs.
#[derive(Default)]
pub struct ScriptedFactory {
    pub script: Script,
    pub logs: Mutex<Vec<CallLog>>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            logs: Mutex::default(),
        }
    }
}

impl AutomationFactory for ScriptedFactory {
    fn create(&self, _job: &JobRecord) -> AutomationResult<Box<dyn PortalAutomation>> {
        let (portal, log) = ScriptedPortal::new(self.script.clone());
        self.logs.lock().unwrap().push(log);
        Ok(Box::new(portal))
    }
}

pub type Events = mpsc::UnboundedReceiver<OutboundEvent>;

pub async fn next_event(rx: &mut Events) -> OutboundEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip ahead to the next event of `kind`, returning it and everything seen
/// on the way.
pub async fn wait_for_kind(rx: &mut Events, kind: &str) -> (OutboundEvent, Vec<OutboundEvent>) {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        if event.kind() == kind {
            return (event, seen);
        }
        seen.push(event);
    }
}

/// Everything still queued once the sender side is gone.
pub async fn drain(rx: &mut Events) -> Vec<OutboundEvent> {
    let mut out = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        out.push(event);
    }
    out
}

pub fn phases(events: &[OutboundEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            OutboundEvent::StateChange { phase, .. } => Some(phase.as_str().to_string()),
            _ => None,
        })
        .collect()
}

pub fn count_kind(events: &[OutboundEvent], kind: &str) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}
