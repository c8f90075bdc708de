pub mod api;
pub mod core;
pub mod jobs;
pub mod realtime;
pub mod scraping;

// --- Primary core exports ---
pub use crate::core::config;
pub use crate::core::types;
pub use crate::core::AppState;

pub use jobs::{
    CheckpointPolicy, CourtSkipTrust, InboundMessage, JobManager, JobParams, JobRecord, JobStatus,
    OutboundEvent, Phase, ScrapingMode,
};
pub use realtime::ChannelRegistry;
pub use scraping::{AutomationFactory, CdpPortalFactory, PortalAutomation};
