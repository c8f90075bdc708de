pub mod error;
pub mod events;
pub mod gate;
pub mod manager;
pub mod orchestrator;
pub mod phase;
pub mod record;

pub use error::{JobError, JobRequestError, ValidationError};
pub use events::{InboundMessage, OutboundEvent};
pub use gate::InteractionGate;
pub use manager::JobManager;
pub use orchestrator::Orchestrator;
pub use phase::{CheckpointPolicy, CourtSkipTrust, Phase, ScrapingMode};
pub use record::{JobParams, JobRecord, JobStatus};
