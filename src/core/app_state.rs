use std::sync::Arc;

use crate::core::config::ScoutConfig;
use crate::jobs::manager::JobManager;
use crate::realtime::registry::ChannelRegistry;
use crate::scraping::automation::AutomationFactory;

/// Shared server state. Everything is built once at startup and handed to
/// handlers through axum's `State`.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ChannelRegistry>,
    pub jobs: Arc<JobManager>,
    /// File-based config loaded from `docket-scout.json` (env-var fallback for all fields).
    pub config: Arc<ScoutConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("connected_clients", &self.registry.connected_clients())
            .field("active_jobs", &self.jobs.active_count())
            .finish()
    }
}

impl AppState {
    pub fn new(config: ScoutConfig, factory: Arc<dyn AutomationFactory>) -> Self {
        let registry = Arc::new(ChannelRegistry::new());
        let jobs = Arc::new(JobManager::new(
            registry.clone(),
            factory,
            config.checkpoint_policy(),
            config.resolve_max_active_jobs(),
        ));
        Self {
            registry,
            jobs,
            config: Arc::new(config),
        }
    }
}
