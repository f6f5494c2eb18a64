use crate::config::settings::AppConfig;
use crate::modules::conversion::orchestrator::JobOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: JobOrchestrator,
}

impl AppState {
    pub fn new(config: AppConfig, orchestrator: JobOrchestrator) -> Self {
        Self {
            config,
            orchestrator,
        }
    }
}
