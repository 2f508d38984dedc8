use std::sync::Arc;

use dosegate_runtime::{HttpAuditor, Orchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator<HttpAuditor>>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator<HttpAuditor>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}
