use std::sync::Arc;

use sentinel_core::{Engine, EngineConfig, MonitorStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MonitorStore>,
    pub engine: Engine,
    /// Checks returned with each monitor on the read path.
    pub history_limit: usize,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            store: Arc::clone(engine.store()),
            engine,
            history_limit: EngineConfig::default().history_limit,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }
}
