use lens_analytics::{IntentResolver, MetricAggregator};
use lens_core::config::AppConfig;
use lens_core::session::SessionManager;
use lens_core::store::TransactionStore;
use std::sync::Arc;

/// Shared application state for the server.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub aggregator: MetricAggregator,
    pub session_manager: Arc<SessionManager>,
}

impl AppState {
    /// Wire the aggregator, resolver and session registry over `store`.
    pub fn new(config: AppConfig, store: Arc<dyn TransactionStore>) -> Self {
        let aggregator = MetricAggregator::new(store);
        let resolver = IntentResolver::from_config(aggregator.clone(), &config.classifier);
        let session_manager = SessionManager::new(&config.assistant, Arc::new(resolver));

        Self {
            config,
            aggregator,
            session_manager: Arc::new(session_manager),
        }
    }

    /// State around an existing session registry, e.g. one with a custom timeout.
    pub fn with_sessions(
        config: AppConfig,
        aggregator: MetricAggregator,
        session_manager: Arc<SessionManager>,
    ) -> Self {
        Self {
            config,
            aggregator,
            session_manager,
        }
    }
}
