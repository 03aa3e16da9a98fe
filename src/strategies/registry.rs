use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::CollectorConfig;
use crate::strategies::api::ApiStrategy;
use crate::strategies::assisted::AssistedStrategy;
use crate::strategies::dynamic::DynamicStrategy;
use crate::strategies::static_page::StaticStrategy;
use crate::strategies::traits::ScrapeStrategy;
use crate::utils::error::{AppError, Result};

/// Immutable name-to-strategy map. Built once at startup; the pipeline
/// resolves its fallback chain against it on every run.
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn ScrapeStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Build the registry with every strategy the collector config can
    /// reference.
    pub fn with_defaults(config: &CollectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let mut registry = Self::new();
        registry.register(Arc::new(DynamicStrategy::new(
            config.base_url.clone(),
            config.chrome_path.clone(),
        )));
        registry.register(Arc::new(ApiStrategy::new(
            client.clone(),
            config.base_url.clone(),
        )));
        registry.register(Arc::new(StaticStrategy::new(
            client.clone(),
            config.base_url.clone(),
        )));
        registry.register(Arc::new(AssistedStrategy::new(
            client,
            config.analysis_endpoint.clone(),
        )));
        Ok(registry)
    }

    pub fn register(&mut self, strategy: Arc<dyn ScrapeStrategy>) {
        info!(
            strategy = strategy.name(),
            "Registered acquisition strategy"
        );
        self.strategies
            .insert(strategy.name().to_string(), strategy);
    }

    /// Resolve a strategy by name. An unknown name is a configuration
    /// error, not a runtime condition to recover from.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ScrapeStrategy>> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::Configuration(format!("Unknown strategy '{}'", name)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
