use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub collector: CollectorConfig,
    pub admission: AdmissionConfig,
    pub notifier: NotifierConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Fallback chain, tried in order (e.g. ["dynamic", "api", "static"]).
    pub strategy_priority: Vec<String>,
    /// Registry entry whose enrich capability is applied to every batch.
    pub enrich_strategy: String,
    /// Registry entry whose analyze capability is applied to every batch.
    pub analysis_strategy: String,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub request_timeout: u64,
    pub user_agent: String,
    pub base_url: String,
    pub chrome_path: Option<String>,
    pub analysis_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    pub requests_per_minute: u32,
    /// Fixed window length in seconds.
    pub rate_limit_window: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Seconds between timer-driven broadcasts per active category.
    pub broadcast_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub categories: Vec<String>,
    /// Cron expression driving collection runs for every category.
    pub scrape_interval: String,
    pub max_running_jobs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub from_name: String,
    pub use_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Strategy names the registry knows how to build.
pub const KNOWN_STRATEGIES: &[&str] = &["dynamic", "api", "static", "assisted"];

impl CollectorConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "MARKET_"
            .add_source(Environment::with_prefix("MARKET").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        // Add Chrome path from environment if not set
        if config.collector.chrome_path.is_none() {
            config.collector.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate database configuration
        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "Database max_connections must be greater than 0".into(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message(
                "Database min_connections cannot exceed max_connections".into(),
            ));
        }

        // Validate collector configuration
        if self.collector.strategy_priority.is_empty() {
            return Err(ConfigError::Message(
                "Collector strategy_priority must name at least one strategy".into(),
            ));
        }
        for name in &self.collector.strategy_priority {
            if !KNOWN_STRATEGIES.contains(&name.as_str()) {
                return Err(ConfigError::Message(format!(
                    "Unknown strategy '{}' in strategy_priority",
                    name
                )));
            }
        }
        if !KNOWN_STRATEGIES.contains(&self.collector.enrich_strategy.as_str()) {
            return Err(ConfigError::Message(format!(
                "Unknown enrich_strategy '{}'",
                self.collector.enrich_strategy
            )));
        }
        if !KNOWN_STRATEGIES.contains(&self.collector.analysis_strategy.as_str()) {
            return Err(ConfigError::Message(format!(
                "Unknown analysis_strategy '{}'",
                self.collector.analysis_strategy
            )));
        }
        if Url::parse(&self.collector.base_url).is_err() {
            return Err(ConfigError::Message(
                "Invalid collector base_url format".into(),
            ));
        }

        // Validate admission control configuration
        if self.admission.requests_per_minute == 0 {
            return Err(ConfigError::Message(
                "Admission requests_per_minute must be greater than 0".into(),
            ));
        }
        if self.admission.rate_limit_window == 0 {
            return Err(ConfigError::Message(
                "Admission rate_limit_window must be greater than 0".into(),
            ));
        }

        // Validate notifier configuration
        if self.notifier.broadcast_interval == 0 {
            return Err(ConfigError::Message(
                "Notifier broadcast_interval must be greater than 0".into(),
            ));
        }

        // Validate scheduler configuration - basic cron validation
        if !self.is_valid_cron(&self.scheduler.scrape_interval) {
            return Err(ConfigError::Message(
                "Invalid cron expression in scheduler.scrape_interval".into(),
            ));
        }
        if self.scheduler.max_running_jobs == 0 {
            return Err(ConfigError::Message(
                "Scheduler max_running_jobs must be greater than 0".into(),
            ));
        }

        // Validate SMTP configuration
        if self.notifications.smtp.port == 0 {
            return Err(ConfigError::Message(
                "SMTP port must be greater than 0".into(),
            ));
        }

        // Validate metrics configuration
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message(
                "Metrics port must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn is_valid_cron(&self, cron_expr: &str) -> bool {
        // Basic cron validation - 5 parts (minute hour day month weekday),
        // or 6 with a leading seconds field
        let parts: Vec<&str> = cron_expr.split_whitespace().collect();
        if parts.len() != 5 && parts.len() != 6 {
            return false;
        }

        // Each part should be valid
        for part in parts {
            if part.is_empty() {
                return false;
            }
            // Allow numbers, ranges, lists, and wildcards
            if !part
                .chars()
                .all(|c| c.is_ascii_digit() || c == '*' || c == '-' || c == ',' || c == '/')
            {
                return false;
            }
        }

        true
    }
}
