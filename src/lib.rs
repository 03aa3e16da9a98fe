pub mod alerts;
pub mod config;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod rate_limiter;
pub mod scheduler;
pub mod store;
pub mod strategies;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
