use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {message}")]
    TransientNetwork {
        status: Option<u16>,
        /// Server-provided retry delay in seconds (Retry-After), if any.
        retry_after: Option<u64>,
        message: String,
    },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("Persistence failure: {0}")]
    PersistenceFatal(String),

    #[error("Analysis service error: {message}")]
    Analysis { rate_limited: bool, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("All strategies exhausted for category '{category}': {source}")]
    Exhausted {
        category: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AppError {
    /// Returns true if a bounded retry can reasonably clear this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::TransientNetwork { .. }
                | AppError::PersistenceConflict(_)
                | AppError::Analysis { rate_limited: true, .. }
        )
    }

    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::TransientNetwork { .. } => "transient-network",
            AppError::NotFound { .. } => "not-found",
            AppError::PersistenceConflict(_) => "persistence-conflict",
            AppError::PersistenceFatal(_) => "persistence-fatal",
            AppError::Analysis { .. } => "analysis",
            AppError::Configuration(_) | AppError::Config(_) => "configuration",
            AppError::Serialization(_) => "serialization",
            AppError::Io(_) => "io",
            AppError::Busy(_) => "busy",
            AppError::Exhausted { .. } => "exhausted",
            AppError::Unknown(_) => "unknown",
        }
    }

    /// HTTP status carried by this error, if it came from a network call.
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::TransientNetwork { status, .. } => *status,
            AppError::NotFound { .. } => Some(404),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        match status {
            Some(404) => AppError::NotFound {
                resource: err
                    .url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "remote resource".to_string()),
            },
            _ => AppError::TransientNetwork {
                status,
                retry_after: None,
                message: err.to_string(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let msg = db.message().to_lowercase();
                // sqlite reports contention as "database is locked"/"busy";
                // postgres uses "deadlock detected".
                if msg.contains("deadlock") || msg.contains("locked") || msg.contains("busy") {
                    AppError::PersistenceConflict(db.message().to_string())
                } else {
                    AppError::PersistenceFatal(db.message().to_string())
                }
            }
            sqlx::Error::PoolTimedOut => AppError::PersistenceConflict(err.to_string()),
            sqlx::Error::RowNotFound => AppError::NotFound {
                resource: "database row".to_string(),
            },
            _ => AppError::PersistenceFatal(err.to_string()),
        }
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(AppError::TransientNetwork {
            status: Some(503),
            retry_after: None,
            message: "service unavailable".to_string(),
        }
        .is_recoverable());
        assert!(AppError::PersistenceConflict("database is locked".to_string()).is_recoverable());
        assert!(AppError::Analysis {
            rate_limited: true,
            message: "quota".to_string(),
        }
        .is_recoverable());

        assert!(!AppError::PersistenceFatal("disk I/O error".to_string()).is_recoverable());
        assert!(!AppError::NotFound {
            resource: "listing".to_string()
        }
        .is_recoverable());
        assert!(!AppError::Unknown("???".to_string()).is_recoverable());
        assert!(!AppError::Busy("run already active".to_string()).is_recoverable());
    }

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(AppError::Busy("x".to_string()).kind(), "busy");
        assert_eq!(
            AppError::PersistenceConflict("locked".to_string()).kind(),
            "persistence-conflict"
        );
        assert_eq!(
            AppError::Exhausted {
                category: "bikes".to_string(),
                source: Box::new(AppError::Unknown("boom".to_string())),
            }
            .kind(),
            "exhausted"
        );
    }

    #[test]
    fn test_status_extraction() {
        let err = AppError::TransientNetwork {
            status: Some(429),
            retry_after: Some(10),
            message: "too many requests".to_string(),
        };
        assert_eq!(err.status(), Some(429));

        let err = AppError::NotFound {
            resource: "listing".to_string(),
        };
        assert_eq!(err.status(), Some(404));

        assert_eq!(AppError::Unknown("x".to_string()).status(), None);
    }

    #[test]
    fn test_exhausted_display_carries_category() {
        let err = AppError::Exhausted {
            category: "bikes".to_string(),
            source: Box::new(AppError::Unknown("boom".to_string())),
        };
        assert!(err.to_string().contains("bikes"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
    }
}
