use std::time::Duration;

use crate::utils::error::AppError;

/// What the pipeline should do about an error. Computed from the error
/// and the attempt context alone; classification never performs I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Wait the given delay, then retry the same operation.
    Retry { delay: Duration },
    /// Give up on the operation without penalty and move on.
    Skip,
    /// Abandon the current strategy and fall through to the next one.
    Fallback,
    /// Abandon the chain and surface the error. Critical failures stop
    /// the whole run; non-critical ones are recorded and skipped past.
    Alert { critical: bool },
}

/// Context for a single classification decision.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    pub category: &'a str,
    /// Pipeline stage the error came from ("fetch", "analyze", "persist").
    pub stage: &'a str,
    pub base_delay: Duration,
}

/// Decide the recovery action for an error. Pure: the same error and
/// context always produce the same action.
pub fn classify(error: &AppError, ctx: &ClassifyContext) -> RecoveryAction {
    match error {
        // Source told us how long to back off; otherwise use the
        // configured base delay.
        AppError::TransientNetwork {
            status: Some(429),
            retry_after,
            ..
        } => RecoveryAction::Retry {
            delay: retry_after
                .map(Duration::from_secs)
                .unwrap_or(ctx.base_delay),
        },

        AppError::TransientNetwork { .. } => RecoveryAction::Retry {
            delay: ctx.base_delay,
        },

        // A page or record that no longer exists is not coming back.
        AppError::NotFound { .. } => RecoveryAction::Skip,

        AppError::PersistenceConflict(_) => RecoveryAction::Retry {
            delay: ctx.base_delay,
        },

        AppError::PersistenceFatal(_) => RecoveryAction::Alert { critical: true },

        // Analysis quota pressure clears slowly; back off harder.
        AppError::Analysis {
            rate_limited: true, ..
        } => RecoveryAction::Retry {
            delay: ctx.base_delay * 4,
        },

        // A broken analysis service should not block acquisition;
        // listings can be persisted unanalyzed.
        AppError::Analysis {
            rate_limited: false,
            ..
        } => RecoveryAction::Fallback,

        _ => RecoveryAction::Alert { critical: false },
    }
}
