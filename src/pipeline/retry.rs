use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use tracing::{debug, warn};

use crate::pipeline::classifier::{classify, ClassifyContext, RecoveryAction};
use crate::utils::error::{AppError, Result};

/// Running record of one strategy's attempts within a pipeline run.
#[derive(Debug, Clone)]
pub struct ScrapeAttempt {
    pub category: String,
    pub strategy: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ScrapeAttempt {
    pub fn new(category: &str, strategy: &str) -> Self {
        Self {
            category: category.to_string(),
            strategy: strategy.to_string(),
            attempts: 0,
            last_error: None,
            started_at: Utc::now(),
        }
    }
}

/// Outcome of a recovered operation.
#[derive(Debug)]
pub enum Recovered<T> {
    /// Operation produced an accepted value.
    Ok(T),
    /// The fallback path produced the value after the primary failed.
    Degraded(T),
    /// Classifier said the failure is permanent and harmless.
    Skipped,
    /// Retry budget spent or the classifier gave up. The caller moves on
    /// to its next option; only critical failures surface as `Err`.
    Abandoned(AppError),
}

/// Bounded retry driven by the error classifier. An operation gets at
/// most `max_retries + 1` attempts; what happens between attempts is
/// whatever the classifier says about the error at hand.
pub struct Recovery {
    max_retries: u32,
}

impl Recovery {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Run with every produced value accepted.
    pub async fn run<T, F, Fut>(
        &self,
        ctx: &ClassifyContext<'_>,
        attempt: &mut ScrapeAttempt,
        op: F,
    ) -> Result<Recovered<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute(ctx, attempt, op, |_| true, None).await
    }

    /// Run until the operation yields a non-empty batch. An error-free
    /// empty result still consumes an attempt, retried immediately
    /// without a delay; if the budget ends on empties the empty batch is
    /// returned as a success.
    pub async fn run_nonempty<T, F, Fut>(
        &self,
        ctx: &ClassifyContext<'_>,
        attempt: &mut ScrapeAttempt,
        op: F,
    ) -> Result<Recovered<Vec<T>>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        self.execute(ctx, attempt, op, |v| !v.is_empty(), None).await
    }

    /// Run with a one-shot fallback, taken when the classifier answers
    /// `Fallback` for an error.
    pub async fn run_with_fallback<T, F, Fut>(
        &self,
        ctx: &ClassifyContext<'_>,
        attempt: &mut ScrapeAttempt,
        op: F,
        fallback: BoxFuture<'_, Result<T>>,
    ) -> Result<Recovered<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute(ctx, attempt, op, |_| true, Some(fallback)).await
    }

    async fn execute<T, F, Fut>(
        &self,
        ctx: &ClassifyContext<'_>,
        attempt: &mut ScrapeAttempt,
        mut op: F,
        accept: fn(&T) -> bool,
        mut fallback: Option<BoxFuture<'_, Result<T>>>,
    ) -> Result<Recovered<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let budget = self.max_retries + 1;
        let mut last_error: Option<AppError> = None;
        let mut last_ok: Option<T> = None;

        for attempt_no in 1..=budget {
            attempt.attempts += 1;

            let error = match op().await {
                Ok(value) if accept(&value) => return Ok(Recovered::Ok(value)),
                Ok(value) => {
                    // Unaccepted but error-free; retry immediately.
                    debug!(
                        category = ctx.category,
                        stage = ctx.stage,
                        strategy = %attempt.strategy,
                        attempt = attempt_no,
                        "Empty result, retrying"
                    );
                    last_ok = Some(value);
                    continue;
                }
                Err(e) => e,
            };

            attempt.last_error = Some(error.to_string());

            match classify(&error, ctx) {
                RecoveryAction::Retry { delay } => {
                    if attempt_no < budget {
                        warn!(
                            category = ctx.category,
                            stage = ctx.stage,
                            strategy = %attempt.strategy,
                            attempt = attempt_no,
                            delay_secs = delay.as_secs(),
                            error = %error,
                            "Recoverable error, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(error);
                }
                RecoveryAction::Skip => {
                    debug!(
                        category = ctx.category,
                        stage = ctx.stage,
                        error = %error,
                        "Permanent but harmless, skipping"
                    );
                    return Ok(Recovered::Skipped);
                }
                RecoveryAction::Fallback => match fallback.take() {
                    Some(fb) => {
                        warn!(
                            category = ctx.category,
                            stage = ctx.stage,
                            error = %error,
                            "Taking fallback path"
                        );
                        return match fb.await {
                            Ok(value) => Ok(Recovered::Degraded(value)),
                            Err(fb_err) => Ok(Recovered::Abandoned(fb_err)),
                        };
                    }
                    None => return Ok(Recovered::Abandoned(error)),
                },
                RecoveryAction::Alert { critical: true } => return Err(error),
                RecoveryAction::Alert { critical: false } => {
                    return Ok(Recovered::Abandoned(error))
                }
            }
        }

        // Budget spent. A run of error-free empties is still a success.
        if let Some(value) = last_ok {
            return Ok(Recovered::Ok(value));
        }
        let error = last_error.unwrap_or_else(|| {
            AppError::Unknown("Retry budget spent without a recorded error".to_string())
        });
        Ok(Recovered::Abandoned(error))
    }
}
