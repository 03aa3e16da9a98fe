pub mod classifier;
pub mod retry;

use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::alerts::AlertDispatcher;
use crate::config::CollectorConfig;
use crate::models::NewListing;
use crate::notifier::ChangeNotifier;
use crate::pipeline::classifier::ClassifyContext;
use crate::pipeline::retry::{Recovered, Recovery, ScrapeAttempt};
use crate::store::ListingStore;
use crate::strategies::{AnalyzedListing, StrategyRegistry};
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub strategy_priority: Vec<String>,
    pub enrich_strategy: String,
    pub analysis_strategy: String,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl From<&CollectorConfig> for PipelineConfig {
    fn from(config: &CollectorConfig) -> Self {
        Self {
            strategy_priority: config.strategy_priority.clone(),
            enrich_strategy: config.enrich_strategy.clone(),
            analysis_strategy: config.analysis_strategy.clone(),
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
        }
    }
}

/// Drives one category through the fallback chain: fetch with bounded
/// retry, enrich and analyze with graceful degradation, commit the
/// batch transactionally, then kick off post-commit notifications.
pub struct Pipeline {
    registry: Arc<StrategyRegistry>,
    store: ListingStore,
    notifier: Arc<ChangeNotifier>,
    dispatcher: Arc<AlertDispatcher>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        store: ListingStore,
        notifier: Arc<ChangeNotifier>,
        dispatcher: Arc<AlertDispatcher>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            dispatcher,
            config,
        }
    }

    /// Run the full pipeline for one category. Returns the number of
    /// listings committed. Fails with `Exhausted` when no strategy in
    /// the chain produced a committed batch, or immediately on a
    /// critical persistence failure.
    pub async fn process_category(&self, category: &str) -> Result<usize> {
        let run_start = std::time::Instant::now();
        let recovery = Recovery::new(self.config.max_retries);
        let mut last_error: Option<AppError> = None;

        for name in &self.config.strategy_priority {
            let strategy = self.registry.get(name)?;
            let mut attempt = ScrapeAttempt::new(category, name);
            let ctx = ClassifyContext {
                category,
                stage: "fetch",
                base_delay: self.config.base_delay,
            };

            counter!("marketplace_scrape_total",
                "category" => category.to_string(), "strategy" => name.clone())
            .increment(1);

            let raw = match recovery
                .run_nonempty(&ctx, &mut attempt, || strategy.fetch(category))
                .await?
            {
                Recovered::Ok(raw) if raw.is_empty() => {
                    info!(
                        category = category,
                        strategy = %name,
                        attempts = attempt.attempts,
                        "Strategy produced no listings, falling through"
                    );
                    continue;
                }
                Recovered::Ok(raw) | Recovered::Degraded(raw) => raw,
                Recovered::Skipped => {
                    debug!(category = category, strategy = %name, "Strategy skipped");
                    continue;
                }
                Recovered::Abandoned(e) => {
                    counter!("marketplace_error_total",
                        "stage" => "fetch", "strategy" => name.clone(),
                        "error_kind" => e.kind())
                    .increment(1);
                    warn!(
                        category = category,
                        strategy = %name,
                        attempts = attempt.attempts,
                        error = %e,
                        "Strategy abandoned, falling through"
                    );
                    last_error = Some(e);
                    continue;
                }
            };

            let listings: Vec<NewListing> = raw
                .into_iter()
                .filter_map(|r| r.into_new_listing(category))
                .collect();
            if listings.is_empty() {
                warn!(
                    category = category,
                    strategy = %name,
                    "Fetched batch had no normalizable listings, falling through"
                );
                continue;
            }

            let listings = self.enrich(category, listings).await?;
            let analyzed = self.analyze(category, &recovery, listings).await?;

            let committed = match self
                .persist(category, &recovery, analyzed)
                .await?
            {
                Some(rows) => rows,
                None => {
                    last_error = Some(AppError::PersistenceConflict(
                        "Batch commit abandoned after retries".to_string(),
                    ));
                    continue;
                }
            };

            // Post-commit side channels never unwind the commit
            if let Err(e) = self.notifier.broadcast(category).await {
                warn!(category = category, error = %e, "Post-commit broadcast failed");
            }
            if let Err(e) = self.dispatcher.dispatch(&committed).await {
                warn!(category = category, error = %e, "Post-commit alert dispatch failed");
            }

            counter!("marketplace_listings_total",
                "category" => category.to_string(), "status" => "committed")
            .increment(committed.len() as u64);
            histogram!("marketplace_scrape_duration_seconds",
                "category" => category.to_string())
            .record(run_start.elapsed().as_secs_f64());

            info!(
                category = category,
                strategy = %name,
                listings = committed.len(),
                "Category run committed"
            );
            return Ok(committed.len());
        }

        let source = last_error.unwrap_or_else(|| {
            AppError::Unknown("No strategy produced listings".to_string())
        });
        counter!("marketplace_error_total",
            "stage" => "pipeline", "strategy" => "none",
            "error_kind" => source.kind())
        .increment(1);
        Err(AppError::Exhausted {
            category: category.to_string(),
            source: Box::new(source),
        })
    }

    /// Enrichment failure is non-fatal: keep the unenriched batch.
    async fn enrich(&self, category: &str, listings: Vec<NewListing>) -> Result<Vec<NewListing>> {
        let enricher = self.registry.get(&self.config.enrich_strategy)?;
        match enricher.enrich(listings.clone()).await {
            Ok(enriched) => Ok(enriched),
            Err(e) => {
                counter!("marketplace_error_total",
                    "stage" => "enrich", "strategy" => self.config.enrich_strategy.clone(),
                    "error_kind" => e.kind())
                .increment(1);
                warn!(
                    category = category,
                    error = %e,
                    "Enrichment failed, continuing unenriched"
                );
                Ok(listings)
            }
        }
    }

    /// Analysis failure is non-fatal: degrade to an unanalyzed batch.
    async fn analyze(
        &self,
        category: &str,
        recovery: &Recovery,
        listings: Vec<NewListing>,
    ) -> Result<Vec<AnalyzedListing>> {
        let analyzer = self.registry.get(&self.config.analysis_strategy)?;
        let ctx = ClassifyContext {
            category,
            stage: "analyze",
            base_delay: self.config.base_delay,
        };
        let mut attempt = ScrapeAttempt::new(category, &self.config.analysis_strategy);

        let unanalyzed: Vec<AnalyzedListing> = listings
            .iter()
            .cloned()
            .map(AnalyzedListing::unanalyzed)
            .collect();
        let fallback_batch = unanalyzed.clone();

        let result = recovery
            .run_with_fallback(
                &ctx,
                &mut attempt,
                || analyzer.analyze(listings.clone()),
                Box::pin(async move { Ok(fallback_batch) }),
            )
            .await?;

        Ok(match result {
            Recovered::Ok(batch) => batch,
            Recovered::Degraded(batch) => {
                debug!(category = category, "Analysis degraded to passthrough");
                batch
            }
            Recovered::Skipped | Recovered::Abandoned(_) => {
                counter!("marketplace_error_total",
                    "stage" => "analyze", "strategy" => self.config.analysis_strategy.clone(),
                    "error_kind" => "analysis")
                .increment(1);
                warn!(category = category, "Analysis abandoned, continuing unanalyzed");
                unanalyzed
            }
        })
    }

    /// Commit with retry on deadlock-like conflicts. `None` means the
    /// conflict budget was spent; fatal persistence errors propagate.
    async fn persist(
        &self,
        category: &str,
        recovery: &Recovery,
        batch: Vec<AnalyzedListing>,
    ) -> Result<Option<Vec<crate::models::Listing>>> {
        let ctx = ClassifyContext {
            category,
            stage: "persist",
            base_delay: self.config.base_delay,
        };
        let mut attempt = ScrapeAttempt::new(category, "store");

        match recovery
            .run(&ctx, &mut attempt, || {
                self.store.persist_batch(category, batch.clone())
            })
            .await?
        {
            Recovered::Ok(rows) | Recovered::Degraded(rows) => Ok(Some(rows)),
            Recovered::Skipped => Ok(None),
            Recovered::Abandoned(e) => {
                counter!("marketplace_error_total",
                    "stage" => "persist", "strategy" => "store",
                    "error_kind" => e.kind())
                .increment(1);
                warn!(category = category, error = %e, "Batch commit abandoned");
                Ok(None)
            }
        }
    }
}
