use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::{NotifierConfig, SchedulerConfig};
use crate::notifier::ChangeNotifier;
use crate::pipeline::Pipeline;
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub category: String,
    pub cron_expression: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Active,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub running_jobs: usize,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub uptime_seconds: u64,
}

/// Drives the pipeline per category on a cron schedule and keeps the
/// notifier's timer-driven broadcasts ticking.
pub struct CategoryScheduler {
    scheduler: JobScheduler,
    pipeline: Arc<Pipeline>,
    notifier: Arc<ChangeNotifier>,
    jobs: Arc<RwLock<HashMap<String, JobInfo>>>, // category -> JobInfo
    running: Arc<Mutex<HashMap<String, tokio::task::JoinHandle<()>>>>, // category -> handle
    cancel: CancellationToken,
    config: SchedulerConfig,
    start_time: DateTime<Utc>,
}

impl CategoryScheduler {
    pub async fn new(
        pipeline: Arc<Pipeline>,
        notifier: Arc<ChangeNotifier>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Configuration(format!("Failed to build scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            pipeline,
            notifier,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            config,
            start_time: Utc::now(),
        })
    }

    /// Schedule every configured category, start the cron engine and
    /// the broadcast ticker.
    pub async fn start(&mut self, notifier_config: &NotifierConfig) -> Result<()> {
        for category in self.config.categories.clone() {
            self.schedule_category(&category).await?;
        }

        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::Configuration(format!("Failed to start scheduler: {}", e)))?;

        self.spawn_broadcast_ticker(Duration::from_secs(notifier_config.broadcast_interval));

        info!(
            categories = self.config.categories.len(),
            cron = %self.config.scrape_interval,
            "Category scheduler started"
        );
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();

        let mut running = self.running.lock().await;
        for (category, handle) in running.drain() {
            handle.abort();
            debug!(category = %category, "Cancelled running category job");
        }

        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Unknown(format!("Scheduler shutdown failed: {}", e)))?;
        info!("Category scheduler shutdown");
        Ok(())
    }

    /// The cron engine wants a seconds field; config accepts the
    /// conventional five-field form.
    fn normalize_cron(expr: &str) -> String {
        if expr.split_whitespace().count() == 5 {
            format!("0 {}", expr)
        } else {
            expr.to_string()
        }
    }

    async fn schedule_category(&self, category: &str) -> Result<()> {
        let job_info = JobInfo {
            id: Uuid::new_v4(),
            category: category.to_string(),
            cron_expression: self.config.scrape_interval.clone(),
            status: JobStatus::Active,
            created_at: Utc::now(),
            last_run: None,
            run_count: 0,
            success_count: 0,
            error_count: 0,
            last_error: None,
        };

        let pipeline = Arc::clone(&self.pipeline);
        let jobs = Arc::clone(&self.jobs);
        let running = Arc::clone(&self.running);
        let max_running = self.config.max_running_jobs;
        let category_for_job = category.to_string();

        let schedule = Self::normalize_cron(&self.config.scrape_interval);
        let job = Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            let jobs = Arc::clone(&jobs);
            let running = Arc::clone(&running);
            let category = category_for_job.clone();

            Box::pin(async move {
                // Hold the lock across spawn+insert so the task's own
                // cleanup cannot run before its handle is registered
                let mut running_guard = running.lock().await;
                if running_guard.contains_key(&category) {
                    debug!(category = %category, "Previous run still active, skipping tick");
                    return;
                }
                if running_guard.len() >= max_running {
                    debug!(category = %category, "At max concurrent runs, skipping tick");
                    return;
                }

                let category_for_spawn = category.clone();
                let running_for_cleanup = Arc::clone(&running);
                let handle = tokio::spawn(async move {
                    Self::execute_run(pipeline, jobs, category_for_spawn.clone()).await;
                    running_for_cleanup.lock().await.remove(&category_for_spawn);
                });
                running_guard.insert(category.clone(), handle);
            })
        })
        .map_err(|e| {
            AppError::Configuration(format!(
                "Invalid cron expression '{}': {}",
                self.config.scrape_interval, e
            ))
        })?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Unknown(format!("Failed to add job: {}", e)))?;

        let mut jobs = self.jobs.write().await;
        jobs.insert(category.to_string(), job_info);
        info!(category = category, "Scheduled category");
        Ok(())
    }

    /// Run one category immediately, outside the cron schedule. The run
    /// occupies the category's slot in the running set for its whole
    /// duration, so cron ticks and other immediate runs see it and back
    /// off instead of starting a second run.
    pub async fn run_now(&self, category: &str) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        {
            let mut running = self.running.lock().await;
            if running.contains_key(category) {
                return Err(AppError::Busy(format!(
                    "A run for category '{}' is already active",
                    category
                )));
            }

            let pipeline = Arc::clone(&self.pipeline);
            let jobs = Arc::clone(&self.jobs);
            let running_for_cleanup = Arc::clone(&self.running);
            let category_owned = category.to_string();
            let handle = tokio::spawn(async move {
                let result = pipeline.process_category(&category_owned).await;
                Self::update_stats(jobs, &category_owned, &result).await;
                running_for_cleanup.lock().await.remove(&category_owned);
                let _ = tx.send(result);
            });
            running.insert(category.to_string(), handle);
        }

        info!(category = category, "Running immediate category collection");
        rx.await
            .map_err(|_| AppError::Unknown("Immediate run was cancelled".to_string()))?
    }

    async fn execute_run(
        pipeline: Arc<Pipeline>,
        jobs: Arc<RwLock<HashMap<String, JobInfo>>>,
        category: String,
    ) {
        debug!(category = %category, "Starting scheduled category run");
        let result = pipeline.process_category(&category).await;
        match &result {
            Ok(count) => {
                info!(category = %category, listings = count, "Scheduled run completed")
            }
            Err(e) => error!(category = %category, error = %e, "Scheduled run failed"),
        }
        Self::update_stats(jobs, &category, &result).await;
    }

    async fn update_stats(
        jobs: Arc<RwLock<HashMap<String, JobInfo>>>,
        category: &str,
        result: &Result<usize>,
    ) {
        let mut jobs = jobs.write().await;
        if let Some(job_info) = jobs.get_mut(category) {
            job_info.last_run = Some(Utc::now());
            job_info.run_count += 1;
            match result {
                Ok(_) => {
                    job_info.success_count += 1;
                    job_info.last_error = None;
                    if job_info.status == JobStatus::Error {
                        job_info.status = JobStatus::Active;
                    }
                }
                Err(e) => {
                    job_info.error_count += 1;
                    job_info.last_error = Some(e.to_string());
                    job_info.status = JobStatus::Error;
                }
            }
        }
    }

    /// Periodic broadcast for every category with live subscribers,
    /// covering listings committed by other processes or missed by a
    /// failed post-commit trigger.
    fn spawn_broadcast_ticker(&self, interval: Duration) {
        let notifier = Arc::clone(&self.notifier);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Broadcast ticker stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        for category in notifier.active_categories().await {
                            if let Err(e) = notifier.broadcast(&category).await {
                                error!(category = %category, error = %e, "Timer broadcast failed");
                            }
                        }
                    }
                }
            }
        });
    }

    pub async fn get_job_info(&self, category: &str) -> Option<JobInfo> {
        let jobs = self.jobs.read().await;
        jobs.get(category).cloned()
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        let jobs = self.jobs.read().await;
        let running = self.running.lock().await;

        let completed_runs: u64 = jobs.values().map(|j| j.success_count).sum();
        let failed_runs: u64 = jobs.values().map(|j| j.error_count).sum();
        let uptime = Utc::now().signed_duration_since(self.start_time);

        SchedulerStats {
            total_jobs: jobs.len(),
            active_jobs: jobs
                .values()
                .filter(|j| j.status == JobStatus::Active)
                .count(),
            running_jobs: running.len(),
            completed_runs,
            failed_runs,
            uptime_seconds: uptime.num_seconds().max(0) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertDispatcher;
    use crate::pipeline::PipelineConfig;
    use crate::store::ListingStore;
    use crate::strategies::traits::{RawListing, ScrapeStrategy};
    use crate::strategies::StrategyRegistry;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;

    /// Takes long enough to fetch that a second run can be attempted
    /// while the first is still in flight.
    struct SlowStrategy;

    #[async_trait]
    impl ScrapeStrategy for SlowStrategy {
        fn name(&self) -> &'static str {
            "dynamic"
        }

        fn description(&self) -> &'static str {
            "Slow test strategy"
        }

        async fn fetch(&self, _category: &str) -> Result<Vec<RawListing>> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(vec![RawListing {
                source_id: Some("fb-1".to_string()),
                title: "Trek Marlin 7".to_string(),
                price_text: "$450".to_string(),
                location: "Brunswick".to_string(),
                url: "https://example.com/item/fb-1".to_string(),
                description: None,
                seller_id: None,
                images: vec![],
            }])
        }
    }

    async fn scheduler_under_test(
        categories: Vec<&str>,
        registry: StrategyRegistry,
    ) -> CategoryScheduler {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = ListingStore::new(pool);
        store.init_schema().await.unwrap();

        let notifier = Arc::new(ChangeNotifier::new(store.clone()));
        let dispatcher = Arc::new(AlertDispatcher::new(store.clone(), None, None));
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(registry),
            store,
            Arc::clone(&notifier),
            dispatcher,
            PipelineConfig {
                strategy_priority: vec!["dynamic".to_string()],
                enrich_strategy: "dynamic".to_string(),
                analysis_strategy: "dynamic".to_string(),
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            },
        ));

        CategoryScheduler::new(
            pipeline,
            notifier,
            SchedulerConfig {
                categories: categories.into_iter().map(String::from).collect(),
                scrape_interval: "0 0 * * *".to_string(),
                max_running_jobs: 4,
            },
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_normalize_cron_adds_seconds_field() {
        assert_eq!(CategoryScheduler::normalize_cron("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(CategoryScheduler::normalize_cron("0 0 0 * * *"), "0 0 0 * * *");
    }

    #[tokio::test]
    async fn test_start_registers_all_categories() {
        let mut scheduler =
            scheduler_under_test(vec!["bikes", "electronics"], StrategyRegistry::new()).await;
        scheduler
            .start(&NotifierConfig {
                broadcast_interval: 60,
            })
            .await
            .unwrap();

        let stats = scheduler.get_stats().await;
        assert_eq!(stats.total_jobs, 2);
        assert_eq!(stats.active_jobs, 2);
        assert!(scheduler.get_job_info("bikes").await.is_some());

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_run_marks_job_errored() {
        let mut scheduler = scheduler_under_test(vec!["bikes"], StrategyRegistry::new()).await;
        scheduler
            .start(&NotifierConfig {
                broadcast_interval: 60,
            })
            .await
            .unwrap();

        // The registry is empty, so the pipeline fails with a
        // configuration error
        assert!(scheduler.run_now("bikes").await.is_err());

        let info = scheduler.get_job_info("bikes").await.unwrap();
        assert_eq!(info.status, JobStatus::Error);
        assert_eq!(info.run_count, 1);
        assert_eq!(info.error_count, 1);
        assert!(info.last_error.is_some());

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_immediate_runs_resolve_to_one() {
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(SlowStrategy));
        let scheduler = scheduler_under_test(vec!["bikes"], registry).await;

        let (first, second) = tokio::join!(scheduler.run_now("bikes"), scheduler.run_now("bikes"));

        let (winner, loser) = if first.is_ok() {
            (first, second)
        } else {
            (second, first)
        };
        assert_eq!(winner.unwrap(), 1);
        assert!(matches!(loser, Err(AppError::Busy(_))));

        // The winning run removed itself, so the category is free again
        assert!(scheduler.running.lock().await.is_empty());
        assert_eq!(scheduler.run_now("bikes").await.unwrap(), 1);
    }
}
