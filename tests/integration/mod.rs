// Shared fixtures for the end-to-end scenarios.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use market_watcher::alerts::AlertDispatcher;
use market_watcher::models::{NewAnalysis, NewListing};
use market_watcher::notifier::{ChangeNotifier, ListingUpdate, PushChannel};
use market_watcher::pipeline::{Pipeline, PipelineConfig};
use market_watcher::store::ListingStore;
use market_watcher::strategies::{AnalyzedListing, RawListing, ScrapeStrategy, StrategyRegistry};
use market_watcher::utils::error::{AppError, Result};

/// Returns one scripted batch per fetch call; calls past the script
/// yield an empty batch.
pub struct ScriptedStrategy {
    name: &'static str,
    batches: Vec<std::result::Result<Vec<RawListing>, u16>>,
    calls: AtomicU32,
    pub attach_analysis: bool,
}

impl ScriptedStrategy {
    pub fn new(
        name: &'static str,
        batches: Vec<std::result::Result<Vec<RawListing>, u16>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            batches,
            calls: AtomicU32::new(0),
            attach_analysis: false,
        })
    }

    pub fn with_analysis(
        name: &'static str,
        batches: Vec<std::result::Result<Vec<RawListing>, u16>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            batches,
            calls: AtomicU32::new(0),
            attach_analysis: true,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScrapeStrategy for ScriptedStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Scripted test strategy"
    }

    async fn fetch(&self, _category: &str) -> Result<Vec<RawListing>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        match self.batches.get(call) {
            Some(Ok(batch)) => Ok(batch.clone()),
            Some(Err(status)) => Err(AppError::TransientNetwork {
                status: Some(*status),
                retry_after: None,
                message: format!("scripted failure {}", status),
            }),
            None => Ok(vec![]),
        }
    }

    async fn analyze(&self, listings: Vec<NewListing>) -> Result<Vec<AnalyzedListing>> {
        if !self.attach_analysis {
            return Ok(listings
                .into_iter()
                .map(AnalyzedListing::unanalyzed)
                .collect());
        }
        Ok(listings
            .into_iter()
            .map(|listing| AnalyzedListing {
                analysis: Some(NewAnalysis {
                    quality_score: 0.5,
                    keywords: vec![],
                    category_confidence: 0.5,
                }),
                listing,
            })
            .collect())
    }
}

pub fn raw_listing(id: &str, price: &str) -> RawListing {
    RawListing {
        source_id: Some(id.to_string()),
        title: format!("Bike {}", id),
        price_text: price.to_string(),
        location: "Brunswick".to_string(),
        url: format!("https://example.com/item/{}", id),
        description: None,
        seller_id: None,
        images: vec![],
    }
}

pub async fn memory_store() -> ListingStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = ListingStore::new(pool);
    store.init_schema().await.unwrap();
    store
}

pub struct TestHarness {
    pub store: ListingStore,
    pub notifier: Arc<ChangeNotifier>,
    pub pipeline: Pipeline,
}

/// Wires a pipeline around the given strategies. The last entry doubles
/// as the enrich/analyze provider so scripted analysis flows through.
pub async fn build_harness(
    strategies: Vec<Arc<ScriptedStrategy>>,
    priority: Vec<&str>,
    max_retries: u32,
) -> TestHarness {
    let store = memory_store().await;
    let notifier = Arc::new(ChangeNotifier::new(store.clone()));
    let dispatcher = Arc::new(AlertDispatcher::new(store.clone(), None, None));

    let support = strategies.last().map(|s| s.name()).unwrap_or("dynamic");
    let mut registry = StrategyRegistry::new();
    for strategy in strategies {
        registry.register(strategy);
    }

    let pipeline = Pipeline::new(
        Arc::new(registry),
        store.clone(),
        Arc::clone(&notifier),
        dispatcher,
        PipelineConfig {
            strategy_priority: priority.into_iter().map(String::from).collect(),
            enrich_strategy: support.to_string(),
            analysis_strategy: support.to_string(),
            max_retries,
            base_delay: Duration::from_millis(1),
        },
    );

    TestHarness {
        store,
        notifier,
        pipeline,
    }
}

pub struct CollectingChannel {
    pub updates: Mutex<Vec<ListingUpdate>>,
}

impl CollectingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            updates: Mutex::new(Vec::new()),
        })
    }

    pub async fn received(&self) -> Vec<ListingUpdate> {
        self.updates.lock().await.clone()
    }
}

#[async_trait]
impl PushChannel for CollectingChannel {
    async fn send(&self, update: &ListingUpdate) -> Result<()> {
        self.updates.lock().await.push(update.clone());
        Ok(())
    }
}

pub struct FailingChannel;

#[async_trait]
impl PushChannel for FailingChannel {
    async fn send(&self, _update: &ListingUpdate) -> Result<()> {
        Err(AppError::TransientNetwork {
            status: None,
            retry_after: None,
            message: "connection reset".to_string(),
        })
    }
}
