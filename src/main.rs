use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use market_watcher::alerts::{
    AlertDispatcher, HttpWebhookChannel, MessageChannel, SmtpMessageChannel, WebhookChannel,
};
use market_watcher::notifier::ChangeNotifier;
use market_watcher::pipeline::{Pipeline, PipelineConfig};
use market_watcher::scheduler::CategoryScheduler;
use market_watcher::store::ListingStore;
use market_watcher::strategies::StrategyRegistry;
use market_watcher::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "market-watcher", about = "Marketplace listing collector")]
struct Args {
    /// Override RUN_MODE for config layering (development, production)
    #[arg(long)]
    run_mode: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    if let Some(mode) = &args.run_mode {
        std::env::set_var("RUN_MODE", mode);
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("market_watcher=debug".parse()?),
        )
        .init();

    info!("Starting Market Watcher...");

    let config = AppConfig::from_env()?;

    if config.metrics.enabled {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()?;
        info!(port = config.metrics.port, "Metrics exporter listening");
    }

    let store = ListingStore::connect(&config.database).await?;
    store.init_schema().await?;

    let registry = Arc::new(StrategyRegistry::with_defaults(&config.collector)?);
    let notifier = Arc::new(ChangeNotifier::new(store.clone()));

    let message_channel: Option<Arc<dyn MessageChannel>> =
        match SmtpMessageChannel::new(&config.notifications.smtp) {
            Ok(channel) => Some(Arc::new(channel)),
            Err(e) => {
                info!(reason = %e, "Email alerts disabled");
                None
            }
        };
    let webhook_channel: Option<Arc<dyn WebhookChannel>> =
        Some(Arc::new(HttpWebhookChannel::new(reqwest::Client::new())));
    let dispatcher = Arc::new(AlertDispatcher::new(
        store.clone(),
        message_channel,
        webhook_channel,
    ));

    let pipeline = Arc::new(Pipeline::new(
        registry,
        store,
        Arc::clone(&notifier),
        dispatcher,
        PipelineConfig::from(&config.collector),
    ));

    let mut scheduler =
        CategoryScheduler::new(pipeline, notifier, config.scheduler.clone()).await?;
    scheduler.start(&config.notifier).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    scheduler.shutdown().await?;

    Ok(())
}
