use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::models::{AlertDelivery, InterestAlert, Listing, ListingAnalysis};
use crate::strategies::AnalyzedListing;
use crate::utils::error::Result;

/// Database access for listings, analyses, alerts and delivery audit
/// rows. Cheap to clone; all clones share the pool.
#[derive(Clone)]
pub struct ListingStore {
    pool: SqlitePool,
}

impl ListingStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .connect(&config.url)
            .await?;
        info!(url = %config.url, "Connected to database");
        Ok(Self { pool })
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS marketplace_listings (
                id TEXT PRIMARY KEY,
                listing_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                price REAL NOT NULL,
                description TEXT,
                location TEXT NOT NULL,
                category TEXT NOT NULL,
                seller_id TEXT,
                listing_url TEXT NOT NULL,
                images_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS listing_analyses (
                id TEXT PRIMARY KEY,
                listing_id TEXT NOT NULL UNIQUE REFERENCES marketplace_listings(id),
                quality_score REAL NOT NULL,
                keywords_json TEXT NOT NULL DEFAULT '[]',
                category_confidence REAL NOT NULL,
                analyzed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interest_alerts (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                category TEXT NOT NULL,
                max_price REAL NOT NULL,
                keywords_json TEXT NOT NULL DEFAULT '[]',
                notify_email TEXT,
                notify_webhook TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_deliveries (
                id TEXT PRIMARY KEY,
                alert_id TEXT NOT NULL REFERENCES interest_alerts(id),
                listing_id TEXT NOT NULL REFERENCES marketplace_listings(id),
                channel TEXT NOT NULL,
                sent_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_listings_category_created
             ON marketplace_listings(category, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a batch atomically. Re-ingested listings update their
    /// existing row, keeping the original `created_at`. Any failure rolls
    /// the whole batch back.
    pub async fn persist_batch(
        &self,
        category: &str,
        batch: Vec<AnalyzedListing>,
    ) -> Result<Vec<Listing>> {
        let mut tx = self.pool.begin().await?;
        let mut persisted = Vec::with_capacity(batch.len());

        for item in batch {
            let listing = Listing::new(item.listing);

            sqlx::query(
                r#"
                INSERT INTO marketplace_listings
                    (id, listing_id, title, price, description, location, category,
                     seller_id, listing_url, images_json, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(listing_id) DO UPDATE SET
                    title = excluded.title,
                    price = excluded.price,
                    description = excluded.description,
                    location = excluded.location,
                    category = excluded.category,
                    seller_id = excluded.seller_id,
                    listing_url = excluded.listing_url,
                    images_json = excluded.images_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&listing.id)
            .bind(&listing.listing_id)
            .bind(&listing.title)
            .bind(listing.price)
            .bind(&listing.description)
            .bind(&listing.location)
            .bind(&listing.category)
            .bind(&listing.seller_id)
            .bind(&listing.listing_url)
            .bind(&listing.images_json)
            .bind(listing.created_at)
            .bind(listing.updated_at)
            .execute(&mut *tx)
            .await?;

            // Read the row back so updates carry their original id and
            // created_at
            let stored: Listing =
                sqlx::query_as("SELECT * FROM marketplace_listings WHERE listing_id = ?")
                    .bind(&listing.listing_id)
                    .fetch_one(&mut *tx)
                    .await?;

            if let Some(analysis) = item.analysis {
                let row = ListingAnalysis::new(&stored.id, analysis);
                sqlx::query(
                    r#"
                    INSERT INTO listing_analyses
                        (id, listing_id, quality_score, keywords_json,
                         category_confidence, analyzed_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(listing_id) DO UPDATE SET
                        quality_score = excluded.quality_score,
                        keywords_json = excluded.keywords_json,
                        category_confidence = excluded.category_confidence,
                        analyzed_at = excluded.analyzed_at
                    "#,
                )
                .bind(&row.id)
                .bind(&row.listing_id)
                .bind(row.quality_score)
                .bind(&row.keywords_json)
                .bind(row.category_confidence)
                .bind(row.analyzed_at)
                .execute(&mut *tx)
                .await?;
            }

            persisted.push(stored);
        }

        tx.commit().await?;
        debug!(
            category = category,
            count = persisted.len(),
            "Persisted listing batch"
        );
        Ok(persisted)
    }

    /// Listings in a category created strictly after `since`, newest
    /// first.
    pub async fn query_listings(
        &self,
        category: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Listing>> {
        let listings = sqlx::query_as(
            "SELECT * FROM marketplace_listings
             WHERE category = ? AND created_at > ?
             ORDER BY created_at DESC",
        )
        .bind(category)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(listings)
    }

    pub async fn listing_by_source_id(&self, listing_id: &str) -> Result<Option<Listing>> {
        let listing = sqlx::query_as("SELECT * FROM marketplace_listings WHERE listing_id = ?")
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(listing)
    }

    pub async fn count_listings(&self, category: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM marketplace_listings WHERE category = ?")
                .bind(category)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn analysis_for_listing(&self, listing_id: &str) -> Result<Option<ListingAnalysis>> {
        let analysis = sqlx::query_as("SELECT * FROM listing_analyses WHERE listing_id = ?")
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(analysis)
    }

    pub async fn insert_alert(&self, alert: &InterestAlert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO interest_alerts
                (id, user_id, category, max_price, keywords_json,
                 notify_email, notify_webhook, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.id)
        .bind(&alert.user_id)
        .bind(&alert.category)
        .bind(alert.max_price)
        .bind(&alert.keywords_json)
        .bind(&alert.notify_email)
        .bind(&alert.notify_webhook)
        .bind(alert.is_active)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Active alerts for a category whose price ceiling admits `price`.
    /// Keyword matching happens in the dispatcher.
    pub async fn query_active_alerts(
        &self,
        category: &str,
        price: f64,
    ) -> Result<Vec<InterestAlert>> {
        let alerts = sqlx::query_as(
            "SELECT * FROM interest_alerts
             WHERE is_active = 1 AND category = ? AND max_price >= ?",
        )
        .bind(category)
        .bind(price)
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }

    pub async fn record_delivery(&self, delivery: &AlertDelivery) -> Result<()> {
        sqlx::query(
            "INSERT INTO alert_deliveries (id, alert_id, listing_id, channel, sent_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&delivery.id)
        .bind(&delivery.alert_id)
        .bind(&delivery.listing_id)
        .bind(delivery.channel)
        .bind(delivery.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_deliveries(&self, alert_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM alert_deliveries WHERE alert_id = ?")
                .bind(alert_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewAlert, NewAnalysis, NewListing};

    async fn memory_store() -> ListingStore {
        // A single connection keeps every query on the same in-memory db
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = ListingStore::new(pool);
        store.init_schema().await.unwrap();
        store
    }

    fn new_listing(listing_id: &str, price: f64) -> NewListing {
        NewListing {
            listing_id: listing_id.to_string(),
            title: format!("Bike {}", listing_id),
            price,
            description: None,
            location: "Brunswick".to_string(),
            category: "bikes".to_string(),
            seller_id: None,
            listing_url: format!("https://example.com/item/{}", listing_id),
            images: vec![],
        }
    }

    #[tokio::test]
    async fn test_persist_and_query() {
        let store = memory_store().await;
        let since = Utc::now() - chrono::Duration::minutes(1);

        let persisted = store
            .persist_batch(
                "bikes",
                vec![
                    AnalyzedListing::unanalyzed(new_listing("fb-1", 450.0)),
                    AnalyzedListing::unanalyzed(new_listing("fb-2", 1200.0)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(persisted.len(), 2);

        let found = store.query_listings("bikes", since).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(store.count_listings("bikes").await.unwrap(), 2);
        assert_eq!(store.count_listings("sofas").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::DatabaseConfig {
            url: format!(
                "sqlite://{}?mode=rwc",
                dir.path().join("listings.db").display()
            ),
            max_connections: 2,
            min_connections: 1,
            acquire_timeout: 5,
        };

        let store = ListingStore::connect(&config).await.unwrap();
        store.init_schema().await.unwrap();
        store
            .persist_batch(
                "bikes",
                vec![AnalyzedListing::unanalyzed(new_listing("fb-1", 450.0))],
            )
            .await
            .unwrap();
        drop(store);

        let store = ListingStore::connect(&config).await.unwrap();
        // Schema init is idempotent over an existing database
        store.init_schema().await.unwrap();
        assert_eq!(store.count_listings("bikes").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reingestion_updates_in_place() {
        let store = memory_store().await;

        let first = store
            .persist_batch(
                "bikes",
                vec![AnalyzedListing::unanalyzed(new_listing("fb-1", 450.0))],
            )
            .await
            .unwrap();

        let second = store
            .persist_batch(
                "bikes",
                vec![AnalyzedListing::unanalyzed(new_listing("fb-1", 400.0))],
            )
            .await
            .unwrap();

        assert_eq!(store.count_listings("bikes").await.unwrap(), 1);
        assert_eq!(second[0].price, 400.0);
        // Row identity and creation time survive the update
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].created_at, first[0].created_at);
    }

    #[tokio::test]
    async fn test_persist_with_analysis() {
        let store = memory_store().await;

        let persisted = store
            .persist_batch(
                "bikes",
                vec![AnalyzedListing {
                    listing: new_listing("fb-1", 450.0),
                    analysis: Some(NewAnalysis {
                        quality_score: 0.8,
                        keywords: vec!["trek".to_string()],
                        category_confidence: 0.9,
                    }),
                }],
            )
            .await
            .unwrap();

        let analysis = store
            .analysis_for_listing(&persisted[0].id)
            .await
            .unwrap()
            .expect("analysis row");
        assert_eq!(analysis.quality_score, 0.8);
        assert_eq!(analysis.keywords(), vec!["trek"]);
    }

    #[tokio::test]
    async fn test_batch_rolls_back_on_failure() {
        let store = memory_store().await;
        sqlx::query("DROP TABLE listing_analyses")
            .execute(store.pool())
            .await
            .unwrap();

        let result = store
            .persist_batch(
                "bikes",
                vec![
                    AnalyzedListing::unanalyzed(new_listing("fb-1", 450.0)),
                    AnalyzedListing {
                        listing: new_listing("fb-2", 1200.0),
                        analysis: Some(NewAnalysis {
                            quality_score: 0.8,
                            keywords: vec![],
                            category_confidence: 0.9,
                        }),
                    },
                ],
            )
            .await;

        assert!(result.is_err());
        // The listing persisted before the failure is rolled back too
        assert_eq!(store.count_listings("bikes").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_alert_queries() {
        let store = memory_store().await;

        let cheap = InterestAlert::new(NewAlert {
            user_id: None,
            category: "bikes".to_string(),
            max_price: 500.0,
            keywords: vec![],
            notify_email: Some("a@example.com".to_string()),
            notify_webhook: None,
        });
        let mut inactive = InterestAlert::new(NewAlert {
            user_id: None,
            category: "bikes".to_string(),
            max_price: 5000.0,
            keywords: vec![],
            notify_email: None,
            notify_webhook: None,
        });
        inactive.is_active = false;

        store.insert_alert(&cheap).await.unwrap();
        store.insert_alert(&inactive).await.unwrap();

        let matched = store.query_active_alerts("bikes", 450.0).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, cheap.id);

        // Over the ceiling
        assert!(store
            .query_active_alerts("bikes", 600.0)
            .await
            .unwrap()
            .is_empty());
        // Wrong category
        assert!(store
            .query_active_alerts("sofas", 100.0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delivery_audit() {
        let store = memory_store().await;
        let delivery = AlertDelivery::new("alert-1", "listing-1", crate::models::DeliveryChannel::Email);

        store.record_delivery(&delivery).await.unwrap();
        assert_eq!(store.count_deliveries("alert-1").await.unwrap(), 1);
        assert_eq!(store.count_deliveries("alert-2").await.unwrap(), 0);
    }
}
