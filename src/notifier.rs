use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::Listing;
use crate::store::ListingStore;
use crate::utils::error::Result;

pub type SubscriberId = Uuid;

/// A live delivery target for listing updates. Implementations wrap
/// whatever transport the subscriber is on (websocket session, SSE
/// stream, in-process queue).
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn send(&self, update: &ListingUpdate) -> Result<()>;
}

/// One batch of new listings for a category, shaped for subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingUpdate {
    pub category: String,
    pub listings: Vec<ListingPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingPayload {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub location: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub age_hours: f64,
    pub age_display: String,
}

impl ListingPayload {
    pub fn from_listing(listing: &Listing, now: DateTime<Utc>) -> Self {
        let age_hours = (listing.age_hours(now) * 10.0).round() / 10.0;
        Self {
            id: listing.id.clone(),
            title: listing.title.clone(),
            price: listing.price,
            location: listing.location.clone(),
            url: listing.listing_url.clone(),
            created_at: listing.created_at,
            age_hours,
            age_display: format_age(age_hours),
        }
    }
}

/// Human-readable listing age, matching how subscribers see freshness.
pub fn format_age(age_hours: f64) -> String {
    if age_hours < 1.0 {
        format!("{} minutes old", (age_hours * 60.0).round() as i64)
    } else if age_hours < 24.0 {
        format!("{:.1} hours old", age_hours)
    } else {
        format!("{} days old", (age_hours / 24.0).floor() as i64)
    }
}

struct CategoryChannel {
    subscribers: HashMap<SubscriberId, Arc<dyn PushChannel>>,
    /// Creation time of the newest listing already broadcast. Advanced
    /// before fan-out, so a failed send loses a message rather than
    /// replaying the batch to everyone (at-least-once per batch, never
    /// duplicated).
    last_broadcast: DateTime<Utc>,
}

/// Per-category fan-out of newly persisted listings. Broadcasts are
/// driven both by pipeline runs and by a periodic timer; the timestamp
/// claim makes the two sources safe to race.
pub struct ChangeNotifier {
    store: ListingStore,
    channels: RwLock<HashMap<String, CategoryChannel>>,
}

impl ChangeNotifier {
    pub fn new(store: ListingStore) -> Self {
        Self {
            store,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber. The first subscriber for a category starts
    /// the clock: only listings created after this point are pushed.
    pub async fn subscribe(&self, category: &str, channel: Arc<dyn PushChannel>) -> SubscriberId {
        let id = Uuid::new_v4();
        let mut channels = self.channels.write().await;
        let entry = channels
            .entry(category.to_string())
            .or_insert_with(|| CategoryChannel {
                subscribers: HashMap::new(),
                last_broadcast: Utc::now(),
            });
        entry.subscribers.insert(id, channel);
        info!(
            category = category,
            subscriber = %id,
            total = entry.subscribers.len(),
            "Subscriber added"
        );
        id
    }

    /// Remove a subscriber. The category entry and its broadcast
    /// timestamp stay, so a re-subscriber does not replay history.
    pub async fn unsubscribe(&self, category: &str, id: SubscriberId) {
        let mut channels = self.channels.write().await;
        if let Some(entry) = channels.get_mut(category) {
            if entry.subscribers.remove(&id).is_some() {
                info!(category = category, subscriber = %id, "Subscriber removed");
            }
        }
    }

    pub async fn subscriber_count(&self, category: &str) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(category)
            .map(|e| e.subscribers.len())
            .unwrap_or(0)
    }

    pub async fn active_categories(&self) -> Vec<String> {
        let channels = self.channels.read().await;
        channels
            .iter()
            .filter(|(_, e)| !e.subscribers.is_empty())
            .map(|(c, _)| c.clone())
            .collect()
    }

    /// Push listings created since the last broadcast to every
    /// subscriber of the category. Returns the number of listings
    /// pushed; concurrent broadcasts for the same category resolve to
    /// one winner, the rest push nothing.
    pub async fn broadcast(&self, category: &str) -> Result<usize> {
        let since = {
            let channels = self.channels.read().await;
            match channels.get(category) {
                Some(entry) if !entry.subscribers.is_empty() => entry.last_broadcast,
                _ => return Ok(0),
            }
        };

        let listings = self.store.query_listings(category, since).await?;
        if listings.is_empty() {
            return Ok(0);
        }
        let newest = listings
            .iter()
            .map(|l| l.created_at)
            .max()
            .unwrap_or(since);

        // Claim the batch before sending anything. If another broadcast
        // got here first its timestamp already covers these rows.
        let subscribers: Vec<(SubscriberId, Arc<dyn PushChannel>)> = {
            let mut channels = self.channels.write().await;
            let entry = match channels.get_mut(category) {
                Some(entry) if !entry.subscribers.is_empty() => entry,
                _ => return Ok(0),
            };
            if entry.last_broadcast > since {
                debug!(category = category, "Batch already claimed");
                return Ok(0);
            }
            entry.last_broadcast = newest;
            entry
                .subscribers
                .iter()
                .map(|(id, ch)| (*id, ch.clone()))
                .collect()
        };

        let now = Utc::now();
        let update = ListingUpdate {
            category: category.to_string(),
            listings: listings
                .iter()
                .map(|l| ListingPayload::from_listing(l, now))
                .collect(),
        };

        let mut dead = Vec::new();
        for (id, channel) in &subscribers {
            if let Err(e) = channel.send(&update).await {
                warn!(
                    category = category,
                    subscriber = %id,
                    error = %e,
                    "Push failed, dropping subscriber"
                );
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            let mut channels = self.channels.write().await;
            if let Some(entry) = channels.get_mut(category) {
                for id in &dead {
                    entry.subscribers.remove(id);
                }
            }
        }

        info!(
            category = category,
            listings = update.listings.len(),
            subscribers = subscribers.len(),
            dropped = dead.len(),
            "Broadcast complete"
        );
        Ok(update.listings.len())
    }
}
