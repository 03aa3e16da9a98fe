use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::{generate_id, DeliveryChannel};

/// A stored interest criterion. Alerts are created and deactivated by an
/// external surface; the dispatcher only reads them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct InterestAlert {
    pub id: String,
    pub user_id: Option<String>,
    pub category: String,
    pub max_price: f64,
    pub keywords_json: String,
    pub notify_email: Option<String>,
    pub notify_webhook: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub user_id: Option<String>,
    pub category: String,
    pub max_price: f64,
    pub keywords: Vec<String>,
    pub notify_email: Option<String>,
    pub notify_webhook: Option<String>,
}

impl InterestAlert {
    pub fn new(new_alert: NewAlert) -> Self {
        Self {
            id: generate_id(),
            user_id: new_alert.user_id,
            category: new_alert.category,
            max_price: new_alert.max_price,
            keywords_json: serde_json::to_string(&new_alert.keywords)
                .unwrap_or_else(|_| "[]".to_string()),
            notify_email: new_alert.notify_email,
            notify_webhook: new_alert.notify_webhook,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn keywords(&self) -> Vec<String> {
        serde_json::from_str(&self.keywords_json).unwrap_or_default()
    }

    /// Case-insensitive substring match of any alert keyword against the
    /// listing title. Alerts with no keywords match unconditionally.
    pub fn matches_title(&self, title: &str) -> bool {
        let keywords = self.keywords();
        if keywords.is_empty() {
            return true;
        }
        let title_lower = title.to_lowercase();
        keywords
            .iter()
            .any(|kw| title_lower.contains(&kw.to_lowercase()))
    }
}

/// Audit row for one attempted alert delivery, one per channel attempted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct AlertDelivery {
    pub id: String,
    pub alert_id: String,
    pub listing_id: String,
    pub channel: DeliveryChannel,
    pub sent_at: DateTime<Utc>,
}

impl AlertDelivery {
    pub fn new(alert_id: &str, listing_id: &str, channel: DeliveryChannel) -> Self {
        Self {
            id: generate_id(),
            alert_id: alert_id.to_string(),
            listing_id: listing_id.to_string(),
            channel,
            sent_at: Utc::now(),
        }
    }
}
