use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::generate_id;

/// A marketplace listing as persisted. The `listing_id` is the
/// source-assigned identifier and is unique: re-ingesting the same
/// source listing updates the existing row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Listing {
    pub id: String,
    pub listing_id: String,
    pub title: String,
    pub price: f64,
    pub description: Option<String>,
    pub location: String,
    pub category: String,
    pub seller_id: Option<String>,
    pub listing_url: String,
    pub images_json: String,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewListing {
    pub listing_id: String,
    pub title: String,
    pub price: f64,
    pub description: Option<String>,
    pub location: String,
    pub category: String,
    pub seller_id: Option<String>,
    pub listing_url: String,
    pub images: Vec<String>,
}

impl Listing {
    pub fn new(new_listing: NewListing) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            listing_id: new_listing.listing_id,
            title: new_listing.title,
            price: new_listing.price,
            description: new_listing.description,
            location: new_listing.location,
            category: new_listing.category,
            seller_id: new_listing.seller_id,
            listing_url: new_listing.listing_url,
            images_json: serde_json::to_string(&new_listing.images)
                .unwrap_or_else(|_| "[]".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn images(&self) -> Vec<String> {
        serde_json::from_str(&self.images_json).unwrap_or_default()
    }

    /// Listing age in fractional hours, relative to `now`.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let age = now.signed_duration_since(self.created_at);
        (age.num_milliseconds() as f64 / 3_600_000.0).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_new_listing() -> NewListing {
        NewListing {
            listing_id: "fb-98765".to_string(),
            title: "Trek mountain bike".to_string(),
            price: 450.0,
            description: Some("Barely used".to_string()),
            location: "Brunswick".to_string(),
            category: "bikes".to_string(),
            seller_id: Some("seller-1".to_string()),
            listing_url: "https://marketplace.example.com/item/fb-98765".to_string(),
            images: vec!["https://img.example.com/1.jpg".to_string()],
        }
    }

    #[test]
    fn test_listing_creation() {
        let listing = Listing::new(sample_new_listing());

        assert_eq!(listing.listing_id, "fb-98765");
        assert_eq!(listing.title, "Trek mountain bike");
        assert_eq!(listing.price, 450.0);
        assert_eq!(listing.category, "bikes");
        assert_eq!(listing.id.len(), 32);
        assert_eq!(listing.images(), vec!["https://img.example.com/1.jpg"]);
        assert_eq!(listing.created_at, listing.updated_at);
    }

    #[test]
    fn test_images_round_trip() {
        let mut new_listing = sample_new_listing();
        new_listing.images = vec![];
        let listing = Listing::new(new_listing);
        assert!(listing.images().is_empty());
    }

    #[test]
    fn test_age_hours() {
        let mut listing = Listing::new(sample_new_listing());
        let now = Utc::now();
        listing.created_at = now - chrono::Duration::minutes(90);

        let age = listing.age_hours(now);
        assert!((age - 1.5).abs() < 0.01);

        // A listing "created in the future" (clock skew) clamps to zero
        listing.created_at = now + chrono::Duration::minutes(5);
        assert_eq!(listing.age_hours(now), 0.0);
    }

    #[test]
    fn test_serialization() {
        let listing = Listing::new(sample_new_listing());
        let serialized = serde_json::to_string(&listing).unwrap();
        let deserialized: Listing = serde_json::from_str(&serialized).unwrap();
        assert_eq!(listing, deserialized);
    }
}
