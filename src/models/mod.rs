use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod alert;
pub mod analysis;
pub mod listing;

// Re-exports for convenience
pub use alert::*;
pub use analysis::*;
pub use listing::*;

/// Delivery channels an interest alert can be routed through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT")]
pub enum DeliveryChannel {
    #[sqlx(rename = "email")]
    Email,
    #[sqlx(rename = "webhook")]
    Webhook,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Email => "email",
            DeliveryChannel::Webhook => "webhook",
        }
    }
}

// Helper function to generate UUIDs in the format expected by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
