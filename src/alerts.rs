use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SmtpConfig;
use crate::models::{AlertDelivery, DeliveryChannel, InterestAlert, Listing};
use crate::store::ListingStore;
use crate::utils::error::{AppError, Result};

/// Email-style delivery of a matched listing.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send_alert(&self, to: &str, listing: &Listing) -> Result<()>;
}

/// Webhook-style delivery of a matched listing.
#[async_trait]
pub trait WebhookChannel: Send + Sync {
    async fn post_alert(&self, url: &str, alert_id: &str, listing: &Listing) -> Result<()>;
}

pub struct SmtpMessageChannel {
    transport: SmtpTransport,
    from: String,
}

impl SmtpMessageChannel {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from_address = config.from_address.as_deref().ok_or_else(|| {
            AppError::Configuration("SMTP from_address is required for email alerts".to_string())
        })?;

        let mut builder = if config.use_tls {
            SmtpTransport::relay(&config.host).map_err(|e| {
                AppError::Configuration(format!("Invalid SMTP relay config: {}", e))
            })?
        } else {
            SmtpTransport::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: format!("{} <{}>", config.from_name, from_address),
        })
    }
}

#[async_trait]
impl MessageChannel for SmtpMessageChannel {
    async fn send_alert(&self, to: &str, listing: &Listing) -> Result<()> {
        let body = format!(
            "New listing matching your alert!\n\n\
             Title: {}\n\
             Price: ${:.2}\n\
             Location: {}\n\
             URL: {}\n",
            listing.title, listing.price, listing.location, listing.listing_url
        );

        let email = Message::builder()
            .from(self.from.parse().map_err(|e| {
                AppError::Configuration(format!("Invalid from address: {}", e))
            })?)
            .to(to.parse().map_err(|e| {
                AppError::Configuration(format!("Invalid recipient address: {}", e))
            })?)
            .subject(format!("New Marketplace Listing: {}", listing.title))
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| AppError::Unknown(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(&email)
            .map_err(|e| AppError::TransientNetwork {
                status: None,
                retry_after: None,
                message: format!("SMTP send failed: {}", e),
            })?;
        debug!(to = to, listing_id = %listing.listing_id, "Alert email sent");
        Ok(())
    }
}

pub struct HttpWebhookChannel {
    client: reqwest::Client,
}

impl HttpWebhookChannel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookChannel for HttpWebhookChannel {
    async fn post_alert(&self, url: &str, alert_id: &str, listing: &Listing) -> Result<()> {
        let payload = json!({
            "alert_id": alert_id,
            "listing": {
                "id": listing.id,
                "title": listing.title,
                "price": listing.price,
                "location": listing.location,
                "url": listing.listing_url,
            }
        });

        let response = self.client.post(url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(AppError::TransientNetwork {
                status: Some(response.status().as_u16()),
                retry_after: None,
                message: format!("Webhook returned {}", response.status()),
            });
        }
        debug!(url = url, listing_id = %listing.listing_id, "Alert webhook delivered");
        Ok(())
    }
}

/// Matches freshly persisted listings against stored interest alerts
/// and pushes them out. Delivery is best-effort per channel: one
/// channel failing never blocks the other, and every attempt leaves an
/// audit row.
pub struct AlertDispatcher {
    store: ListingStore,
    message_channel: Option<Arc<dyn MessageChannel>>,
    webhook_channel: Option<Arc<dyn WebhookChannel>>,
}

impl AlertDispatcher {
    pub fn new(
        store: ListingStore,
        message_channel: Option<Arc<dyn MessageChannel>>,
        webhook_channel: Option<Arc<dyn WebhookChannel>>,
    ) -> Self {
        Self {
            store,
            message_channel,
            webhook_channel,
        }
    }

    /// Dispatch alerts for a batch of listings. Returns the number of
    /// successful deliveries.
    pub async fn dispatch(&self, listings: &[Listing]) -> Result<usize> {
        let mut delivered = 0;

        for listing in listings {
            let alerts = self
                .store
                .query_active_alerts(&listing.category, listing.price)
                .await?;

            for alert in alerts.iter().filter(|a| a.matches_title(&listing.title)) {
                delivered += self.deliver(alert, listing).await;
            }
        }

        if delivered > 0 {
            info!(count = delivered, "Alert deliveries completed");
        }
        Ok(delivered)
    }

    async fn deliver(&self, alert: &InterestAlert, listing: &Listing) -> usize {
        let mut delivered = 0;

        if let (Some(email), Some(channel)) = (&alert.notify_email, &self.message_channel) {
            match channel.send_alert(email, listing).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    alert_id = %alert.id,
                    listing_id = %listing.listing_id,
                    error = %e,
                    "Email alert delivery failed"
                ),
            }
            self.audit(alert, listing, DeliveryChannel::Email).await;
        }

        if let (Some(url), Some(channel)) = (&alert.notify_webhook, &self.webhook_channel) {
            match channel.post_alert(url, &alert.id, listing).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    alert_id = %alert.id,
                    listing_id = %listing.listing_id,
                    error = %e,
                    "Webhook alert delivery failed"
                ),
            }
            self.audit(alert, listing, DeliveryChannel::Webhook).await;
        }

        delivered
    }

    /// Record the attempt. Audit failures are logged, never propagated:
    /// losing an audit row is better than losing the dispatch loop.
    async fn audit(&self, alert: &InterestAlert, listing: &Listing, channel: DeliveryChannel) {
        let delivery = AlertDelivery::new(&alert.id, &listing.id, channel);
        if let Err(e) = self.store.record_delivery(&delivery).await {
            warn!(
                alert_id = %alert.id,
                channel = channel.as_str(),
                error = %e,
                "Failed to record alert delivery"
            );
        }
    }
}
