use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::NewListing;
use crate::strategies::traits::{status_error, RawListing, ScrapeStrategy};
use crate::utils::error::Result;

/// Fetch listings through the source's JSON endpoint. Cheaper and more
/// structured than scraping markup, but the endpoint is rate limited
/// more aggressively than the pages are.
pub struct ApiStrategy {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiListing {
    id: String,
    title: String,
    price: f64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: String,
    #[serde(default)]
    seller_id: Option<String>,
    url: String,
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiListingDetail {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    seller_id: Option<String>,
    #[serde(default)]
    images: Vec<String>,
}

impl ApiStrategy {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl From<ApiListing> for RawListing {
    fn from(api: ApiListing) -> Self {
        RawListing {
            source_id: Some(api.id),
            title: api.title,
            price_text: api.price.to_string(),
            location: api.location,
            url: api.url,
            description: api.description,
            seller_id: api.seller_id,
            images: api.images,
        }
    }
}

#[async_trait]
impl ScrapeStrategy for ApiStrategy {
    fn name(&self) -> &'static str {
        "api"
    }

    fn description(&self) -> &'static str {
        "Structured JSON endpoint queries"
    }

    async fn fetch(&self, category: &str) -> Result<Vec<RawListing>> {
        let url = self.endpoint("/api/listings");
        debug!(category = category, "Querying listings endpoint");

        let response = self
            .client
            .get(&url)
            .query(&[("category", category)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(&response));
        }

        let listings: Vec<ApiListing> = response.json().await?;
        Ok(listings.into_iter().map(RawListing::from).collect())
    }

    /// Pull the detail record for each listing to fill in description,
    /// seller and images the index response omits. The first hard error
    /// aborts the batch so the classifier can decide what to do with it.
    async fn enrich(&self, listings: Vec<NewListing>) -> Result<Vec<NewListing>> {
        let mut enriched = Vec::with_capacity(listings.len());

        for mut listing in listings {
            let url = self.endpoint(&format!("/api/listings/{}", listing.listing_id));
            let response = self.client.get(&url).send().await?;

            if !response.status().is_success() {
                // A missing detail page is not worth failing the batch over
                if response.status().as_u16() == 404 {
                    warn!(
                        listing_id = %listing.listing_id,
                        "No detail record for listing, keeping index fields"
                    );
                    enriched.push(listing);
                    continue;
                }
                return Err(status_error(&response));
            }

            let detail: ApiListingDetail = response.json().await?;
            if listing.description.is_none() {
                listing.description = detail.description;
            }
            if listing.seller_id.is_none() {
                listing.seller_id = detail.seller_id;
            }
            if listing.images.is_empty() {
                listing.images = detail.images;
            }
            enriched.push(listing);
        }

        Ok(enriched)
    }
}
