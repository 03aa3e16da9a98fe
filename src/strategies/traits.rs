use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::models::{NewAnalysis, NewListing};
use crate::utils::error::{AppError, Result};

/// A listing as pulled off the page or wire, before normalization.
/// Prices are kept as raw text because sources format them differently
/// ("$1,200", "1200", "AU$1,200.50").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawListing {
    pub source_id: Option<String>,
    pub title: String,
    pub price_text: String,
    pub location: String,
    pub url: String,
    pub description: Option<String>,
    pub seller_id: Option<String>,
    pub images: Vec<String>,
}

/// A normalized listing paired with its optional quality analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedListing {
    pub listing: NewListing,
    pub analysis: Option<NewAnalysis>,
}

impl AnalyzedListing {
    pub fn unanalyzed(listing: NewListing) -> Self {
        Self {
            listing,
            analysis: None,
        }
    }
}

impl RawListing {
    /// Normalize into a persistable listing. Returns `None` when the raw
    /// entry is unusable: no parseable price, or no way to derive a
    /// stable source identifier.
    pub fn into_new_listing(self, category: &str) -> Option<NewListing> {
        let price = parse_price(&self.price_text)?;
        let listing_id = match self.source_id {
            Some(id) if !id.is_empty() => id,
            _ => id_from_url(&self.url)?,
        };
        Some(NewListing {
            listing_id,
            title: self.title,
            price,
            description: self.description,
            location: self.location,
            category: category.to_string(),
            seller_id: self.seller_id,
            listing_url: self.url,
            images: self.images,
        })
    }
}

/// Parse a price out of marketplace text, stripping currency symbols and
/// thousands separators. Returns `None` when no digits are present.
pub fn parse_price(text: &str) -> Option<f64> {
    static PRICE_RE: OnceLock<Regex> = OnceLock::new();
    let re = PRICE_RE.get_or_init(|| Regex::new(r"[\d,]+(?:\.\d+)?").unwrap());

    let m = re.find(text)?;
    let cleaned = m.as_str().replace(',', "");
    cleaned.parse::<f64>().ok().filter(|p| *p >= 0.0)
}

/// Derive a source identifier from the last path segment of the listing
/// URL, the common layout for marketplace item pages.
pub fn id_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let segment = trimmed.rsplit('/').next()?;
    // Strip any query string
    let segment = segment.split('?').next().unwrap_or(segment);
    if segment.is_empty() || segment.contains("://") {
        return None;
    }
    Some(segment.to_string())
}

/// Map an HTTP status to the error taxonomy, reading Retry-After when
/// the source asks us to back off.
pub(crate) fn status_error(response: &reqwest::Response) -> AppError {
    let status = response.status();
    match status.as_u16() {
        404 => AppError::NotFound {
            resource: response.url().to_string(),
        },
        429 => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            AppError::TransientNetwork {
                status: Some(429),
                retry_after,
                message: "Rate limited by source".to_string(),
            }
        }
        code => AppError::TransientNetwork {
            status: Some(code),
            retry_after: None,
            message: format!("Request failed with status {}", code),
        },
    }
}

/// One way of acquiring listings for a category. Strategies are stateless
/// from the caller's point of view and safe to share across tasks.
#[async_trait]
pub trait ScrapeStrategy: Send + Sync {
    /// Stable registry name, e.g. "dynamic".
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Fetch the current listings for a category. An empty vec is a valid
    /// result and means the source had nothing to offer, not an error.
    async fn fetch(&self, category: &str) -> Result<Vec<RawListing>>;

    /// Fill in fields the listing page has but the index page doesn't.
    /// Default is a passthrough for strategies without a detail view.
    async fn enrich(&self, listings: Vec<NewListing>) -> Result<Vec<NewListing>> {
        Ok(listings)
    }

    /// Attach quality analysis. Default wraps listings unanalyzed.
    async fn analyze(&self, listings: Vec<NewListing>) -> Result<Vec<AnalyzedListing>> {
        Ok(listings
            .into_iter()
            .map(AnalyzedListing::unanalyzed)
            .collect())
    }
}
