use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::strategies::traits::{status_error, RawListing, ScrapeStrategy};
use crate::utils::error::Result;

/// Plain HTTP fetch of the category index page. Sees only what the
/// server renders without JavaScript, so it usually returns a subset of
/// what the dynamic strategy would. Last resort in the fallback chain.
pub struct StaticStrategy {
    client: reqwest::Client,
    base_url: String,
}

impl StaticStrategy {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl ScrapeStrategy for StaticStrategy {
    fn name(&self) -> &'static str {
        "static"
    }

    fn description(&self) -> &'static str {
        "Plain HTTP fetch of server-rendered category pages"
    }

    async fn fetch(&self, category: &str) -> Result<Vec<RawListing>> {
        let url = format!("{}/category/{}", self.base_url.trim_end_matches('/'), category);
        debug!(category = category, url = %url, "Fetching static page");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(status_error(&response));
        }

        let body = response.text().await?;
        let listings = parse_listing_document(&body, &self.base_url);
        debug!(
            category = category,
            count = listings.len(),
            "Parsed static page"
        );
        Ok(listings)
    }
}

/// Parse listing cards out of a category page. Shared with the dynamic
/// strategy, which hands over the browser-rendered DOM.
pub(crate) fn parse_listing_document(html: &str, base_url: &str) -> Vec<RawListing> {
    // Selectors are infallible for these literals
    let item_sel = Selector::parse(r#"[data-testid="marketplace_listing_item"]"#).unwrap();
    let title_sel = Selector::parse("h2").unwrap();
    let price_sel = Selector::parse(r#"[data-testid="price"]"#).unwrap();
    let location_sel = Selector::parse(r#"[data-testid="location"]"#).unwrap();
    let link_sel = Selector::parse("a").unwrap();
    let image_sel = Selector::parse("img").unwrap();

    let document = Html::parse_document(html);
    let mut listings = Vec::new();

    for item in document.select(&item_sel) {
        let title = match item.select(&title_sel).next() {
            Some(el) => el.text().collect::<String>().trim().to_string(),
            None => {
                warn!("Listing card without a title element, skipping");
                continue;
            }
        };

        let price_text = item
            .select(&price_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let location = item
            .select(&location_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let url = item
            .select(&link_sel)
            .next()
            .and_then(|el| el.value().attr("href"))
            .map(|href| absolutize(base_url, href))
            .unwrap_or_default();

        let images = item
            .select(&image_sel)
            .filter_map(|el| el.value().attr("src"))
            .map(String::from)
            .collect();

        listings.push(RawListing {
            source_id: None,
            title,
            price_text,
            location,
            url,
            description: None,
            seller_id: None,
            images,
        });
    }

    listings
}

fn absolutize(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            href.trim_start_matches('/')
        )
    }
}
