use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::strategies::static_page::parse_listing_document;
use crate::strategies::traits::{RawListing, ScrapeStrategy};
use crate::utils::error::{AppError, Result};

const LISTING_SELECTOR: &str = r#"[data-testid="marketplace_listing_item"]"#;
const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Drive a headless browser so client-rendered listing cards appear in
/// the DOM. Highest-fidelity acquisition path and therefore first in
/// the default fallback chain.
pub struct DynamicStrategy {
    base_url: String,
    chrome_path: Option<String>,
    browser: OnceCell<Arc<Browser>>,
}

impl DynamicStrategy {
    pub fn new(base_url: String, chrome_path: Option<String>) -> Self {
        Self {
            base_url,
            chrome_path,
            browser: OnceCell::new(),
        }
    }

    /// Launch the browser on first use and keep it for the process
    /// lifetime. Launch failure surfaces as a transient error so the
    /// pipeline falls through to the next strategy.
    async fn browser(&self) -> Result<Arc<Browser>> {
        self.browser
            .get_or_try_init(|| async {
                info!("Launching headless browser");
                let chrome_path = self.chrome_path.clone();
                let browser = tokio::task::spawn_blocking(move || {
                    let mut options = LaunchOptions::default_builder();
                    options
                        .headless(true)
                        .sandbox(false)
                        .idle_browser_timeout(Duration::from_secs(300));
                    if let Some(path) = &chrome_path {
                        options.path(Some(path.into()));
                    }
                    let options = options.build().map_err(|e| {
                        AppError::Configuration(format!("Invalid browser options: {}", e))
                    })?;

                    Browser::new(options).map_err(|e| AppError::TransientNetwork {
                        status: None,
                        retry_after: None,
                        message: format!("Failed to launch browser: {}", e),
                    })
                })
                .await
                .map_err(|e| AppError::Unknown(format!("Browser launch task failed: {}", e)))??;
                Ok(Arc::new(browser))
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl ScrapeStrategy for DynamicStrategy {
    fn name(&self) -> &'static str {
        "dynamic"
    }

    fn description(&self) -> &'static str {
        "Headless-browser rendering of category pages"
    }

    async fn fetch(&self, category: &str) -> Result<Vec<RawListing>> {
        let url = format!("{}/category/{}", self.base_url.trim_end_matches('/'), category);
        debug!(category = category, url = %url, "Rendering category page");

        let browser = self.browser().await?;

        // The devtools client is synchronous; keep the tab work off the
        // async workers so a slow page cannot stall other categories.
        let category_for_log = category.to_string();
        let html = tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let tab = browser.new_tab().map_err(|e| AppError::TransientNetwork {
                status: None,
                retry_after: None,
                message: format!("Failed to open tab: {}", e),
            })?;
            tab.set_default_timeout(PAGE_LOAD_TIMEOUT);

            tab.navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map_err(|e| AppError::TransientNetwork {
                    status: None,
                    retry_after: None,
                    message: format!("Navigation failed: {}", e),
                })?;

            // No listing cards after the wait means the category is
            // empty, not that the fetch failed.
            if tab.wait_for_element(LISTING_SELECTOR).is_err() {
                warn!(category = %category_for_log, "No listing cards rendered");
                let _ = tab.close(true);
                return Ok(None);
            }

            let html = tab.get_content().map_err(|e| AppError::TransientNetwork {
                status: None,
                retry_after: None,
                message: format!("Failed to read page content: {}", e),
            })?;
            let _ = tab.close(true);
            Ok(Some(html))
        })
        .await
        .map_err(|e| AppError::Unknown(format!("Page render task failed: {}", e)))??;

        let html = match html {
            Some(html) => html,
            None => return Ok(vec![]),
        };

        let listings = parse_listing_document(&html, &self.base_url);
        debug!(
            category = category,
            count = listings.len(),
            "Parsed rendered page"
        );
        Ok(listings)
    }
}
