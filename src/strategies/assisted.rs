use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::models::{NewAnalysis, NewListing};
use crate::strategies::traits::{AnalyzedListing, RawListing, ScrapeStrategy};
use crate::utils::error::{AppError, Result};

/// Quality analysis for already-acquired listings. Does not fetch
/// anything itself: its place in the registry is as the configured
/// `analysis_strategy`. When a remote analysis endpoint is configured it
/// is preferred; otherwise local heuristics apply.
pub struct AssistedStrategy {
    client: reqwest::Client,
    endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    title: &'a str,
    description: Option<&'a str>,
    category: &'a str,
    price: f64,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    quality_score: f64,
    #[serde(default)]
    keywords: Vec<String>,
    category_confidence: f64,
}

impl AssistedStrategy {
    pub fn new(client: reqwest::Client, endpoint: Option<String>) -> Self {
        Self { client, endpoint }
    }

    async fn analyze_remote(&self, endpoint: &str, listing: &NewListing) -> Result<NewAnalysis> {
        let request = AnalysisRequest {
            title: &listing.title,
            description: listing.description.as_deref(),
            category: &listing.category,
            price: listing.price,
        };

        let response = self
            .client
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Analysis {
                rate_limited: false,
                message: format!("Analysis request failed: {}", e),
            })?;

        if response.status().as_u16() == 429 {
            return Err(AppError::Analysis {
                rate_limited: true,
                message: "Analysis endpoint rate limited".to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(AppError::Analysis {
                rate_limited: false,
                message: format!("Analysis endpoint returned {}", response.status()),
            });
        }

        let parsed: AnalysisResponse = response.json().await.map_err(|e| AppError::Analysis {
            rate_limited: false,
            message: format!("Malformed analysis response: {}", e),
        })?;

        Ok(NewAnalysis {
            quality_score: parsed.quality_score,
            keywords: parsed.keywords,
            category_confidence: parsed.category_confidence,
        })
    }

    /// Completeness-based scoring: listings carrying a description,
    /// seller, images and a plausible price score higher.
    fn analyze_local(listing: &NewListing) -> NewAnalysis {
        let mut score: f64 = 0.2;
        if listing.description.as_deref().map_or(false, |d| d.len() > 20) {
            score += 0.3;
        }
        if listing.seller_id.is_some() {
            score += 0.2;
        }
        if !listing.images.is_empty() {
            score += 0.2;
        }
        if listing.price > 0.0 {
            score += 0.1;
        }

        let mut seen = HashSet::new();
        let keywords: Vec<String> = listing
            .title
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| w.len() > 3)
            .filter(|w| seen.insert(w.clone()))
            .collect();

        let haystack = format!(
            "{} {}",
            listing.title.to_lowercase(),
            listing.description.as_deref().unwrap_or("").to_lowercase()
        );
        let category_confidence = if haystack.contains(&listing.category.to_lowercase()) {
            0.9
        } else {
            0.5
        };

        NewAnalysis {
            quality_score: score.min(1.0),
            keywords,
            category_confidence,
        }
    }
}

#[async_trait]
impl ScrapeStrategy for AssistedStrategy {
    fn name(&self) -> &'static str {
        "assisted"
    }

    fn description(&self) -> &'static str {
        "Listing quality analysis, remote or heuristic"
    }

    /// Analysis-only; contributes nothing to acquisition.
    async fn fetch(&self, _category: &str) -> Result<Vec<RawListing>> {
        Ok(vec![])
    }

    async fn analyze(&self, listings: Vec<NewListing>) -> Result<Vec<AnalyzedListing>> {
        let mut analyzed = Vec::with_capacity(listings.len());

        for listing in listings {
            let analysis = match &self.endpoint {
                Some(endpoint) => self.analyze_remote(endpoint, &listing).await?,
                None => Self::analyze_local(&listing),
            };
            debug!(
                listing_id = %listing.listing_id,
                quality_score = analysis.quality_score,
                "Analyzed listing"
            );
            analyzed.push(AnalyzedListing {
                listing,
                analysis: Some(analysis),
            });
        }

        Ok(analyzed)
    }
}
