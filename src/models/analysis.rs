use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::generate_id;

/// Quality analysis for a listing. Zero-or-one per listing; only written
/// when the analysis stage of a pipeline run succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ListingAnalysis {
    pub id: String,
    /// References `Listing.id` (the row id, not the source listing id).
    pub listing_id: String,
    pub quality_score: f64,
    pub keywords_json: String,
    pub category_confidence: f64,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAnalysis {
    pub quality_score: f64,
    pub keywords: Vec<String>,
    pub category_confidence: f64,
}

impl ListingAnalysis {
    pub fn new(listing_id: &str, new_analysis: NewAnalysis) -> Self {
        Self {
            id: generate_id(),
            listing_id: listing_id.to_string(),
            quality_score: new_analysis.quality_score,
            keywords_json: serde_json::to_string(&new_analysis.keywords)
                .unwrap_or_else(|_| "[]".to_string()),
            category_confidence: new_analysis.category_confidence,
            analyzed_at: Utc::now(),
        }
    }

    pub fn keywords(&self) -> Vec<String> {
        serde_json::from_str(&self.keywords_json).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_creation() {
        let analysis = ListingAnalysis::new(
            "abc123",
            NewAnalysis {
                quality_score: 0.85,
                keywords: vec!["trek".to_string(), "mountain".to_string()],
                category_confidence: 0.9,
            },
        );

        assert_eq!(analysis.listing_id, "abc123");
        assert_eq!(analysis.quality_score, 0.85);
        assert_eq!(analysis.keywords(), vec!["trek", "mountain"]);
        assert_eq!(analysis.id.len(), 32);
    }

    #[test]
    fn test_empty_keywords() {
        let analysis = ListingAnalysis::new(
            "abc123",
            NewAnalysis {
                quality_score: 0.2,
                keywords: vec![],
                category_confidence: 0.5,
            },
        );
        assert!(analysis.keywords().is_empty());
        assert_eq!(analysis.keywords_json, "[]");
    }
}
