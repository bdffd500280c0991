/*
 * Wire-level search model: provider-normalized search results, cache envelopes,
 * and the public search response shape.
 * I'm keeping these as value objects held only for the duration of a response;
 * nothing here is persisted directly.
 */

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One normalized result from a provider search, provider-agnostic.
/// I'm normalizing every provider's payload into this one shape so the rest of
/// the core never branches on the source API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Opaque identifier within the source provider.
    pub provider_id: String,
    /// Name of the provider this result came from.
    pub provider: String,
    pub title: String,
    /// Ordered author list; may be empty when the provider omits authors.
    #[serde(default)]
    pub authors: Vec<String>,
    pub subtitle: Option<String>,
    pub isbn10: Option<String>,
    pub isbn13: Option<String>,
    pub publisher: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub page_count: Option<i32>,
    pub language: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub cover_image_url: Option<String>,
    pub description: Option<String>,
}

impl SearchResult {
    pub fn year(&self) -> Option<i32> {
        self.publication_date.map(|d| d.year())
    }
}

/// Search type selecting the provider query grammar
/// I'm providing typed searches that each adapter maps onto its own syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    General,
    Title,
    Author,
    Isbn,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::General => "general",
            SearchType::Title => "title",
            SearchType::Author => "author",
            SearchType::Isbn => "isbn",
        }
    }
}

impl Default for SearchType {
    fn default() -> Self {
        SearchType::General
    }
}

impl FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(SearchType::General),
            "title" => Ok(SearchType::Title),
            "author" => Ok(SearchType::Author),
            "isbn" => Ok(SearchType::Isbn),
            other => Err(format!("unknown search type: {}", other)),
        }
    }
}

/// Caller preference for which provider serves the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    Primary,
    Secondary,
    Auto,
}

impl Default for ProviderChoice {
    fn default() -> Self {
        ProviderChoice::Auto
    }
}

impl FromStr for ProviderChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(ProviderChoice::Primary),
            "secondary" => Ok(ProviderChoice::Secondary),
            "auto" => Ok(ProviderChoice::Auto),
            other => Err(format!("unknown provider preference: {}", other)),
        }
    }
}

/// Which cache layer served a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheLayer {
    #[serde(rename = "l1")]
    L1,
    #[serde(rename = "l2")]
    L2,
    #[serde(rename = "miss")]
    Miss,
}

impl CacheLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLayer::L1 => "l1",
            CacheLayer::L2 => "l2",
            CacheLayer::Miss => "miss",
        }
    }
}

/// Cached search results together with the layer they were read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResults {
    pub results: Vec<SearchResult>,
    pub provider: String,
    pub result_count: i64,
    pub expires_at: DateTime<Utc>,
    pub layer: CacheLayer,
}

/// Public response of the search orchestrator.
/// I'm surfacing cache layer, degradation, and latency so clients can see how
/// the answer was produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: i64,
    pub cache_hit: CacheLayer,
    /// True whenever the response was served without fresh data from the
    /// preferred provider: secondary fallback, stale cache, or degraded L1.
    pub degraded: bool,
    pub provider_used: String,
    pub latency_ms: u64,
}
