/*
 * Primary provider adapter speaking a Google-Books-style API: one `q` parameter
 * with `intitle:` / `inauthor:` / `isbn:` prefixes for typed searches, paginated
 * via `startIndex` / `maxResults`, with an optional API key raising the free-tier
 * quota.
 * I'm implementing the outbound communication with strict error classification
 * and no internal retries; retry policy belongs to the orchestrator.
 */

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::models::search::{SearchResult, SearchType};
use crate::providers::{
    classify_status, classify_transport, normalizer, BookProvider, ProviderError,
    ProviderResponse, ProviderSettings,
};

#[derive(Debug, Clone)]
pub struct PrimaryProvider {
    client: Client,
    settings: ProviderSettings,
}

impl PrimaryProvider {
    /// Create the adapter with its HTTP client
    /// I'm setting up the client with optimal configuration for the catalog API
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|e| ProviderError::ParseError(format!("invalid user agent: {}", e)))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, settings })
    }

    /// Build the single `q` parameter with the typed-search prefix grammar
    /// I'm mapping the internal search types onto this provider's query syntax
    fn build_query(query: &str, search_type: SearchType) -> String {
        match search_type {
            SearchType::General => query.to_string(),
            SearchType::Title => format!("intitle:{}", query),
            SearchType::Author => format!("inauthor:{}", query),
            SearchType::Isbn => format!("isbn:{}", query),
        }
    }

    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value, ProviderError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.settings.timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), truncate(&body)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl BookProvider for PrimaryProvider {
    fn name(&self) -> &'static str {
        "primary"
    }

    async fn search(
        &self,
        query: &str,
        search_type: SearchType,
        limit: u32,
        offset: u32,
    ) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/volumes", self.settings.base_url);
        let mut params = vec![
            ("q", Self::build_query(query, search_type)),
            ("startIndex", offset.to_string()),
            ("maxResults", limit.to_string()),
        ];
        if let Some(key) = &self.settings.api_key {
            params.push(("key", key.clone()));
        }

        debug!(provider = self.name(), %query, ?search_type, limit, offset, "provider search");

        let body = self.get_json(&url, &params).await?;

        let total = body.get("totalItems").and_then(Value::as_i64).unwrap_or(0);
        let raw_results: Vec<Value> = body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut normalized_results = Vec::with_capacity(raw_results.len());
        for item in &raw_results {
            match normalizer::normalize(self.name(), item) {
                Ok(result) => normalized_results.push(result),
                Err(e) => debug!(provider = self.name(), "skipping unparseable volume: {}", e),
            }
        }

        Ok(ProviderResponse {
            raw_results,
            normalized_results,
            total,
        })
    }

    async fn hydrate(&self, provider_id: &str) -> Result<SearchResult, ProviderError> {
        let url = format!("{}/volumes/{}", self.settings.base_url, provider_id);
        let mut params = Vec::new();
        if let Some(key) = &self.settings.api_key {
            params.push(("key", key.clone()));
        }

        let body = self.get_json(&url, &params).await?;
        normalizer::normalize(self.name(), &body)
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 256;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}
