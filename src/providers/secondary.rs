/*
 * Secondary (fallback) provider adapter speaking an Open-Library-style search
 * API: path+query style with dedicated `title`, `author`, and `isbn` parameters.
 * I'm implementing the degraded-path provider; hydration by provider id is not
 * supported by this API and is reported as such.
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
pub struct SecondaryProvider {
    client: Client,
    settings: ProviderSettings,
}

impl SecondaryProvider {
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

    /// Typed searches map onto dedicated query parameters
    /// I'm mapping the internal search types onto this provider's query grammar
    fn query_params(query: &str, search_type: SearchType) -> (&'static str, String) {
        match search_type {
            SearchType::General => ("q", query.to_string()),
            SearchType::Title => ("title", query.to_string()),
            SearchType::Author => ("author", query.to_string()),
            SearchType::Isbn => ("isbn", query.to_string()),
        }
    }
}

#[async_trait]
impl BookProvider for SecondaryProvider {
    fn name(&self) -> &'static str {
        "secondary"
    }

    async fn search(
        &self,
        query: &str,
        search_type: SearchType,
        limit: u32,
        offset: u32,
    ) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/search.json", self.settings.base_url);
        let (field, value) = Self::query_params(query, search_type);
        let params = [
            (field, value),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];

        debug!(provider = self.name(), %query, ?search_type, limit, offset, "provider search");

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.settings.timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body.chars().take(256).collect()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let total = body.get("numFound").and_then(Value::as_i64).unwrap_or(0);
        let raw_results: Vec<Value> = body
            .get("docs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut normalized_results = Vec::with_capacity(raw_results.len());
        for doc in &raw_results {
            match normalizer::normalize(self.name(), doc) {
                Ok(result) => normalized_results.push(result),
                Err(e) => debug!(provider = self.name(), "skipping unparseable doc: {}", e),
            }
        }

        Ok(ProviderResponse {
            raw_results,
            normalized_results,
            total,
        })
    }

    async fn hydrate(&self, _provider_id: &str) -> Result<SearchResult, ProviderError> {
        Err(ProviderError::NotSupported(self.name().to_string()))
    }
}
