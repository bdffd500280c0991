/*
 * Provider abstraction for third-party book APIs: the capability trait, the
 * outbound error classification, and shared input validation.
 * I'm implementing comprehensive outbound API communication behind one interface
 * so adding a third provider only needs a new adapter plus registration.
 *
 * Providers never retry internally; retry and fallback policy belongs to the
 * search orchestrator. Each call carries a hard deadline enforced both by the
 * HTTP client and again at the circuit breaker.
 */

pub mod normalizer;
pub mod primary;
pub mod secondary;

pub use primary::PrimaryProvider;
pub use secondary::SecondaryProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::search::{SearchResult, SearchType};
use crate::utils::error::AppError;

/// Hard per-call deadline for any provider operation.
pub const PROVIDER_DEADLINE_MS: u64 = 2_500;

/// Query length bounds after trimming.
pub const QUERY_MIN_LEN: usize = 2;
pub const QUERY_MAX_LEN: usize = 500;

/// Result page bounds.
pub const LIMIT_MIN: u32 = 1;
pub const LIMIT_MAX: u32 = 40;

/// Classified outbound provider failure.
/// I'm categorizing failures for detailed error analysis at the breaker and
/// orchestrator layers.
///
/// `BadRequest` is caller-caused and never counts against the circuit breaker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider call exceeded {0} ms deadline")]
    Timeout(u64),

    #[error("provider signaled quota exhaustion: {0}")]
    RateLimit(String),

    #[error("provider server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("provider rejected request (HTTP {status}): {message}")]
    BadRequest { status: u16, message: String },

    #[error("network failure reaching provider: {0}")]
    Network(String),

    #[error("failed to parse provider response: {0}")]
    ParseError(String),

    #[error("operation not supported by provider {0}")]
    NotSupported(String),
}

impl ProviderError {
    /// Short kind label used in the `search.provider.errors{kind}` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "timeout",
            ProviderError::RateLimit(_) => "rate_limit",
            ProviderError::ServerError { .. } => "server_error",
            ProviderError::BadRequest { .. } => "bad_request",
            ProviderError::Network(_) => "network",
            ProviderError::ParseError(_) => "parse_error",
            ProviderError::NotSupported(_) => "not_supported",
        }
    }

    /// Whether this failure counts against the breaker's error rate.
    /// User-caused errors do not.
    pub fn counts_as_breaker_failure(&self) -> bool {
        !matches!(
            self,
            ProviderError::BadRequest { .. } | ProviderError::NotSupported(_)
        )
    }

    /// Whether the orchestrator may fall back to another provider or stale
    /// cache on this failure. Permanent classifications are surfaced verbatim.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::RateLimit(_)
                | ProviderError::ServerError { .. }
                | ProviderError::Network(_)
        )
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout(ms) => {
                AppError::ProviderTimeout(format!("call exceeded {} ms", ms))
            }
            ProviderError::RateLimit(msg) => AppError::ProviderRateLimited(msg),
            ProviderError::ServerError { status, message } => {
                AppError::ProviderServerError(format!("HTTP {}: {}", status, message))
            }
            ProviderError::BadRequest { status, message } => {
                AppError::ProviderBadRequest(format!("HTTP {}: {}", status, message))
            }
            ProviderError::Network(msg) => AppError::ProviderNetworkError(msg),
            ProviderError::ParseError(msg) => AppError::ProviderParseError(msg),
            ProviderError::NotSupported(provider) => {
                AppError::NotFoundError(format!("operation not supported by provider {}", provider))
            }
        }
    }
}

/// One provider search response: raw payloads for provenance plus the
/// normalized result list.
/// I'm keeping the raw payloads alongside so provenance records stay faithful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub raw_results: Vec<serde_json::Value>,
    pub normalized_results: Vec<SearchResult>,
    /// Provider-reported total matches for the query, when available.
    pub total: i64,
}

/// Opaque adapter configuration
/// I'm redacting the API key from Debug output so it never lands in logs
#[derive(Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Capability set of a book metadata provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookProvider: Send + Sync {
    /// Stable provider name used for cache tagging, breaker registration, and metrics.
    fn name(&self) -> &'static str;

    /// Execute one outbound search. Inputs are assumed validated by
    /// [`validate_search_input`].
    async fn search(
        &self,
        query: &str,
        search_type: SearchType,
        limit: u32,
        offset: u32,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Fetch a single result by provider-internal identifier. Optional;
    /// adapters without a detail endpoint return [`ProviderError::NotSupported`].
    async fn hydrate(&self, provider_id: &str) -> Result<SearchResult, ProviderError>;
}

/// Validate and trim search inputs shared by every provider.
/// I'm centralizing input validation so every provider enforces the same bounds.
///
/// Returns the trimmed query on success.
pub fn validate_search_input(
    query: &str,
    limit: u32,
    offset: i64,
) -> Result<String, AppError> {
    let trimmed = query.trim();
    let trimmed_chars = trimmed.chars().count();

    if trimmed_chars < QUERY_MIN_LEN {
        return Err(AppError::validation(format!(
            "query must be at least {} characters after trimming",
            QUERY_MIN_LEN
        )));
    }
    if trimmed_chars > QUERY_MAX_LEN {
        return Err(AppError::validation(format!(
            "query must be at most {} characters",
            QUERY_MAX_LEN
        )));
    }
    if !(LIMIT_MIN..=LIMIT_MAX).contains(&limit) {
        return Err(AppError::validation(format!(
            "limit must be between {} and {}",
            LIMIT_MIN, LIMIT_MAX
        )));
    }
    if offset < 0 {
        return Err(AppError::validation("offset must be non-negative"));
    }

    Ok(trimmed.to_string())
}

/// Map an HTTP status from a provider into the error classification.
pub(crate) fn classify_status(status: u16, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimit(body),
        s if (500..600).contains(&s) => ProviderError::ServerError {
            status: s,
            message: body,
        },
        s => ProviderError::BadRequest {
            status: s,
            message: body,
        },
    }
}

/// Map a reqwest transport failure into the error classification.
pub(crate) fn classify_transport(err: reqwest::Error, deadline_ms: u64) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(deadline_ms)
    } else if err.is_decode() {
        ProviderError::ParseError(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a", 20, 0, false)] // length 1
    #[case("ab", 20, 0, true)]
    #[case("  ok  ", 20, 0, true)] // trims to "ok"
    #[case("1984 Orwell", 0, 0, false)] // limit below minimum
    #[case("1984 Orwell", 41, 0, false)] // limit above maximum
    #[case("1984 Orwell", 40, 0, true)]
    #[case("1984 Orwell", 20, -1, false)]
    fn test_validate_search_input(
        #[case] query: &str,
        #[case] limit: u32,
        #[case] offset: i64,
        #[case] ok: bool,
    ) {
        assert_eq!(validate_search_input(query, limit, offset).is_ok(), ok);
    }

    #[test]
    fn test_query_length_boundaries() {
        let max = "x".repeat(QUERY_MAX_LEN);
        assert!(validate_search_input(&max, 20, 0).is_ok());

        let over = "x".repeat(QUERY_MAX_LEN + 1);
        assert!(validate_search_input(&over, 20, 0).is_err());
    }

    #[test]
    fn test_breaker_failure_classification() {
        assert!(ProviderError::Timeout(2_500).counts_as_breaker_failure());
        assert!(ProviderError::RateLimit("quota".into()).counts_as_breaker_failure());
        assert!(ProviderError::ParseError("bad json".into()).counts_as_breaker_failure());
        assert!(!ProviderError::BadRequest {
            status: 400,
            message: "bad".into()
        }
        .counts_as_breaker_failure());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::ServerError {
            status: 503,
            message: "down".into()
        }
        .is_transient());
        assert!(ProviderError::Network("refused".into()).is_transient());
        // Parse errors count against the breaker but never trigger fallback.
        assert!(!ProviderError::ParseError("bad json".into()).is_transient());
        assert!(!ProviderError::BadRequest {
            status: 404,
            message: "no".into()
        }
        .is_transient());
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(classify_status(429, String::new()), ProviderError::RateLimit(_)));
        assert!(matches!(
            classify_status(502, String::new()),
            ProviderError::ServerError { status: 502, .. }
        ));
        assert!(matches!(
            classify_status(404, String::new()),
            ProviderError::BadRequest { status: 404, .. }
        ));
    }

    #[test]
    fn test_settings_debug_redacts_api_key() {
        let settings = ProviderSettings {
            base_url: "https://example.test".to_string(),
            api_key: Some("super-secret".to_string()),
            timeout_ms: 2_500,
            user_agent: "shelfmark/test".to_string(),
        };
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("redacted"));
    }
}
