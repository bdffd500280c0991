/*
 * ©AngelaMos | 2025
 */

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::{
    models::book::ReadingStatus,
    models::ingestion::{IngestionOutcome, IngestionRequest},
    models::search::{ProviderChoice, SearchResponse, SearchResult, SearchType},
    services::search_service::SearchParams,
    utils::error::{AppError, Result},
    AppState,
};

/// Header carrying the authenticated reader's identity
/// I'm keeping authentication upstream; the core only receives the opaque
/// reader id as an explicit argument
const READER_ID_HEADER: &str = "x-reader-id";

#[derive(Debug, Deserialize)]
pub struct SearchQueryParams {
    pub q: String,
    #[serde(rename = "type")]
    pub search_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<i64>,
    pub provider: Option<String>,
}

/// GET /books/search
/// I'm providing the public search endpoint with comprehensive parameter
/// validation and cache/degradation visibility in the response
pub async fn search_books(
    State(app_state): State<AppState>,
    Query(params): Query<SearchQueryParams>,
) -> Result<Json<SearchResponse>> {
    let search_type = parse_or_default::<SearchType>(params.search_type.as_deref(), "type")?;
    let provider_preference =
        parse_or_default::<ProviderChoice>(params.provider.as_deref(), "provider")?;

    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(AppError::validation("offset must be non-negative"));
    }

    let response = app_state
        .search
        .search(SearchParams {
            query: params.q,
            search_type,
            limit: params.limit.unwrap_or(20),
            offset: offset as u32,
            provider_preference,
            deadline: None,
        })
        .await?;

    info!(
        cache_hit = response.cache_hit.as_str(),
        provider = %response.provider_used,
        degraded = response.degraded,
        latency_ms = response.latency_ms,
        "search completed"
    );

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFromSearchBody {
    pub search_result: SearchResult,
    pub status: String,
    #[serde(default)]
    pub overrides: Option<HashMap<String, String>>,
    #[serde(default)]
    pub force: bool,
}

/// POST /books/from-search
/// I'm mapping a detected duplicate onto 409 and a creation onto 200
pub async fn add_from_search(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AddFromSearchBody>,
) -> Result<Response> {
    let reader_id = reader_id_from_headers(&headers)?;

    let status = ReadingStatus::from_str(&body.status)
        .map_err(|e| AppError::validation(e))?;

    let outcome = app_state
        .ingestion
        .add_from_search_result(IngestionRequest {
            reader_id,
            search_result: body.search_result,
            status,
            overrides: body.overrides,
            force: body.force,
        })
        .await?;

    Ok(ingestion_response(outcome))
}

/// GET /books/hydrate/:provider/:id
/// I'm exposing provider detail refresh without bypassing the breaker layer
pub async fn hydrate_result(
    State(app_state): State<AppState>,
    Path((provider, provider_id)): Path<(String, String)>,
) -> Result<Json<SearchResult>> {
    let result = app_state.search.hydrate(&provider, &provider_id).await?;
    Ok(Json(result))
}

fn ingestion_response(outcome: IngestionOutcome) -> Response {
    if outcome.is_duplicate() {
        (StatusCode::CONFLICT, Json(outcome)).into_response()
    } else {
        (StatusCode::OK, Json(outcome)).into_response()
    }
}

fn reader_id_from_headers(headers: &HeaderMap) -> Result<Uuid> {
    let raw = headers
        .get(READER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::validation("missing reader identity header"))?;

    Uuid::parse_str(raw).map_err(|_| AppError::validation("reader identity must be a UUID"))
}

fn parse_or_default<T>(raw: Option<&str>, field: &str) -> Result<T>
where
    T: FromStr<Err = String> + Default,
{
    match raw {
        None => Ok(T::default()),
        Some(raw) => raw
            .parse()
            .map_err(|e: String| AppError::validation(format!("invalid {}: {}", field, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_reader_id_header_parsing() {
        let mut headers = HeaderMap::new();
        assert!(reader_id_from_headers(&headers).is_err());

        headers.insert(READER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(reader_id_from_headers(&headers).is_err());

        let id = Uuid::new_v4();
        headers.insert(
            READER_ID_HEADER,
            HeaderValue::from_str(&id.to_string()).unwrap(),
        );
        assert_eq!(reader_id_from_headers(&headers).unwrap(), id);
    }

    #[test]
    fn test_parse_or_default_query_enums() {
        let parsed: SearchType = parse_or_default(Some("isbn"), "type").unwrap();
        assert_eq!(parsed, SearchType::Isbn);

        let defaulted: ProviderChoice = parse_or_default(None, "provider").unwrap();
        assert_eq!(defaulted, ProviderChoice::Auto);

        let err = parse_or_default::<SearchType>(Some("fulltext"), "type");
        assert!(err.is_err());
    }

    #[test]
    fn test_add_body_accepts_upper_case_status() {
        let body: AddFromSearchBody = serde_json::from_value(serde_json::json!({
            "searchResult": {
                "providerId": "vol-1",
                "provider": "primary",
                "title": "1984"
            },
            "status": "TO_READ"
        }))
        .unwrap();

        assert!(ReadingStatus::from_str(&body.status).is_ok());
        assert!(!body.force);
        assert!(body.overrides.is_none());
    }
}
