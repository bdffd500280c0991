/*
 * Ingestion DTOs: the request that materializes a chosen search result into
 * canonical data, and the outcome reported back to the HTTP edge.
 * I'm modeling duplicates as a signaling outcome rather than an error so the
 * edge can map them to 409 without exception plumbing.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::book::{Book, BookEdition, ReadingEntry, ReadingStatus};
use crate::models::search::SearchResult;

/// Request to add a book to a reader's shelf from a chosen search result.
///
/// This object form is the only supported call shape for ingestion.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRequest {
    pub reader_id: Uuid,
    pub search_result: SearchResult,
    pub status: ReadingStatus,
    /// Per-field overrides applied to the reader's entry, keyed by field name.
    #[serde(default)]
    pub overrides: Option<HashMap<String, String>>,
    /// When set, a detected duplicate is linked instead of reported.
    #[serde(default)]
    pub force: bool,
}

/// How a duplicate candidate matched an existing canonical book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    #[serde(rename = "isbn13")]
    Isbn13,
    #[serde(rename = "isbn10")]
    Isbn10,
    #[serde(rename = "isbn10→13")]
    Isbn10To13,
    #[serde(rename = "fingerprint")]
    Fingerprint,
    #[serde(rename = "fuzzy")]
    Fuzzy,
    #[serde(rename = "readerEntry")]
    ReaderEntry,
    #[serde(rename = "none")]
    None,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Isbn13 => "isbn13",
            MatchType::Isbn10 => "isbn10",
            MatchType::Isbn10To13 => "isbn10→13",
            MatchType::Fingerprint => "fingerprint",
            MatchType::Fuzzy => "fuzzy",
            MatchType::ReaderEntry => "readerEntry",
            MatchType::None => "none",
        }
    }
}

/// Result of the duplicate detector for one candidate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateMatch {
    pub match_type: MatchType,
    /// Confidence in [0, 1]. Exact identifier matches are 1.0; fingerprint 0.95;
    /// fuzzy matches carry their similarity score.
    pub confidence: f64,
    pub existing_book: Option<Book>,
}

impl DuplicateMatch {
    pub fn none() -> Self {
        Self {
            match_type: MatchType::None,
            confidence: 0.0,
            existing_book: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.match_type != MatchType::None
    }
}

/// Outcome of an ingestion call: either the created records, or the duplicate
/// that blocked creation. A duplicate is a signaling outcome, not an error;
/// the HTTP edge maps it to 409.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book: Option<Book>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edition: Option<BookEdition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_entry: Option<ReadingEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<DuplicateMatch>,
}

impl IngestionOutcome {
    pub fn created(book: Book, edition: BookEdition, reading_entry: ReadingEntry) -> Self {
        Self {
            book: Some(book),
            edition: Some(edition),
            reading_entry: Some(reading_entry),
            duplicate: None,
        }
    }

    pub fn duplicate(duplicate: DuplicateMatch) -> Self {
        Self {
            book: None,
            edition: None,
            reading_entry: None,
            duplicate: Some(duplicate),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_type_serialization() {
        assert_eq!(serde_json::to_string(&MatchType::Isbn13).unwrap(), "\"isbn13\"");
        assert_eq!(
            serde_json::to_string(&MatchType::Isbn10To13).unwrap(),
            "\"isbn10→13\""
        );
        assert_eq!(
            serde_json::to_string(&MatchType::ReaderEntry).unwrap(),
            "\"readerEntry\""
        );
    }

    #[test]
    fn test_duplicate_outcome_omits_created_fields() {
        let outcome = IngestionOutcome::duplicate(DuplicateMatch {
            match_type: MatchType::Fuzzy,
            confidence: 0.87,
            existing_book: None,
        });

        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("book").is_none());
        assert!(json.get("readingEntry").is_none());
        assert_eq!(json["duplicate"]["matchType"], "fuzzy");
    }
}
