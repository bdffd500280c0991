/*
 * Canonical book data model: works, editions, provenance records, reading entries,
 * and per-reader field overrides.
 * I'm defining robust data structures with comprehensive serialization support and
 * the invariants that keep the shared catalog clean.
 *
 * A Book row represents a work shared across all readers and is immutable in its
 * user-visible fields after creation; per-reader edits live exclusively in
 * ReadingEntryOverride rows.
 */

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical book (a work, not an edition). Shared across all readers.
/// I'm including the computed duplicate-detection fields alongside the
/// presentation fields so both are written in one place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    /// Lowercased, punctuation-stripped title. Always consistent with `title`.
    pub normalized_title: String,
    /// First author before `,` or `;`, trimmed. Always consistent with `author`.
    pub primary_author: String,
    pub subtitle: Option<String>,
    pub language: Option<String>,
    pub publisher: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub page_count: Option<i32>,
    pub description: Option<String>,
    pub categories: Vec<String>,
    /// SHA-256 hex of `normalized_title || "||" || primary_author || "||" || year`.
    /// Indexed but not unique: distinct works can collide in rare cases.
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// Publication year, if known.
    pub fn year(&self) -> Option<i32> {
        self.publication_date.map(|d| d.year())
    }
}

/// Edition-specific identity of a canonical book: ISBNs, format, cover.
///
/// Invariant: at least one of `isbn10`, `isbn13`, `provider_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookEdition {
    pub id: Uuid,
    pub book_id: Uuid,
    pub isbn10: Option<String>,
    pub isbn13: Option<String>,
    pub edition: Option<String>,
    pub format: Option<EditionFormat>,
    pub cover_image_url: Option<String>,
    /// Opaque identifier from a provider; not unique across providers.
    pub provider_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookEdition {
    /// Edition identity invariant check
    /// I'm providing the check both for validation and for tests
    pub fn has_identity(&self) -> bool {
        self.isbn10.is_some() || self.isbn13.is_some() || self.provider_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditionFormat {
    Hardcover,
    Paperback,
    Ebook,
    Audiobook,
    AudioCd,
}

impl EditionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditionFormat::Hardcover => "hardcover",
            EditionFormat::Paperback => "paperback",
            EditionFormat::Ebook => "ebook",
            EditionFormat::Audiobook => "audiobook",
            EditionFormat::AudioCd => "audio_cd",
        }
    }
}

impl FromStr for EditionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hardcover" => Ok(EditionFormat::Hardcover),
            "paperback" => Ok(EditionFormat::Paperback),
            "ebook" => Ok(EditionFormat::Ebook),
            "audiobook" => Ok(EditionFormat::Audiobook),
            "audio_cd" => Ok(EditionFormat::AudioCd),
            other => Err(format!("unknown edition format: {}", other)),
        }
    }
}

/// Provenance record for a single fetch of a single edition from a single provider.
/// Rows older than 90 days are purged by the retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookMetadataSource {
    pub id: Uuid,
    pub book_edition_id: Uuid,
    pub provider: MetadataProvider,
    pub provider_request_id: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub etag: Option<String>,
    /// SHA-256 hex of the raw payload.
    pub payload_hash: String,
    pub raw_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataProvider {
    Primary,
    Secondary,
    Manual,
}

impl MetadataProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataProvider::Primary => "primary",
            MetadataProvider::Secondary => "secondary",
            MetadataProvider::Manual => "manual",
        }
    }
}

impl FromStr for MetadataProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(MetadataProvider::Primary),
            "secondary" => Ok(MetadataProvider::Secondary),
            "manual" => Ok(MetadataProvider::Manual),
            other => Err(format!("unknown metadata provider: {}", other)),
        }
    }
}

/// One reader's tracked relationship with a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingEntry {
    pub id: Uuid,
    pub reader_id: Uuid,
    pub book_id: Uuid,
    pub book_edition_id: Uuid,
    pub status: ReadingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    ToRead,
    Reading,
    Finished,
    Abandoned,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::ToRead => "to_read",
            ReadingStatus::Reading => "reading",
            ReadingStatus::Finished => "finished",
            ReadingStatus::Abandoned => "abandoned",
        }
    }
}

impl FromStr for ReadingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "to_read" | "toread" => Ok(ReadingStatus::ToRead),
            "reading" => Ok(ReadingStatus::Reading),
            "finished" | "read" => Ok(ReadingStatus::Finished),
            "abandoned" => Ok(ReadingStatus::Abandoned),
            other => Err(format!("unknown reading status: {}", other)),
        }
    }
}

/// Per-reader, per-field override of the canonical presentation for one reading entry.
/// Unique per (reading_entry_id, field_name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingEntryOverride {
    pub id: Uuid,
    pub reading_entry_id: Uuid,
    pub field_name: OverrideField,
    pub override_value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The set of canonical fields a reader may override on their own entry.
/// I'm keeping this closed so arbitrary field names never reach the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverrideField {
    #[serde(rename = "title")]
    Title,
    #[serde(rename = "author")]
    Author,
    #[serde(rename = "subtitle")]
    Subtitle,
    #[serde(rename = "pageCount")]
    PageCount,
    #[serde(rename = "publisher")]
    Publisher,
    #[serde(rename = "publicationDate")]
    PublicationDate,
    #[serde(rename = "description")]
    Description,
    #[serde(rename = "language")]
    Language,
    #[serde(rename = "edition")]
    Edition,
}

impl OverrideField {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideField::Title => "title",
            OverrideField::Author => "author",
            OverrideField::Subtitle => "subtitle",
            OverrideField::PageCount => "pageCount",
            OverrideField::Publisher => "publisher",
            OverrideField::PublicationDate => "publicationDate",
            OverrideField::Description => "description",
            OverrideField::Language => "language",
            OverrideField::Edition => "edition",
        }
    }

    pub const ALL: [OverrideField; 9] = [
        OverrideField::Title,
        OverrideField::Author,
        OverrideField::Subtitle,
        OverrideField::PageCount,
        OverrideField::Publisher,
        OverrideField::PublicationDate,
        OverrideField::Description,
        OverrideField::Language,
        OverrideField::Edition,
    ];
}

impl FromStr for OverrideField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OverrideField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown override field: {}", s))
    }
}

impl fmt::Display for OverrideField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edition_identity_invariant() {
        let edition = BookEdition {
            id: Uuid::new_v4(),
            book_id: Uuid::new_v4(),
            isbn10: None,
            isbn13: None,
            edition: None,
            format: None,
            cover_image_url: None,
            provider_id: Some("vol-123".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(edition.has_identity());

        let bare = BookEdition {
            provider_id: None,
            ..edition
        };
        assert!(!bare.has_identity());
    }

    #[test]
    fn test_override_field_round_trip() {
        for field in OverrideField::ALL {
            assert_eq!(field.as_str().parse::<OverrideField>().unwrap(), field);
        }
        assert!("isbn13".parse::<OverrideField>().is_err());
        assert!("pagecount".parse::<OverrideField>().is_err());
    }

    #[test]
    fn test_reading_status_parses_upper_case() {
        assert_eq!("TO_READ".parse::<ReadingStatus>().unwrap(), ReadingStatus::ToRead);
        assert_eq!("Reading".parse::<ReadingStatus>().unwrap(), ReadingStatus::Reading);
        assert!("paused".parse::<ReadingStatus>().is_err());
    }

    #[test]
    fn test_book_year() {
        let book = Book {
            id: Uuid::new_v4(),
            title: "1984".to_string(),
            author: "George Orwell".to_string(),
            normalized_title: "1984".to_string(),
            primary_author: "George Orwell".to_string(),
            subtitle: None,
            language: Some("en".to_string()),
            publisher: None,
            publication_date: NaiveDate::from_ymd_opt(1949, 6, 8),
            page_count: Some(328),
            description: None,
            categories: vec![],
            fingerprint: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(book.year(), Some(1949));
    }
}
