/*
 * Transactional ingestion: materialize a chosen search result into a canonical
 * book, an edition, a provenance record, a reading entry, and optional
 * per-field overrides.
 * I'm implementing the whole materialization inside one transaction so any
 * failure rolls it back and no partial records remain.
 *
 * Ingestion never retries on its own. The single exception is the unique-ISBN
 * race on edition insert, which re-reads exactly once under a savepoint.
 */

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::Acquire;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::connection::DatabasePool;
use crate::database::repositories::{self, is_unique_violation, ReadingEntryInsert};
use crate::models::book::{
    Book, BookEdition, BookMetadataSource, MetadataProvider, OverrideField, ReadingEntryOverride,
};
use crate::models::ingestion::{DuplicateMatch, IngestionOutcome, IngestionRequest, MatchType};
use crate::models::search::SearchResult;
use crate::providers::normalizer;
use crate::services::duplicate_detector::{DuplicateCandidate, DuplicateDetector};
use crate::utils::error::{AppError, Result};
use crate::utils::isbn;
use crate::utils::metrics::MetricsCollector;

const TITLE_MAX_LEN: usize = 500;
const AUTHOR_MAX_LEN: usize = 200;

#[derive(Debug, Clone)]
pub struct IngestionService {
    pool: DatabasePool,
    detector: DuplicateDetector,
    metrics: MetricsCollector,
}

impl IngestionService {
    pub fn new(pool: DatabasePool, detector: DuplicateDetector, metrics: MetricsCollector) -> Self {
        Self {
            pool,
            detector,
            metrics,
        }
    }

    /// Add a book to a reader's shelf from a chosen search result.
    /// I'm running the duplicate check before any write so the common case
    /// stays idempotent.
    ///
    /// Without `force`, a detected duplicate short-circuits before any write.
    /// With `force`, the duplicate's canonical book is linked instead of a new
    /// one being created; editions and provenance still deduplicate naturally.
    pub async fn add_from_search_result(&self, request: IngestionRequest) -> Result<IngestionOutcome> {
        let overrides = validate_overrides(request.overrides.as_ref())?;
        let isbn10 = sanitize_isbn10(request.search_result.isbn10.as_deref())?;
        let isbn13 = sanitize_isbn13(request.search_result.isbn13.as_deref())?;

        // Duplicate check happens before the transaction; it only reads.
        let candidate = DuplicateCandidate::from_search_result(&request.search_result);
        let duplicate = self.detector.find_match(&candidate).await?;

        if duplicate.is_match() && !request.force {
            self.metrics
                .record_ingestion_duplicate(duplicate.match_type.as_str());
            debug!(
                match_type = duplicate.match_type.as_str(),
                confidence = duplicate.confidence,
                "ingestion blocked by duplicate"
            );
            return Ok(IngestionOutcome::duplicate(duplicate));
        }

        let mut tx = self.pool.begin().await?;

        // Resolve the canonical book: link the forced duplicate or create new.
        let book = match (duplicate.existing_book.as_ref(), request.force) {
            (Some(existing), true) => existing.clone(),
            _ => {
                let book = build_book(&request.search_result)?;
                repositories::insert_book(&mut tx, &book).await?;
                book
            }
        };

        let edition = self
            .resolve_edition(&mut tx, &book, &request.search_result, isbn10, isbn13)
            .await?;

        let source = build_metadata_source(&request.search_result, edition.id)?;
        repositories::insert_metadata_source(&mut tx, &source).await?;

        let entry = match repositories::insert_reading_entry(
            &mut tx,
            request.reader_id,
            book.id,
            edition.id,
            request.status,
        )
        .await?
        {
            ReadingEntryInsert::Created(entry) => entry,
            ReadingEntryInsert::DuplicateActiveEntry => {
                // The reading-entry collaborator's reader+book invariant won;
                // nothing from this attempt survives.
                tx.rollback().await?;
                self.metrics
                    .record_ingestion_duplicate(MatchType::ReaderEntry.as_str());
                return Ok(IngestionOutcome::duplicate(DuplicateMatch {
                    match_type: MatchType::ReaderEntry,
                    confidence: 1.0,
                    existing_book: Some(book),
                }));
            }
        };

        let now = Utc::now();
        for (field_name, override_value) in overrides {
            repositories::insert_override(
                &mut tx,
                &ReadingEntryOverride {
                    id: Uuid::new_v4(),
                    reading_entry_id: entry.id,
                    field_name,
                    override_value,
                    created_at: now,
                    updated_at: now,
                },
            )
            .await?;
        }

        tx.commit().await?;
        self.metrics.record_ingestion_created();
        info!(
            book_id = %book.id,
            edition_id = %edition.id,
            reader_id = %request.reader_id,
            "ingested book from search result"
        );

        Ok(IngestionOutcome::created(book, edition, entry))
    }

    /// Reuse an existing edition of this book by ISBN, or insert a new one
    /// I'm absorbing a concurrent unique-ISBN insert with one savepoint-guarded
    /// re-read, never a retry loop
    async fn resolve_edition(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        book: &Book,
        result: &SearchResult,
        isbn10: Option<String>,
        isbn13: Option<String>,
    ) -> Result<BookEdition> {
        if isbn10.is_some() || isbn13.is_some() {
            if let Some(existing) =
                repositories::find_edition_in_tx(tx, book.id, isbn13.as_deref(), isbn10.as_deref())
                    .await?
            {
                return Ok(existing);
            }
        }

        let edition = build_edition(book.id, result, isbn10.clone(), isbn13.clone())?;

        {
            let mut savepoint = tx.begin().await?;
            match repositories::insert_edition(&mut savepoint, &edition).await {
                Ok(()) => {
                    savepoint.commit().await?;
                    return Ok(edition);
                }
                Err(e) if is_unique_violation(&e) => {
                    savepoint.rollback().await?;
                    debug!(book_id = %book.id, "edition insert lost a unique-ISBN race; re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Exactly one re-read after the race.
        repositories::find_edition_in_tx(tx, book.id, isbn13.as_deref(), isbn10.as_deref())
            .await?
            .ok_or_else(|| {
                AppError::StorageError(
                    "edition ISBN already belongs to a different book".to_string(),
                )
            })
    }
}

/// Validate override field names against the allowed set
/// I'm enforcing type compatibility here for the typed fields since the
/// database column is a plain string
fn validate_overrides(
    overrides: Option<&HashMap<String, String>>,
) -> Result<Vec<(OverrideField, String)>> {
    let Some(overrides) = overrides else {
        return Ok(Vec::new());
    };

    let mut validated = Vec::with_capacity(overrides.len());
    for (raw_field, value) in overrides {
        let field = OverrideField::from_str(raw_field)
            .map_err(|_| AppError::validation(format!("unknown override field: {}", raw_field)))?;

        match field {
            OverrideField::PageCount => {
                let pages: i64 = value.parse().map_err(|_| {
                    AppError::validation("pageCount override must be an integer")
                })?;
                if pages <= 0 {
                    return Err(AppError::validation("pageCount override must be positive"));
                }
            }
            OverrideField::PublicationDate => {
                if normalizer::parse_publication_date(value).is_none() {
                    return Err(AppError::validation(
                        "publicationDate override must be a date (YYYY, YYYY-MM, or YYYY-MM-DD)",
                    ));
                }
            }
            _ => {
                if value.trim().is_empty() {
                    return Err(AppError::validation(format!(
                        "override value for {} must not be empty",
                        field
                    )));
                }
            }
        }

        validated.push((field, value.clone()));
    }

    // Deterministic insert order.
    validated.sort_by_key(|(field, _)| field.as_str());
    Ok(validated)
}

/// Shape errors are validation failures; a checksum failure downgrades the
/// ISBN to absent.
fn sanitize_isbn10(raw: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let stripped = isbn::strip_separators(raw);
    if !isbn::is_isbn10_shape(&stripped) {
        return Err(AppError::validation(format!("malformed ISBN-10: {}", raw)));
    }
    Ok(isbn::normalize_isbn10(&stripped))
}

fn sanitize_isbn13(raw: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let stripped = isbn::strip_separators(raw);
    if !isbn::is_isbn13_shape(&stripped) {
        return Err(AppError::validation(format!("malformed ISBN-13: {}", raw)));
    }
    Ok(isbn::normalize_isbn13(&stripped))
}

/// Build a new canonical book with its computed fields
/// I'm computing normalized title, primary author, and fingerprint at
/// construction so the write invariant holds by design
fn build_book(result: &SearchResult) -> Result<Book> {
    let title = result.title.trim().to_string();
    if title.is_empty() || title.chars().count() > TITLE_MAX_LEN {
        return Err(AppError::validation(format!(
            "title must be 1-{} characters",
            TITLE_MAX_LEN
        )));
    }

    let author = result.authors.join(", ").trim().to_string();
    if author.is_empty() || author.chars().count() > AUTHOR_MAX_LEN {
        return Err(AppError::validation(format!(
            "author must be 1-{} characters",
            AUTHOR_MAX_LEN
        )));
    }

    let normalized_title = normalizer::normalized_title(&title);
    let primary_author = normalizer::primary_author(&result.authors);
    let fingerprint = normalizer::fingerprint(&normalized_title, &primary_author, result.year());

    let now = Utc::now();
    Ok(Book {
        id: Uuid::new_v4(),
        title,
        author,
        normalized_title,
        primary_author,
        subtitle: result.subtitle.clone(),
        language: result.language.clone(),
        publisher: result.publisher.clone(),
        publication_date: result.publication_date,
        page_count: result.page_count.filter(|&n| n > 0),
        description: result.description.clone(),
        categories: result.categories.clone(),
        fingerprint,
        created_at: now,
        updated_at: now,
    })
}

fn build_edition(
    book_id: Uuid,
    result: &SearchResult,
    isbn10: Option<String>,
    isbn13: Option<String>,
) -> Result<BookEdition> {
    let provider_id = Some(result.provider_id.clone()).filter(|id| !id.trim().is_empty());

    let now = Utc::now();
    let edition = BookEdition {
        id: Uuid::new_v4(),
        book_id,
        isbn10,
        isbn13,
        edition: None,
        format: None,
        cover_image_url: result.cover_image_url.clone(),
        provider_id,
        created_at: now,
        updated_at: now,
    };

    if !edition.has_identity() {
        return Err(AppError::validation(
            "edition needs at least one of isbn10, isbn13, or a provider id",
        ));
    }

    Ok(edition)
}

/// Provenance row for this materialization
/// I'm hashing the submitted search result JSON as the payload of record at
/// this boundary
fn build_metadata_source(result: &SearchResult, edition_id: Uuid) -> Result<BookMetadataSource> {
    let raw_payload = serde_json::to_value(result)?;
    let mut hasher = Sha256::new();
    hasher.update(raw_payload.to_string().as_bytes());
    let payload_hash = hex::encode(hasher.finalize());

    let provider = MetadataProvider::from_str(&result.provider).unwrap_or(MetadataProvider::Manual);

    let now = Utc::now();
    Ok(BookMetadataSource {
        id: Uuid::new_v4(),
        book_edition_id: edition_id,
        provider,
        provider_request_id: None,
        fetched_at: now,
        etag: None,
        payload_hash,
        raw_payload,
        created_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_result() -> SearchResult {
        SearchResult {
            provider_id: "vol-1".to_string(),
            provider: "primary".to_string(),
            title: "  1984 ".to_string(),
            authors: vec!["George Orwell".to_string()],
            subtitle: None,
            isbn10: Some("0451524934".to_string()),
            isbn13: Some("9780451524935".to_string()),
            publisher: Some("Signet".to_string()),
            publication_date: NaiveDate::from_ymd_opt(1949, 6, 8),
            page_count: Some(328),
            language: Some("en".to_string()),
            categories: vec!["Fiction".to_string()],
            cover_image_url: None,
            description: None,
        }
    }

    #[test]
    fn test_build_book_computes_derived_fields() {
        let book = build_book(&sample_result()).unwrap();

        assert_eq!(book.title, "1984");
        assert_eq!(book.normalized_title, normalizer::normalized_title(&book.title));
        assert_eq!(book.primary_author, "George Orwell");
        assert_eq!(
            book.fingerprint,
            normalizer::fingerprint(&book.normalized_title, &book.primary_author, Some(1949))
        );
    }

    #[test]
    fn test_build_book_rejects_missing_author() {
        let mut result = sample_result();
        result.authors = vec![];
        assert!(matches!(
            build_book(&result),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_build_book_rejects_over_long_title() {
        let mut result = sample_result();
        result.title = "x".repeat(TITLE_MAX_LEN + 1);
        assert!(matches!(
            build_book(&result),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_overrides_rejects_unknown_field() {
        let mut overrides = HashMap::new();
        overrides.insert("isbn13".to_string(), "9780451524935".to_string());

        assert!(matches!(
            validate_overrides(Some(&overrides)),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_overrides_type_compatibility() {
        let mut overrides = HashMap::new();
        overrides.insert("pageCount".to_string(), "lots".to_string());
        assert!(validate_overrides(Some(&overrides)).is_err());

        overrides.insert("pageCount".to_string(), "412".to_string());
        overrides.insert("publicationDate".to_string(), "1949-06".to_string());
        overrides.insert("title".to_string(), "Nineteen Eighty-Four".to_string());
        let validated = validate_overrides(Some(&overrides)).unwrap();
        assert_eq!(validated.len(), 3);
    }

    #[test]
    fn test_sanitize_isbn_shape_vs_checksum() {
        // Wrong shape is a validation error.
        assert!(sanitize_isbn13(Some("12345")).is_err());
        assert!(sanitize_isbn10(Some("not-an-isbn")).is_err());

        // Valid shape with a failing checksum is treated as absent.
        assert_eq!(sanitize_isbn10(Some("0451524935")).unwrap(), None);
        assert_eq!(sanitize_isbn13(Some("9780451524936")).unwrap(), None);

        // Separators are tolerated.
        assert_eq!(
            sanitize_isbn13(Some("978-0-451-52493-5")).unwrap().as_deref(),
            Some("9780451524935")
        );
    }

    #[test]
    fn test_build_edition_requires_identity() {
        let mut result = sample_result();
        result.provider_id = "  ".to_string();

        let err = build_edition(Uuid::new_v4(), &result, None, None);
        assert!(matches!(err, Err(AppError::ValidationError(_))));

        let ok = build_edition(Uuid::new_v4(), &result, None, Some("9780451524935".to_string()));
        assert!(ok.unwrap().has_identity());
    }

    #[tokio::test]
    #[ignore] // Requires a Postgres instance with the schema migrated
    async fn test_repeat_ingestion_reports_isbn13_duplicate() {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/shelfmark_test".to_string());
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await
            .expect("test database required");

        let detector = DuplicateDetector::new(
            crate::database::BookRepository::new(pool.clone()),
            false,
        );
        let service = IngestionService::new(pool, detector, MetricsCollector::new());

        // Fresh valid ISBN-13 per run so the test is rerunnable.
        let mut digits: Vec<u32> = format!("978{:09}", Uuid::new_v4().as_u128() % 1_000_000_000)
            .chars()
            .filter_map(|c| c.to_digit(10))
            .collect();
        let sum: u32 = digits
            .iter()
            .enumerate()
            .map(|(i, d)| if i % 2 == 0 { *d } else { *d * 3 })
            .sum();
        digits.push((10 - (sum % 10)) % 10);
        let isbn13: String = digits.iter().map(|d| d.to_string()).collect();

        let mut result = sample_result();
        result.title = format!("1984 ({})", &isbn13[3..9]);
        result.isbn10 = None;
        result.isbn13 = Some(isbn13);

        let reader_id = Uuid::new_v4();
        let request = IngestionRequest {
            reader_id,
            search_result: result,
            status: crate::models::book::ReadingStatus::ToRead,
            overrides: None,
            force: false,
        };

        let first = service
            .add_from_search_result(request.clone())
            .await
            .unwrap();
        assert!(!first.is_duplicate());
        let created_book = first.book.unwrap();

        // Same result, same reader: the second call reports the duplicate and
        // writes nothing.
        let second = service.add_from_search_result(request).await.unwrap();
        let duplicate = second.duplicate.expect("expected duplicate outcome");
        assert_eq!(duplicate.match_type, MatchType::Isbn13);
        assert_eq!(duplicate.confidence, 1.0);
        assert_eq!(duplicate.existing_book.unwrap().id, created_book.id);
    }

    #[test]
    fn test_metadata_source_hashes_payload() {
        let result = sample_result();
        let source = build_metadata_source(&result, Uuid::new_v4()).unwrap();

        assert_eq!(source.provider, MetadataProvider::Primary);
        assert_eq!(source.payload_hash.len(), 64);

        // Same payload, same hash.
        let again = build_metadata_source(&result, Uuid::new_v4()).unwrap();
        assert_eq!(source.payload_hash, again.payload_hash);
    }
}
