/*
 * Repositories over the canonical tables. Reads go through the pool; ingestion
 * writes take an explicit transaction so the whole materialization commits or
 * rolls back as one unit.
 * I'm keeping row structs at database-primitive types and converting into the
 * domain model at the edge.
 */

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgRow, FromRow, Postgres, Row, Transaction};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::database::connection::DatabasePool;
use crate::models::book::{
    Book, BookEdition, BookMetadataSource, EditionFormat, ReadingEntry, ReadingEntryOverride,
    ReadingStatus,
};
use crate::models::search::SearchResult;
use crate::utils::error::{AppError, Result};

/// True when the error is a unique-constraint violation (SQLSTATE 23505)
/// I'm extracting useful information from database errors for race handling
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505")
    )
}

#[derive(Debug, FromRow)]
struct BookRecord {
    id: Uuid,
    title: String,
    author: String,
    normalized_title: String,
    primary_author: String,
    subtitle: Option<String>,
    language: Option<String>,
    publisher: Option<String>,
    publication_date: Option<NaiveDate>,
    page_count: Option<i32>,
    description: Option<String>,
    categories: Vec<String>,
    fingerprint: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookRecord {
    fn into_book(self) -> Book {
        Book {
            id: self.id,
            title: self.title,
            author: self.author,
            normalized_title: self.normalized_title,
            primary_author: self.primary_author,
            subtitle: self.subtitle,
            language: self.language,
            publisher: self.publisher,
            publication_date: self.publication_date,
            page_count: self.page_count,
            description: self.description,
            categories: self.categories,
            fingerprint: self.fingerprint.trim().to_string(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const BOOK_COLUMNS: &str = "id, title, author, normalized_title, primary_author, subtitle, \
     language, publisher, publication_date, page_count, description, categories, fingerprint, \
     created_at, updated_at";

#[derive(Debug, FromRow)]
struct EditionRecord {
    id: Uuid,
    book_id: Uuid,
    isbn10: Option<String>,
    isbn13: Option<String>,
    edition: Option<String>,
    format: Option<String>,
    cover_image_url: Option<String>,
    provider_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EditionRecord {
    fn into_edition(self) -> BookEdition {
        BookEdition {
            id: self.id,
            book_id: self.book_id,
            isbn10: self.isbn10,
            isbn13: self.isbn13,
            edition: self.edition,
            format: self.format.and_then(|f| EditionFormat::from_str(&f).ok()),
            cover_image_url: self.cover_image_url,
            provider_id: self.provider_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const EDITION_COLUMNS: &str = "id, book_id, isbn10, isbn13, edition, format, cover_image_url, \
     provider_id, created_at, updated_at";

/// A fuzzy duplicate candidate together with its similarity scores.
#[derive(Debug, Clone)]
pub struct FuzzyCandidate {
    pub book: Book,
    pub title_similarity: f64,
    pub author_similarity: f64,
}

impl FuzzyCandidate {
    pub fn score(&self) -> f64 {
        (self.title_similarity + self.author_similarity) / 2.0
    }
}

/// Read-side repository over books and editions, used by the duplicate detector.
/// I'm keeping all detector lookups here so matching stays one round trip each.
#[derive(Debug, Clone)]
pub struct BookRepository {
    pool: DatabasePool,
}

impl BookRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Book owning the edition with this ISBN-13, if any.
    pub async fn find_book_by_isbn13(&self, isbn13: &str) -> Result<Option<Book>> {
        let record = sqlx::query_as::<_, BookRecord>(&format!(
            "SELECT {} FROM books b WHERE b.id = \
             (SELECT e.book_id FROM book_editions e WHERE e.isbn13 = $1)",
            book_columns_qualified()
        ))
        .bind(isbn13)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(BookRecord::into_book))
    }

    /// Book owning the edition with this ISBN-10, if any.
    pub async fn find_book_by_isbn10(&self, isbn10: &str) -> Result<Option<Book>> {
        let record = sqlx::query_as::<_, BookRecord>(&format!(
            "SELECT {} FROM books b WHERE b.id = \
             (SELECT e.book_id FROM book_editions e WHERE e.isbn10 = $1)",
            book_columns_qualified()
        ))
        .bind(isbn10)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(BookRecord::into_book))
    }

    /// Earliest-created book carrying this fingerprint.
    pub async fn find_book_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Book>> {
        let record = sqlx::query_as::<_, BookRecord>(&format!(
            "SELECT {} FROM books b WHERE b.fingerprint = $1 ORDER BY b.created_at ASC LIMIT 1",
            book_columns_qualified()
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(BookRecord::into_book))
    }

    /// Best trigram-similarity candidate with both similarities >= 0.6 and a
    /// publication year within two years (unknown years pass).
    /// I'm breaking ties on title similarity, then earlier creation, in SQL so
    /// the ordering is deterministic.
    pub async fn find_fuzzy_candidate(
        &self,
        normalized_title: &str,
        primary_author: &str,
        year: Option<i32>,
    ) -> Result<Option<FuzzyCandidate>> {
        let row = sqlx::query(&format!(
            "SELECT {}, \
                    similarity(b.normalized_title, $1)::float8 AS sim_t, \
                    similarity(b.primary_author, $2)::float8 AS sim_a \
             FROM books b \
             WHERE similarity(b.normalized_title, $1) >= 0.6 \
               AND similarity(b.primary_author, $2) >= 0.6 \
               AND ($3::int IS NULL OR b.publication_date IS NULL \
                    OR abs(EXTRACT(YEAR FROM b.publication_date)::int - $3) <= 2) \
             ORDER BY (similarity(b.normalized_title, $1) + similarity(b.primary_author, $2)) / 2 DESC, \
                      similarity(b.normalized_title, $1) DESC, \
                      b.created_at ASC \
             LIMIT 1",
            book_columns_qualified()
        ))
        .bind(normalized_title)
        .bind(primary_author)
        .bind(year)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let title_similarity: f64 = row.try_get("sim_t")?;
        let author_similarity: f64 = row.try_get("sim_a")?;
        let book = book_from_row(&row)?;

        Ok(Some(FuzzyCandidate {
            book,
            title_similarity,
            author_similarity,
        }))
    }
}

fn book_columns_qualified() -> String {
    BOOK_COLUMNS
        .split(", ")
        .map(|c| format!("b.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn book_from_row(row: &PgRow) -> Result<Book> {
    Ok(Book {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        normalized_title: row.try_get("normalized_title")?,
        primary_author: row.try_get("primary_author")?,
        subtitle: row.try_get("subtitle")?,
        language: row.try_get("language")?,
        publisher: row.try_get("publisher")?,
        publication_date: row.try_get("publication_date")?,
        page_count: row.try_get("page_count")?,
        description: row.try_get("description")?,
        categories: row.try_get("categories")?,
        fingerprint: row.try_get::<String, _>("fingerprint")?.trim().to_string(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// Transaction-scoped ingestion writes.

pub async fn insert_book(tx: &mut Transaction<'_, Postgres>, book: &Book) -> Result<()> {
    sqlx::query(
        "INSERT INTO books (id, title, author, normalized_title, primary_author, subtitle, \
         language, publisher, publication_date, page_count, description, categories, fingerprint, \
         created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(book.id)
    .bind(&book.title)
    .bind(&book.author)
    .bind(&book.normalized_title)
    .bind(&book.primary_author)
    .bind(&book.subtitle)
    .bind(&book.language)
    .bind(&book.publisher)
    .bind(book.publication_date)
    .bind(book.page_count)
    .bind(&book.description)
    .bind(&book.categories)
    .bind(&book.fingerprint)
    .bind(book.created_at)
    .bind(book.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Find an existing edition of this book by ISBN identity inside the transaction.
pub async fn find_edition_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    book_id: Uuid,
    isbn13: Option<&str>,
    isbn10: Option<&str>,
) -> Result<Option<BookEdition>> {
    let record = sqlx::query_as::<_, EditionRecord>(&format!(
        "SELECT {} FROM book_editions \
         WHERE book_id = $1 \
           AND (($2::varchar IS NOT NULL AND isbn13 = $2) \
             OR ($3::varchar IS NOT NULL AND isbn10 = $3)) \
         LIMIT 1",
        EDITION_COLUMNS
    ))
    .bind(book_id)
    .bind(isbn13)
    .bind(isbn10)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(record.map(EditionRecord::into_edition))
}

/// Insert an edition. Unique-ISBN conflicts surface as `sqlx::Error` so the
/// caller can re-read exactly once.
pub async fn insert_edition(
    tx: &mut Transaction<'_, Postgres>,
    edition: &BookEdition,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO book_editions (id, book_id, isbn10, isbn13, edition, format, \
         cover_image_url, provider_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(edition.id)
    .bind(edition.book_id)
    .bind(&edition.isbn10)
    .bind(&edition.isbn13)
    .bind(&edition.edition)
    .bind(edition.format.map(|f| f.as_str()))
    .bind(&edition.cover_image_url)
    .bind(&edition.provider_id)
    .bind(edition.created_at)
    .bind(edition.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn insert_metadata_source(
    tx: &mut Transaction<'_, Postgres>,
    source: &BookMetadataSource,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO book_metadata_sources (id, book_edition_id, provider, provider_request_id, \
         fetched_at, etag, payload_hash, raw_payload, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(source.id)
    .bind(source.book_edition_id)
    .bind(source.provider.as_str())
    .bind(&source.provider_request_id)
    .bind(source.fetched_at)
    .bind(&source.etag)
    .bind(&source.payload_hash)
    .bind(&source.raw_payload)
    .bind(source.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Typed outcome of a reading-entry insert
/// I'm letting the unique index on (reader_id, book_id) make concurrent
/// inserts deterministic: exactly one wins, the other observes the duplicate
#[derive(Debug)]
pub enum ReadingEntryInsert {
    Created(ReadingEntry),
    DuplicateActiveEntry,
}

pub async fn insert_reading_entry(
    tx: &mut Transaction<'_, Postgres>,
    reader_id: Uuid,
    book_id: Uuid,
    book_edition_id: Uuid,
    status: ReadingStatus,
) -> Result<ReadingEntryInsert> {
    let now = Utc::now();
    let entry = ReadingEntry {
        id: Uuid::new_v4(),
        reader_id,
        book_id,
        book_edition_id,
        status,
        created_at: now,
        updated_at: now,
    };

    let inserted = sqlx::query(
        "INSERT INTO reading_entries (id, reader_id, book_id, book_edition_id, status, \
         created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(entry.id)
    .bind(entry.reader_id)
    .bind(entry.book_id)
    .bind(entry.book_edition_id)
    .bind(entry.status.as_str())
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .execute(&mut **tx)
    .await;

    match inserted {
        Ok(_) => Ok(ReadingEntryInsert::Created(entry)),
        Err(e) if is_unique_violation(&e) => {
            debug!(
                reader_id = %reader_id,
                book_id = %book_id,
                "reading entry already exists for reader+book"
            );
            Ok(ReadingEntryInsert::DuplicateActiveEntry)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn insert_override(
    tx: &mut Transaction<'_, Postgres>,
    entry_override: &ReadingEntryOverride,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO reading_entry_overrides (id, reading_entry_id, field_name, override_value, \
         created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(entry_override.id)
    .bind(entry_override.reading_entry_id)
    .bind(entry_override.field_name.as_str())
    .bind(&entry_override.override_value)
    .bind(entry_override.created_at)
    .bind(entry_override.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Fresh (unexpired) cached search results for a key and provider.
#[derive(Debug, Clone)]
pub struct CachedSearchRow {
    pub provider: String,
    pub results: Vec<SearchResult>,
    pub result_count: i64,
    pub expires_at: DateTime<Utc>,
}

/// Durable (L2) search cache repository over `book_search_cache`
/// I'm implementing last-writer-wins upserts keyed on (search_key, provider)
#[derive(Debug, Clone)]
pub struct SearchCacheRepository {
    pool: DatabasePool,
}

impl SearchCacheRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Unexpired entry only; expired rows are invisible to the regular path.
    pub async fn get_fresh(
        &self,
        search_key: &str,
        provider: &str,
    ) -> Result<Option<CachedSearchRow>> {
        self.get(search_key, provider, true).await
    }

    /// Any entry, expired included. Used only for degraded fallback.
    pub async fn get_stale(
        &self,
        search_key: &str,
        provider: &str,
    ) -> Result<Option<CachedSearchRow>> {
        self.get(search_key, provider, false).await
    }

    async fn get(
        &self,
        search_key: &str,
        provider: &str,
        fresh_only: bool,
    ) -> Result<Option<CachedSearchRow>> {
        let freshness_clause = if fresh_only { "AND expires_at > NOW()" } else { "" };
        let row = sqlx::query(&format!(
            "SELECT provider, result_count, results, expires_at \
             FROM book_search_cache \
             WHERE search_key = $1 AND provider = $2 {}",
            freshness_clause
        ))
        .bind(search_key)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let results_json: serde_json::Value = row.try_get("results")?;
        let results: Vec<SearchResult> = serde_json::from_value(results_json)
            .map_err(|e| AppError::SerializationError(format!("corrupt cache row: {}", e)))?;

        Ok(Some(CachedSearchRow {
            provider: row.try_get("provider")?,
            results,
            result_count: i64::from(row.try_get::<i32, _>("result_count")?),
            expires_at: row.try_get("expires_at")?,
        }))
    }

    /// Upsert on (search_key, provider); subsequent writes overwrite
    /// I'm implementing last-writer-wins via ON CONFLICT so fills never race
    pub async fn upsert(
        &self,
        search_key: &str,
        provider: &str,
        results: &[SearchResult],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let results_json = serde_json::to_value(results)?;

        sqlx::query(
            "INSERT INTO book_search_cache (id, search_key, provider, result_count, results, \
             expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
             ON CONFLICT (search_key, provider) DO UPDATE SET \
                 result_count = EXCLUDED.result_count, \
                 results = EXCLUDED.results, \
                 expires_at = EXCLUDED.expires_at, \
                 created_at = NOW()",
        )
        .bind(Uuid::new_v4())
        .bind(search_key)
        .bind(provider)
        .bind(results.len() as i32)
        .bind(results_json)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Daily sweep of expired rows.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM book_search_cache WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Retention sweep: provenance rows older than 90 days.
pub async fn sweep_metadata_sources(pool: &DatabasePool) -> Result<u64> {
    let result =
        sqlx::query("DELETE FROM book_metadata_sources WHERE created_at < NOW() - INTERVAL '90 days'")
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_book_columns() {
        let qualified = book_columns_qualified();
        assert!(qualified.starts_with("b.id, b.title"));
        assert!(qualified.contains("b.fingerprint"));
        assert!(!qualified.contains("b.b."));
    }

    #[test]
    fn test_fuzzy_candidate_score_is_mean() {
        let candidate = FuzzyCandidate {
            book: sample_book(),
            title_similarity: 0.9,
            author_similarity: 0.7,
        };
        assert!((candidate.score() - 0.8).abs() < 1e-9);
    }

    fn sample_book() -> Book {
        Book {
            id: Uuid::new_v4(),
            title: "The Great Gatsby".to_string(),
            author: "F. Scott Fitzgerald".to_string(),
            normalized_title: "the great gatsby".to_string(),
            primary_author: "F. Scott Fitzgerald".to_string(),
            subtitle: None,
            language: None,
            publisher: None,
            publication_date: NaiveDate::from_ymd_opt(1925, 4, 10),
            page_count: Some(180),
            description: None,
            categories: vec![],
            fingerprint: "0".repeat(64),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
