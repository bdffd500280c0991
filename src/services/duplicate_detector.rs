/*
 * Duplicate detection for candidate books, in strict priority order:
 * ISBN-13, ISBN-10 (including the derived ISBN-13 retry), exact fingerprint,
 * then trigram-similarity fuzzy matching when the database supports it.
 * I'm implementing deterministic, read-only matching that tolerates candidates
 * with missing fields so the catalog stays clean across ISBN variants.
 */

use tracing::debug;

use crate::database::repositories::{BookRepository, FuzzyCandidate};
use crate::models::book::Book;
use crate::models::ingestion::{DuplicateMatch, MatchType};
use crate::models::search::SearchResult;
use crate::providers::normalizer;
use crate::utils::error::Result;
use crate::utils::isbn;

/// Minimum per-field trigram similarity for a fuzzy candidate.
const FUZZY_SIMILARITY_FLOOR: f64 = 0.6;
/// Minimum combined score to accept a fuzzy match.
const FUZZY_ACCEPT_SCORE: f64 = 0.8;
/// Confidence assigned to an exact fingerprint match.
const FINGERPRINT_CONFIDENCE: f64 = 0.95;

/// Normalized candidate the detector operates on. Any field may be absent.
#[derive(Debug, Clone, Default)]
pub struct DuplicateCandidate {
    pub title: String,
    pub primary_author: String,
    pub isbn10: Option<String>,
    pub isbn13: Option<String>,
    pub year: Option<i32>,
}

impl DuplicateCandidate {
    /// Build from a search result
    /// I'm stripping ISBN separators and treating checksum failures as absent
    pub fn from_search_result(result: &SearchResult) -> Self {
        Self {
            title: result.title.clone(),
            primary_author: normalizer::primary_author(&result.authors),
            isbn10: result.isbn10.as_deref().and_then(isbn::normalize_isbn10),
            isbn13: result.isbn13.as_deref().and_then(isbn::normalize_isbn13),
            year: result.year(),
        }
    }

    /// Build from an already-populated canonical book.
    pub fn from_book(book: &Book) -> Self {
        Self {
            title: book.title.clone(),
            primary_author: normalizer::primary_author_from_field(&book.author),
            isbn10: None,
            isbn13: None,
            year: book.year(),
        }
    }

    fn normalized_title(&self) -> String {
        normalizer::normalized_title(&self.title)
    }

    fn fingerprint(&self) -> String {
        normalizer::fingerprint(&self.normalized_title(), &self.primary_author, self.year)
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    books: BookRepository,
    /// False when the trigram extension is unavailable; the fuzzy branch is
    /// then skipped entirely.
    trigram_enabled: bool,
}

impl DuplicateDetector {
    pub fn new(books: BookRepository, trigram_enabled: bool) -> Self {
        Self {
            books,
            trigram_enabled,
        }
    }

    /// Find the existing canonical book this candidate duplicates, if any
    /// I'm walking the match priorities in order and stopping at the first hit
    pub async fn find_match(&self, candidate: &DuplicateCandidate) -> Result<DuplicateMatch> {
        // 1. ISBN-13 exact.
        if let Some(isbn13) = candidate.isbn13.as_deref() {
            if let Some(book) = self.books.find_book_by_isbn13(isbn13).await? {
                return Ok(exact(MatchType::Isbn13, book));
            }
        }

        // 2. ISBN-10 exact, plus the derived ISBN-13 retry when the candidate
        //    carries no ISBN-13 of its own.
        if let Some(isbn10) = candidate.isbn10.as_deref() {
            if let Some(book) = self.books.find_book_by_isbn10(isbn10).await? {
                return Ok(exact(MatchType::Isbn10, book));
            }

            if candidate.isbn13.is_none() {
                if let Some(derived) = isbn::isbn10_to_isbn13(isbn10) {
                    if let Some(book) = self.books.find_book_by_isbn13(&derived).await? {
                        return Ok(exact(MatchType::Isbn10To13, book));
                    }
                }
            }
        }

        // 3. Fingerprint exact.
        let fingerprint = candidate.fingerprint();
        if let Some(book) = self.books.find_book_by_fingerprint(&fingerprint).await? {
            return Ok(DuplicateMatch {
                match_type: MatchType::Fingerprint,
                confidence: FINGERPRINT_CONFIDENCE,
                existing_book: Some(book),
            });
        }

        // 4. Fuzzy via trigram similarity.
        if self.trigram_enabled {
            let fuzzy = self
                .books
                .find_fuzzy_candidate(
                    &candidate.normalized_title(),
                    &candidate.primary_author,
                    candidate.year,
                )
                .await?;

            if let Some(fuzzy) = fuzzy {
                if let Some(confidence) = fuzzy_confidence(&fuzzy) {
                    return Ok(DuplicateMatch {
                        match_type: MatchType::Fuzzy,
                        confidence,
                        existing_book: Some(fuzzy.book),
                    });
                }
                debug!(
                    score = fuzzy.score(),
                    "fuzzy candidate below acceptance score"
                );
            }
        }

        Ok(DuplicateMatch::none())
    }
}

fn exact(match_type: MatchType, book: Book) -> DuplicateMatch {
    DuplicateMatch {
        match_type,
        confidence: 1.0,
        existing_book: Some(book),
    }
}

/// Acceptance rule for a fuzzy candidate: both similarities at or above the
/// floor (enforced again defensively against the repository) and a combined
/// score at or above the acceptance threshold.
fn fuzzy_confidence(candidate: &FuzzyCandidate) -> Option<f64> {
    if candidate.title_similarity < FUZZY_SIMILARITY_FLOOR
        || candidate.author_similarity < FUZZY_SIMILARITY_FLOOR
    {
        return None;
    }
    let score = candidate.score();
    (score >= FUZZY_ACCEPT_SCORE).then_some(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn sample_result() -> SearchResult {
        SearchResult {
            provider_id: "vol-1".to_string(),
            provider: "primary".to_string(),
            title: "The Great Gatsby".to_string(),
            authors: vec!["F. Scott Fitzgerald".to_string()],
            subtitle: None,
            isbn10: Some("0-7432-7356-7".to_string()),
            isbn13: None,
            publisher: None,
            publication_date: NaiveDate::from_ymd_opt(1925, 4, 10),
            page_count: Some(180),
            language: Some("en".to_string()),
            categories: vec![],
            cover_image_url: None,
            description: None,
        }
    }

    #[test]
    fn test_candidate_normalizes_isbns() {
        let candidate = DuplicateCandidate::from_search_result(&sample_result());
        assert_eq!(candidate.isbn10.as_deref(), Some("0743273567"));
        assert_eq!(candidate.isbn13, None);
        assert_eq!(candidate.year, Some(1925));
    }

    #[test]
    fn test_candidate_with_failing_checksum_treats_isbn_as_absent() {
        let mut result = sample_result();
        result.isbn10 = Some("0743273568".to_string());
        let candidate = DuplicateCandidate::from_search_result(&result);
        assert_eq!(candidate.isbn10, None);
    }

    #[test]
    fn test_candidate_with_empty_authors_is_deterministic() {
        let mut result = sample_result();
        result.authors = vec![];

        let a = DuplicateCandidate::from_search_result(&result);
        let b = DuplicateCandidate::from_search_result(&result);

        assert_eq!(a.primary_author, "");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_candidate_from_book_splits_combined_author_field() {
        let book = Book {
            id: Uuid::new_v4(),
            title: "Good Omens".to_string(),
            author: "Terry Pratchett; Neil Gaiman".to_string(),
            normalized_title: "good omens".to_string(),
            primary_author: "Terry Pratchett".to_string(),
            subtitle: None,
            language: None,
            publisher: None,
            publication_date: NaiveDate::from_ymd_opt(1990, 5, 1),
            page_count: None,
            description: None,
            categories: vec![],
            fingerprint: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let candidate = DuplicateCandidate::from_book(&book);
        assert_eq!(candidate.primary_author, "Terry Pratchett");
        assert_eq!(candidate.year, Some(1990));
    }

    #[test]
    fn test_fuzzy_acceptance_threshold() {
        let book = Book {
            id: Uuid::new_v4(),
            title: "x".to_string(),
            author: "y".to_string(),
            normalized_title: "x".to_string(),
            primary_author: "y".to_string(),
            subtitle: None,
            language: None,
            publisher: None,
            publication_date: None,
            page_count: None,
            description: None,
            categories: vec![],
            fingerprint: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let accepted = FuzzyCandidate {
            book: book.clone(),
            title_similarity: 0.85,
            author_similarity: 0.8,
        };
        let confidence = fuzzy_confidence(&accepted).unwrap();
        assert!((confidence - 0.825).abs() < 1e-9);

        // Combined score 0.79 rejected even though both fields pass the floor.
        let below_score = FuzzyCandidate {
            book: book.clone(),
            title_similarity: 0.88,
            author_similarity: 0.70,
        };
        assert_eq!(fuzzy_confidence(&below_score), None);

        // One field below the floor rejected despite a high combined score.
        let below_floor = FuzzyCandidate {
            book,
            title_similarity: 1.0,
            author_similarity: 0.59,
        };
        assert_eq!(fuzzy_confidence(&below_floor), None);
    }
}
