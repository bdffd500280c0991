/*
 * Pure, stateless normalization of provider payloads into the internal search
 * result shape, plus the derived fields the duplicate detector keys on:
 * normalized title, primary author, and the work fingerprint.
 * I'm keeping normalization deterministic and treating all input as plain text.
 */

use chrono::NaiveDate;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::search::SearchResult;
use crate::providers::ProviderError;
use crate::utils::isbn;

/// Map a raw provider payload into a [`SearchResult`].
/// I'm normalizing data and dropping invalid identifiers for a clean catalog.
///
/// Unknown provider names are rejected.
pub fn normalize(provider_name: &str, payload: &Value) -> Result<SearchResult, ProviderError> {
    match provider_name {
        "primary" => map_primary_volume(payload),
        "secondary" => map_secondary_doc(payload),
        other => Err(ProviderError::ParseError(format!(
            "unknown provider name: {}",
            other
        ))),
    }
}

/// Lowercase, strip punctuation, collapse whitespace
/// I'm implementing the transform idempotently so re-normalizing is a no-op
pub fn normalized_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_was_space = true;

    for c in title.chars() {
        if c.is_alphanumeric() {
            // Lowercasing can expand to multiple chars; combining marks are dropped
            // so the transform stays idempotent.
            for lower in c.to_lowercase().filter(|ch| ch.is_alphanumeric()) {
                out.push(lower);
            }
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }

    out.trim_end().to_string()
}

/// First author from an ordered list, trimmed. Empty list yields "".
pub fn primary_author(authors: &[String]) -> String {
    authors
        .first()
        .map(|a| a.trim().to_string())
        .unwrap_or_default()
}

/// First author from a combined field, split on the first `,` or `;`.
pub fn primary_author_from_field(author_field: &str) -> String {
    author_field
        .split(|c| c == ',' || c == ';')
        .next()
        .map(str::trim)
        .unwrap_or("")
        .to_string()
}

/// Work fingerprint: SHA-256 hex of `normalized_title || "||" || primary_author || "||" || year`,
/// with the year rendered as "" when unknown.
/// I'm using a literal separator so adjacent fields can never collide.
pub fn fingerprint(normalized_title: &str, primary_author: &str, year: Option<i32>) -> String {
    let year_part = year.map(|y| y.to_string()).unwrap_or_default();
    let input = format!("{}||{}||{}", normalized_title, primary_author, year_part);

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Parse the date formats providers emit: `YYYY`, `YYYY-MM`, `YYYY-MM-DD`
/// I'm implementing tolerant date parsing for the partial dates book APIs return
pub fn parse_publication_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{}-01", trimmed), "%Y-%m-%d") {
        return Some(date);
    }
    if trimmed.len() == 4 {
        if let Ok(year) = trimmed.parse::<i32>() {
            return NaiveDate::from_ymd_opt(year, 1, 1);
        }
    }
    None
}

/// Map one Google-Books-style volume object.
fn map_primary_volume(payload: &Value) -> Result<SearchResult, ProviderError> {
    let provider_id = payload
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::ParseError("volume missing id".to_string()))?
        .to_string();

    let info = payload
        .get("volumeInfo")
        .ok_or_else(|| ProviderError::ParseError("volume missing volumeInfo".to_string()))?;

    let title = info
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::ParseError("volume missing title".to_string()))?
        .to_string();

    let authors = string_array(info.get("authors"));

    let (mut isbn10, mut isbn13) = (None, None);
    if let Some(identifiers) = info.get("industryIdentifiers").and_then(Value::as_array) {
        for identifier in identifiers {
            let kind = identifier.get("type").and_then(Value::as_str).unwrap_or("");
            let value = identifier
                .get("identifier")
                .and_then(Value::as_str)
                .unwrap_or("");
            match kind {
                "ISBN_10" => isbn10 = isbn::normalize_isbn10(value),
                "ISBN_13" => isbn13 = isbn::normalize_isbn13(value),
                _ => {}
            }
        }
    }

    Ok(SearchResult {
        provider_id,
        provider: "primary".to_string(),
        title,
        authors,
        subtitle: optional_string(info.get("subtitle")),
        isbn10,
        isbn13,
        publisher: optional_string(info.get("publisher")),
        publication_date: info
            .get("publishedDate")
            .and_then(Value::as_str)
            .and_then(parse_publication_date),
        page_count: info.get("pageCount").and_then(Value::as_i64).and_then(|n| {
            if n > 0 {
                i32::try_from(n).ok()
            } else {
                None
            }
        }),
        language: optional_string(info.get("language")),
        categories: string_array(info.get("categories")),
        cover_image_url: info
            .get("imageLinks")
            .and_then(|links| links.get("thumbnail"))
            .and_then(Value::as_str)
            .map(str::to_string),
        description: optional_string(info.get("description")),
    })
}

/// Map one Open-Library-style search doc.
fn map_secondary_doc(payload: &Value) -> Result<SearchResult, ProviderError> {
    let provider_id = payload
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::ParseError("doc missing key".to_string()))?
        .to_string();

    let title = payload
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::ParseError("doc missing title".to_string()))?
        .to_string();

    let authors = string_array(payload.get("author_name"));

    let (mut isbn10, mut isbn13) = (None, None);
    if let Some(isbns) = payload.get("isbn").and_then(Value::as_array) {
        for value in isbns.iter().filter_map(Value::as_str) {
            if isbn13.is_none() {
                isbn13 = isbn::normalize_isbn13(value);
            }
            if isbn10.is_none() {
                isbn10 = isbn::normalize_isbn10(value);
            }
            if isbn10.is_some() && isbn13.is_some() {
                break;
            }
        }
    }

    Ok(SearchResult {
        provider_id,
        provider: "secondary".to_string(),
        title,
        authors,
        subtitle: optional_string(payload.get("subtitle")),
        isbn10,
        isbn13,
        publisher: payload
            .get("publisher")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(str::to_string),
        publication_date: payload
            .get("first_publish_year")
            .and_then(Value::as_i64)
            .and_then(|y| NaiveDate::from_ymd_opt(y as i32, 1, 1)),
        page_count: payload
            .get("number_of_pages_median")
            .and_then(Value::as_i64)
            .and_then(|n| if n > 0 { i32::try_from(n).ok() } else { None }),
        language: payload
            .get("language")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(str::to_string),
        categories: string_array(payload.get("subject")),
        cover_image_url: payload.get("cover_i").and_then(Value::as_i64).map(|id| {
            format!("https://covers.openlibrary.org/b/id/{}-M.jpg", id)
        }),
        description: None,
    })
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_normalized_title_strips_punctuation_and_case() {
        assert_eq!(normalized_title("The Great Gatsby"), "the great gatsby");
        assert_eq!(normalized_title("Don't Panic!"), "don t panic");
        assert_eq!(normalized_title("  Dune:   Messiah  "), "dune messiah");
        assert_eq!(normalized_title("1984"), "1984");
    }

    #[test]
    fn test_primary_author_variants() {
        assert_eq!(
            primary_author(&["George Orwell".to_string(), "Other".to_string()]),
            "George Orwell"
        );
        assert_eq!(primary_author(&[]), "");
        assert_eq!(
            primary_author_from_field("F. Scott Fitzgerald; Jane Doe"),
            "F. Scott Fitzgerald"
        );
        assert_eq!(
            primary_author_from_field(" Ursula K. Le Guin , Someone Else"),
            "Ursula K. Le Guin"
        );
    }

    #[test]
    fn test_fingerprint_is_deterministic_and_year_sensitive() {
        let a = fingerprint("1984", "George Orwell", Some(1949));
        let b = fingerprint("1984", "George Orwell", Some(1949));
        let c = fingerprint("1984", "George Orwell", None);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_parse_publication_date_formats() {
        assert_eq!(
            parse_publication_date("1949-06-08"),
            NaiveDate::from_ymd_opt(1949, 6, 8)
        );
        assert_eq!(
            parse_publication_date("1949-06"),
            NaiveDate::from_ymd_opt(1949, 6, 1)
        );
        assert_eq!(
            parse_publication_date("1949"),
            NaiveDate::from_ymd_opt(1949, 1, 1)
        );
        assert_eq!(parse_publication_date("unknown"), None);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(matches!(
            normalize("tertiary", &json!({})),
            Err(ProviderError::ParseError(_))
        ));
    }

    #[test]
    fn test_map_primary_volume() {
        let payload = json!({
            "id": "dGVzdA",
            "volumeInfo": {
                "title": "1984",
                "authors": ["George Orwell"],
                "publisher": "Signet Classic",
                "publishedDate": "1950-07-01",
                "pageCount": 328,
                "language": "en",
                "categories": ["Fiction"],
                "industryIdentifiers": [
                    {"type": "ISBN_10", "identifier": "0451524934"},
                    {"type": "ISBN_13", "identifier": "978-0451524935"}
                ],
                "imageLinks": {"thumbnail": "https://books.example/thumb.jpg"}
            }
        });

        let result = normalize("primary", &payload).unwrap();
        assert_eq!(result.provider, "primary");
        assert_eq!(result.provider_id, "dGVzdA");
        assert_eq!(result.isbn10.as_deref(), Some("0451524934"));
        assert_eq!(result.isbn13.as_deref(), Some("9780451524935"));
        assert_eq!(result.page_count, Some(328));
        assert_eq!(result.year(), Some(1950));
    }

    #[test]
    fn test_map_secondary_doc() {
        let payload = json!({
            "key": "/works/OL1168083W",
            "title": "Foundation",
            "author_name": ["Isaac Asimov"],
            "first_publish_year": 1951,
            "isbn": ["0553293354", "9780553293357"],
            "publisher": ["Spectra"],
            "language": ["eng"],
            "subject": ["Science fiction"],
            "cover_i": 12606502
        });

        let result = normalize("secondary", &payload).unwrap();
        assert_eq!(result.provider, "secondary");
        assert_eq!(result.isbn13.as_deref(), Some("9780553293357"));
        assert_eq!(result.isbn10.as_deref(), Some("0553293354"));
        assert_eq!(result.year(), Some(1951));
        assert!(result.cover_image_url.unwrap().contains("12606502"));
    }

    #[test]
    fn test_invalid_isbns_dropped_during_mapping() {
        let payload = json!({
            "id": "v1",
            "volumeInfo": {
                "title": "Broken",
                "industryIdentifiers": [
                    {"type": "ISBN_10", "identifier": "0451524935"},
                    {"type": "ISBN_13", "identifier": "9780451524936"}
                ]
            }
        });

        let result = normalize("primary", &payload).unwrap();
        assert_eq!(result.isbn10, None);
        assert_eq!(result.isbn13, None);
    }

    proptest! {
        /// Title normalization is idempotent: normalizing twice equals once.
        #[test]
        fn prop_normalized_title_idempotent(title in ".{0,200}") {
            let once = normalized_title(&title);
            let twice = normalized_title(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_fingerprint_always_64_hex(
            title in "[a-z ]{0,80}",
            author in "[a-zA-Z .]{0,40}",
            year in proptest::option::of(1000i32..2100)
        ) {
            let digest = fingerprint(&title, &author, year);
            prop_assert_eq!(digest.len(), 64);
            prop_assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
