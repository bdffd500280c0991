/*
 * ISBN handling: separator stripping, shape and checksum validation, and the
 * ISBN-10 to ISBN-13 conversion used by the duplicate detector.
 * I'm implementing strict identifier hygiene so malformed identifiers never reach
 * the unique-indexed columns.
 */

/// Strip separators (hyphens, spaces) and uppercase the check character.
pub fn strip_separators(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// True when the string matches the ISBN-10 shape `^[0-9]{9}[0-9X]$`.
pub fn is_isbn10_shape(candidate: &str) -> bool {
    candidate.len() == 10
        && candidate[..9].chars().all(|c| c.is_ascii_digit())
        && candidate
            .chars()
            .nth(9)
            .is_some_and(|c| c.is_ascii_digit() || c == 'X')
}

/// True when the string matches the ISBN-13 shape `^97[89][0-9]{10}$`.
pub fn is_isbn13_shape(candidate: &str) -> bool {
    candidate.len() == 13
        && (candidate.starts_with("978") || candidate.starts_with("979"))
        && candidate.chars().all(|c| c.is_ascii_digit())
}

/// ISBN-10 checksum: sum of digit * (10 - position) must be divisible by 11,
/// with 'X' standing for 10 in the check position.
pub fn isbn10_checksum_valid(candidate: &str) -> bool {
    if !is_isbn10_shape(candidate) {
        return false;
    }

    let mut sum: u32 = 0;
    for (i, c) in candidate.chars().enumerate() {
        let value = if c == 'X' { 10 } else { c.to_digit(10).unwrap_or(0) };
        sum += value * (10 - i as u32);
    }
    sum % 11 == 0
}

/// ISBN-13 checksum: alternating 1/3 weights, check digit completes to a
/// multiple of 10.
pub fn isbn13_checksum_valid(candidate: &str) -> bool {
    if !is_isbn13_shape(candidate) {
        return false;
    }

    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { *d } else { *d * 3 })
        .sum();
    sum % 10 == 0
}

/// Normalize a raw ISBN-10: strip separators, validate shape, and drop values
/// that fail the checksum. I'm treating a checksum failure as an absent ISBN
/// rather than an error.
pub fn normalize_isbn10(raw: &str) -> Option<String> {
    let stripped = strip_separators(raw);
    if isbn10_checksum_valid(&stripped) {
        Some(stripped)
    } else {
        None
    }
}

/// Normalize a raw ISBN-13: strip separators, validate shape and checksum.
pub fn normalize_isbn13(raw: &str) -> Option<String> {
    let stripped = strip_separators(raw);
    if isbn13_checksum_valid(&stripped) {
        Some(stripped)
    } else {
        None
    }
}

/// Derive the ISBN-13 for a valid ISBN-10: `978` + first nine digits + a
/// recomputed ISBN-13 check digit.
/// I'm recomputing the check digit rather than reusing the ISBN-10's.
pub fn isbn10_to_isbn13(isbn10: &str) -> Option<String> {
    if !isbn10_checksum_valid(isbn10) {
        return None;
    }

    let mut body = String::with_capacity(13);
    body.push_str("978");
    body.push_str(&isbn10[..9]);

    let sum: u32 = body
        .chars()
        .filter_map(|c| c.to_digit(10))
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { d } else { d * 3 })
        .sum();
    let check = (10 - (sum % 10)) % 10;
    body.push(char::from_digit(check, 10)?);

    Some(body)
}
