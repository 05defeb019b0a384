// Leaf field and cardinality normalisation over transformed responses.

use crate::transform::{JsonValue, TEXT_KEY};

/// The shapes a leaf field can take after transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf<'a> {
    /// `<seq>3</seq>` read as `"3"`.
    Bare(&'a str),
    /// `<seq a="b">3</seq>` read as `{"@attributes": .., "#text": "3"}`.
    Wrapped(&'a str),
    Missing,
}

impl<'a> Leaf<'a> {
    pub fn of(value: Option<&'a JsonValue>) -> Self {
        match value {
            Some(JsonValue::Scalar(text)) => Leaf::Bare(text),
            Some(JsonValue::Object(fields)) => match fields.get(TEXT_KEY) {
                Some(JsonValue::Scalar(text)) => Leaf::Wrapped(text),
                _ => Leaf::Missing,
            },
            _ => Leaf::Missing,
        }
    }

    /// The text, treating an empty string the same as a missing field.
    pub fn text(self) -> Option<&'a str> {
        match self {
            Leaf::Bare(text) | Leaf::Wrapped(text) if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

/// Reads a leaf field as text, falling back when it is absent, empty or not
/// a text-bearing shape.
pub fn extract_text(value: Option<&JsonValue>, fallback: &str) -> String {
    Leaf::of(value).text().unwrap_or(fallback).to_string()
}

/// Normalises a field that may hold one item or an array of items.
pub fn items_of(value: Option<&JsonValue>) -> Vec<&JsonValue> {
    match value {
        Some(JsonValue::Array(items)) => items.iter().collect(),
        Some(item) => vec![item],
        None => Vec::new(),
    }
}

/// Parses the leading integer of `text`: optional whitespace, an optional
/// sign, then digits. Whatever follows the digits is ignored.
pub fn parse_leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 {
        return None;
    }

    let magnitude: i64 = rest[..digits_len].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Compares a textual sequence number against an ordinal the way the
/// upstream pages did: surrounding whitespace ignored, blank counts as zero,
/// anything non-numeric never matches.
pub fn loosely_equals(text: &str, number: i64) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return number == 0;
    }

    match trimmed.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => parsed == number as f64,
        _ => false,
    }
}
