//! Field normalization: whitespace, empty sentinels, per-field case policy,
//! date/time reparsing and the service-type vocabulary.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::{fields, FieldMap, NormalizedRecord, RawRecord, EMPTY_SENTINEL};

/// Inputs that mean "no value", compared case-insensitively.
pub const EMPTY_ALIASES: &[&str] = &[
    "n/a",
    "none",
    "null",
    "-",
    "unknown",
    "not specified",
    "not available",
];

/// Accepted `date_time` inputs, tried in order.
pub const DATE_TIME_INPUT_FORMATS: &[&str] = &[
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y\n%I:%M %p",
    "%m/%d/%Y %I:%M%p",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

pub const DATE_TIME_OUTPUT_FORMAT: &str = "%m/%d/%Y %I:%M %p";

/// Substring rules for `service_type`; first match wins.
pub const SERVICE_TYPE_RULES: &[(&str, &str)] = &[
    ("in person", "in-person interpretation"),
    ("in-person", "in-person interpretation"),
    ("video", "video interpretation"),
    ("phone", "phone interpretation"),
    ("document", "document translation"),
];

pub const SERVICE_TYPE_ALLOW_LIST: &[&str] = &[
    "in-person interpretation",
    "video interpretation",
    "phone interpretation",
    "document translation",
];

// Date/time shapes looked for inside info/comments when the column itself is unusable.
static FREE_TEXT_DATE_TIME: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b\d{1,2}/\d{1,2}/\d{4}\s+\d{1,2}:\d{2}\s*[ap]\.?m\.?").expect("valid regex"),
        Regex::new(r"\b\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}(?::\d{2})?\b").expect("valid regex"),
    ]
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasePolicy {
    Fold,
    Preserve,
}

/// Case policy per field. Free text and language keep their case; identity
/// fields and anything unlisted are folded.
pub fn case_policy(field: &str) -> CasePolicy {
    match field {
        fields::INFO | fields::COMMENTS | fields::LANGUAGE => CasePolicy::Preserve,
        _ => CasePolicy::Fold,
    }
}

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True for blank input and for any of [`EMPTY_ALIASES`].
pub fn is_empty_alias(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || EMPTY_ALIASES.iter().any(|alias| trimmed.eq_ignore_ascii_case(alias))
}

pub fn canonical_field_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Tries every format against the trimmed text as scraped, then against
/// its whitespace-collapsed form.
pub fn parse_date_time(input: &str) -> Option<NaiveDateTime> {
    let trimmed = input.trim();
    let parse = |candidate: &str| {
        DATE_TIME_INPUT_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(candidate, fmt).ok())
    };
    parse(trimmed).or_else(|| parse(&collapse_whitespace(trimmed)))
}

pub fn format_date_time(value: NaiveDateTime) -> String {
    value.format(DATE_TIME_OUTPUT_FORMAT).to_string()
}

/// Maps a free-form service description onto the fixed vocabulary. Values
/// matching no rule come back lowercased and trimmed.
pub fn canonical_service_type(value: &str) -> String {
    let folded = value.trim().to_lowercase();
    SERVICE_TYPE_RULES
        .iter()
        .find(|(needle, _)| folded.contains(needle))
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(folded)
}

pub fn is_known_service_type(value: &str) -> bool {
    SERVICE_TYPE_ALLOW_LIST
        .iter()
        .any(|known| value.trim().eq_ignore_ascii_case(known))
}

/// Canonical form of one text value for `field`. Unparseable dates become
/// the sentinel; unmapped service types pass through lowercased.
pub fn normalize_text(field: &str, text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    if is_empty_alias(&collapsed) {
        return EMPTY_SENTINEL.to_string();
    }

    match field {
        fields::DATE_TIME => parse_date_time(text)
            .map(format_date_time)
            .unwrap_or_else(|| EMPTY_SENTINEL.to_string()),
        fields::SERVICE_TYPE => canonical_service_type(&collapsed),
        _ => match case_policy(field) {
            CasePolicy::Fold => collapsed.to_lowercase(),
            CasePolicy::Preserve => collapsed,
        },
    }
}

/// Non-string values keep their JSON type untouched.
pub fn normalize_field(field: &str, value: &JsonValue) -> JsonValue {
    match value.as_str() {
        Some(text) => JsonValue::String(normalize_text(field, text)),
        None => value.clone(),
    }
}

/// Canonicalizes every field of a scraped record. Never fails.
pub fn normalize(raw: &RawRecord) -> NormalizedRecord {
    let mut normalized = FieldMap::new();
    for (name, value) in raw.iter() {
        let name = canonical_field_name(name);
        let value = normalize_field(&name, value);
        normalized.insert(name, value);
    }

    let date_unusable = normalized
        .get(fields::DATE_TIME)
        .and_then(JsonValue::as_str)
        .is_some_and(|v| v == EMPTY_SENTINEL);
    if date_unusable {
        if let Some(recovered) = recover_date_time(&normalized) {
            normalized.insert(fields::DATE_TIME.to_string(), JsonValue::String(recovered));
        }
    }

    NormalizedRecord::from_fields(normalized)
}

pub fn normalize_all(raws: &[RawRecord]) -> Vec<NormalizedRecord> {
    raws.iter().map(normalize).collect()
}

/// First parseable date/time found in `info`, then `comments`.
fn recover_date_time(normalized: &FieldMap) -> Option<String> {
    [fields::INFO, fields::COMMENTS]
        .iter()
        .filter_map(|field| normalized.get(*field).and_then(JsonValue::as_str))
        .find_map(|text| {
            FREE_TEXT_DATE_TIME.iter().find_map(|pattern| {
                pattern
                    .find_iter(text)
                    .find_map(|m| parse_date_time(&m.as_str().replace('.', "")))
            })
        })
        .map(format_date_time)
}
