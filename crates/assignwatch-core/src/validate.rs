//! Advisory checks over normalized records. Findings are reported, never
//! raised, and never alter the record.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::normalize::{DATE_TIME_OUTPUT_FORMAT, SERVICE_TYPE_ALLOW_LIST};
use crate::{fields, NormalizedRecord, EMPTY_SENTINEL};

pub const KNOWN_LANGUAGES: &[&str] = &[
    "Spanish",
    "French",
    "Portuguese",
    "Mandarin",
    "Cantonese",
    "Vietnamese",
    "Russian",
    "Arabic",
    "Korean",
    "Japanese",
];

pub const TYPO_DISTANCE: usize = 2;

static INVALID_CUSTOMER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"^\s*$", r"^[0-9]+$", r"^test.*$", r"^unknown$", r"^n/?a$"]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid regex"))
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    MissingField,
    InvalidType,
    EmptyValue,
    UnknownServiceType,
    PossibleTypo,
    InvalidCustomerName,
    InvalidDateFormat,
}

impl FindingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::InvalidType => "invalid_type",
            Self::EmptyValue => "empty_value",
            Self::UnknownServiceType => "unknown_service_type",
            Self::PossibleTypo => "possible_typo",
            Self::InvalidCustomerName => "invalid_customer_name",
            Self::InvalidDateFormat => "invalid_date_format",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub field: String,
    pub kind: FindingKind,
    pub value: String,
    pub message: String,
}

impl ValidationFinding {
    fn new(field: &str, kind: FindingKind, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            kind,
            value: value.into(),
            message: message.into(),
        }
    }
}

/// Runs every check against `record`; one check failing never hides another.
pub fn validate(record: &NormalizedRecord) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();

    for field in fields::REQUIRED {
        match record.get(field) {
            None => findings.push(ValidationFinding::new(
                field,
                FindingKind::MissingField,
                EMPTY_SENTINEL,
                "Missing required field",
            )),
            Some(JsonValue::String(_)) => {}
            Some(other) => findings.push(ValidationFinding::new(
                field,
                FindingKind::InvalidType,
                other.to_string(),
                format!("Invalid type. Expected string, got {}", json_type_name(other)),
            )),
        }
    }

    for (field, value) in record.iter() {
        if let JsonValue::String(text) = value {
            if text.trim().is_empty() || text == EMPTY_SENTINEL {
                findings.push(ValidationFinding::new(
                    field,
                    FindingKind::EmptyValue,
                    text.clone(),
                    "Empty or whitespace-only value",
                ));
            }
        }
    }

    if let Some(service_type) = record.get_str(fields::SERVICE_TYPE) {
        let folded = service_type.trim().to_lowercase();
        if !SERVICE_TYPE_ALLOW_LIST.contains(&folded.as_str()) {
            findings.push(ValidationFinding::new(
                fields::SERVICE_TYPE,
                FindingKind::UnknownServiceType,
                folded,
                format!("Unknown service type. Valid types: {}", SERVICE_TYPE_ALLOW_LIST.join(", ")),
            ));
        }
    }

    if let Some(language) = record.get_str(fields::LANGUAGE) {
        let candidates = typo_candidates(language);
        if !candidates.is_empty() {
            findings.push(ValidationFinding::new(
                fields::LANGUAGE,
                FindingKind::PossibleTypo,
                language,
                format!("Possible typo. Did you mean: {}?", candidates.join(", ")),
            ));
        }
    }

    if let Some(customer) = record.get_str(fields::CUSTOMER) {
        let folded = customer.trim().to_lowercase();
        if INVALID_CUSTOMER_PATTERNS.iter().any(|p| p.is_match(&folded)) {
            findings.push(ValidationFinding::new(
                fields::CUSTOMER,
                FindingKind::InvalidCustomerName,
                customer,
                "Invalid customer name format",
            ));
        }
    }

    if let Some(date_time) = record.get_str(fields::DATE_TIME) {
        if NaiveDateTime::parse_from_str(date_time, DATE_TIME_OUTPUT_FORMAT).is_err() {
            findings.push(ValidationFinding::new(
                fields::DATE_TIME,
                FindingKind::InvalidDateFormat,
                date_time,
                "Invalid date format. Expected MM/DD/YYYY HH:MM AM/PM",
            ));
        }
    }

    findings
}

/// Findings keyed by record index; clean records are left out.
pub fn validate_all(records: &[NormalizedRecord]) -> BTreeMap<usize, Vec<ValidationFinding>> {
    let mut by_index = BTreeMap::new();
    for (index, record) in records.iter().enumerate() {
        let findings = validate(record);
        if findings.is_empty() {
            continue;
        }
        for finding in &findings {
            warn!(
                assignment = index + 1,
                field = %finding.field,
                kind = finding.kind.as_str(),
                value = %finding.value,
                "{}",
                finding.message
            );
        }
        by_index.insert(index, findings);
    }
    if !by_index.is_empty() {
        let tally = FindingTally::from_findings(&by_index);
        warn!(
            records = by_index.len(),
            findings = tally.total,
            "validation findings in scraped assignments"
        );
    }
    by_index
}

/// Finding counts per kind, as carried in run summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingTally {
    pub total: usize,
    pub by_kind: BTreeMap<FindingKind, usize>,
}

impl FindingTally {
    pub fn from_findings(by_index: &BTreeMap<usize, Vec<ValidationFinding>>) -> Self {
        let mut tally = Self::default();
        for finding in by_index.values().flatten() {
            tally.total += 1;
            *tally.by_kind.entry(finding.kind).or_default() += 1;
        }
        tally
    }

    pub fn count(&self, kind: FindingKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

fn typo_candidates(language: &str) -> Vec<&'static str> {
    if KNOWN_LANGUAGES.contains(&language.trim()) {
        return Vec::new();
    }
    let folded = language.trim().to_lowercase();
    KNOWN_LANGUAGES
        .iter()
        .copied()
        .filter(|known| strsim::levenshtein(&folded, &known.to_lowercase()) <= TYPO_DISTANCE)
        .collect()
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
