//! Identity key and deep equality for normalized records.
//!
//! Identity is narrower than equality: two postings with the
//! same customer, date, language and service type are the same assignment
//! even when their descriptive text differs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::normalize::{case_policy, collapse_whitespace, is_empty_alias, CasePolicy};
use crate::{display_value, fields, NormalizedRecord, EMPTY_SENTINEL};

pub const IDENTITY_FIELDS: [&str; 4] = [
    fields::CUSTOMER,
    fields::DATE_TIME,
    fields::LANGUAGE,
    fields::SERVICE_TYPE,
];

/// Bookkeeping fields that never take part in equality.
pub const IGNORED_FIELDS: &[&str] = &["timestamp", "last_updated", "created_at", "updated_at"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub customer: String,
    pub date_time: String,
    pub language: String,
    pub service_type: String,
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Customer: {}, Language: {}, Date/Time: {}",
            self.customer, self.language, self.date_time
        )
    }
}

/// Folding is re-applied here since callers may hand over copies that were
/// cased differently after normalization.
pub fn identity_key(record: &NormalizedRecord) -> IdentityKey {
    let part = |field: &str| comparison_value(field, record.get(field));
    IdentityKey {
        customer: part(fields::CUSTOMER),
        date_time: part(fields::DATE_TIME),
        language: part(fields::LANGUAGE),
        service_type: part(fields::SERVICE_TYPE),
    }
}

/// Comparison form of a field value: whitespace collapsed, empty aliases
/// mapped to the sentinel, case folded per policy. Identity fields are
/// always folded.
pub fn comparison_value(field: &str, value: Option<&JsonValue>) -> String {
    let text = match value {
        None | Some(JsonValue::Null) => return EMPTY_SENTINEL.to_string(),
        Some(JsonValue::String(s)) => collapse_whitespace(s),
        Some(other) => other.to_string(),
    };
    if is_empty_alias(&text) {
        return EMPTY_SENTINEL.to_string();
    }
    if IDENTITY_FIELDS.contains(&field) || case_policy(field) == CasePolicy::Fold {
        text.to_lowercase()
    } else {
        text
    }
}

/// A field as seen by the comparison: its comparison form and the value a
/// human should be shown.
#[derive(Debug, Clone)]
pub(crate) struct ComparableField {
    pub(crate) compare: String,
    pub(crate) display: String,
}

pub(crate) fn comparable_fields(record: &NormalizedRecord) -> BTreeMap<String, ComparableField> {
    record
        .iter()
        .map(|(name, value)| (name.trim().to_lowercase(), value))
        .filter(|(name, _)| !IGNORED_FIELDS.contains(&name.as_str()))
        .map(|(name, value)| {
            let field = ComparableField {
                compare: comparison_value(&name, Some(value)),
                display: display_value(Some(value)),
            };
            (name, field)
        })
        .collect()
}

/// True iff every field in the union of both records matches under the
/// comparison policy; absent fields count as the sentinel.
pub fn records_equal(a: &NormalizedRecord, b: &NormalizedRecord) -> bool {
    let left = comparable_fields(a);
    let right = comparable_fields(b);
    let names: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
    let equal = names.into_iter().all(|name| {
        let l = left.get(name).map_or(EMPTY_SENTINEL, |f| f.compare.as_str());
        let r = right.get(name).map_or(EMPTY_SENTINEL, |f| f.compare.as_str());
        l == r
    });
    equal
}
