//! Core record model and the change-detection pipeline for interpreter
//! assignment listings: normalization, validation, identity and diffing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod diff;
pub mod identity;
pub mod normalize;
pub mod validate;

pub use diff::{diff, DiffOutcome, FieldChange, RecordChange};
pub use identity::{identity_key, records_equal, IdentityKey};
pub use normalize::{normalize, normalize_all};
pub use validate::{validate, validate_all, FindingKind, FindingTally, ValidationFinding};

pub const CRATE_NAME: &str = "assignwatch-core";

/// Canonical stand-in for missing, blank or "n/a"-like values.
pub const EMPTY_SENTINEL: &str = "N/A";

/// Field names produced by the listing scraper and the info-block extraction.
pub mod fields {
    pub const CUSTOMER: &str = "customer";
    pub const DATE_TIME: &str = "date_time";
    pub const LANGUAGE: &str = "language";
    pub const SERVICE_TYPE: &str = "service_type";
    pub const INFO: &str = "info";
    pub const COMMENTS: &str = "comments";

    pub const CONTACT_NAME_AND_PHONE: &str = "contact_person_name_and_phone";
    pub const CONTACT_EMAIL: &str = "contact_person_email_address";
    pub const ADDRESS: &str = "address";
    pub const LOCATION: &str = "location";
    pub const CLIENT_NAME_AND_PHONE: &str = "client_name_and_phone";

    /// Columns every scraped listing row is expected to carry.
    pub const REQUIRED: [&str; 6] = [CUSTOMER, DATE_TIME, LANGUAGE, SERVICE_TYPE, INFO, COMMENTS];
}

pub type FieldMap = BTreeMap<String, JsonValue>;

/// Record exactly as scraped: field name to value, no invariants.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: FieldMap,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from string pairs, the shape every scraper produces.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), JsonValue::String(v.into())))
                .collect(),
        }
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Option<JsonValue> {
        self.fields.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(JsonValue::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<FieldMap> for RawRecord {
    fn from(fields: FieldMap) -> Self {
        Self { fields }
    }
}

/// Record after [`normalize`]: canonical field names and values.
///
/// Deserialization is transparent so persisted snapshots read back directly;
/// everything else should come out of the normalizer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRecord {
    fields: FieldMap,
}

impl NormalizedRecord {
    pub(crate) fn from_fields(fields: FieldMap) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(JsonValue::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value rendered for humans: strings as-is, other JSON verbatim,
    /// absent fields as the sentinel.
    pub fn display_value(&self, field: &str) -> String {
        display_value(self.fields.get(field))
    }

    /// Converts back into a raw record, e.g. to feed it through the
    /// normalizer again.
    pub fn to_raw(&self) -> RawRecord {
        RawRecord::from(self.fields.clone())
    }
}

pub(crate) fn display_value(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => EMPTY_SENTINEL.to_string(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// One-line description used in change logs and notifications.
pub fn describe_record(record: &NormalizedRecord) -> String {
    format!(
        "Customer: {}, Language: {}, Date/Time: {}",
        record.display_value(fields::CUSTOMER),
        record.display_value(fields::LANGUAGE),
        record.display_value(fields::DATE_TIME)
    )
}
