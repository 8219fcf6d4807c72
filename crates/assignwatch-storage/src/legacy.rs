//! The flat-file "Bridge Assignments Report" format written by earlier
//! versions of the checker. Used for export and for migrating old reports
//! into a snapshot.

use assignwatch_core::{NormalizedRecord, RawRecord, EMPTY_SENTINEL};
use serde_json::Value as JsonValue;

pub const REPORT_HEADER: &str = "Bridge Assignments Report";
const RECORD_PREFIX: &str = "Assignment #";
const SEPARATOR_WIDTH: usize = 30;

/// Title-cases a field name the way the old report did: a letter is
/// uppercased when it does not follow another letter, so `date_time`
/// becomes `Date_Time`.
pub fn title_case_field(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut previous_cased = false;
    for ch in name.chars() {
        if previous_cased {
            out.extend(ch.to_lowercase());
        } else {
            out.extend(ch.to_uppercase());
        }
        previous_cased = ch.is_alphabetic();
    }
    out
}

pub fn render_legacy_report(records: &[NormalizedRecord]) -> String {
    let mut out = format!("{REPORT_HEADER}\n\n");
    for (index, record) in records.iter().enumerate() {
        out.push_str(&format!("{RECORD_PREFIX}{}:\n", index + 1));
        out.push_str(&"-".repeat(SEPARATOR_WIDTH));
        out.push('\n');
        for (field, value) in record.iter() {
            let Some(text) = exportable_text(value) else {
                continue;
            };
            out.push_str(&format!("{}: {}\n", title_case_field(field), text));
        }
        out.push('\n');
    }
    out
}

/// Fields are iterated in key order already; blank and sentinel values are
/// left out.
fn exportable_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::Null => return None,
        JsonValue::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if text.is_empty() || text == EMPTY_SENTINEL {
        None
    } else {
        Some(text)
    }
}

/// Parses a legacy report back into raw records. Keys are lowercased with
/// spaces turned into underscores; `n/a`, `none` and blank values become the
/// empty string.
pub fn parse_legacy_report(content: &str) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut current: Option<RawRecord> = None;

    let lines = content
        .lines()
        .filter(|line| !line.starts_with(REPORT_HEADER))
        .map(str::trim)
        .filter(|line| !line.is_empty());

    for line in lines {
        if line.starts_with(RECORD_PREFIX) {
            if let Some(done) = current.take().filter(|r| !r.is_empty()) {
                records.push(done);
            }
            current = Some(RawRecord::new());
            continue;
        }
        if line.starts_with('-') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase().replace(' ', "_");
        let value = value.trim();
        let value = if value.is_empty()
            || value.eq_ignore_ascii_case("n/a")
            || value.eq_ignore_ascii_case("none")
        {
            ""
        } else {
            value
        };
        current
            .get_or_insert_with(RawRecord::new)
            .insert(key, value.to_string());
    }

    if let Some(done) = current.filter(|r| !r.is_empty()) {
        records.push(done);
    }
    records
}
