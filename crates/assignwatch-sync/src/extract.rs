//! Lifts labelled sub-fields out of the multi-line `info` column.

use std::collections::BTreeMap;

use assignwatch_core::{fields, RawRecord};

/// Label prefixes and the field each one feeds. Longer labels come first so
/// a label that contains another is matched whole.
pub const INFO_LABELS: &[(&str, &str)] = &[
    ("Contact person's name and phone number:", fields::CONTACT_NAME_AND_PHONE),
    ("Contact person's email address:", fields::CONTACT_EMAIL),
    ("Client name and phone:", fields::CLIENT_NAME_AND_PHONE),
    ("Address:", fields::ADDRESS),
    ("Location:", fields::LOCATION),
];

/// Scans `info` line by line. A line containing a label opens that field
/// with the text after the label; following unlabelled lines continue it.
/// Fields that end up empty are dropped. When a label repeats, its last
/// non-empty value wins.
pub fn extract_info_fields(info: &str) -> BTreeMap<&'static str, String> {
    let mut extracted = BTreeMap::new();
    let mut open: Option<(&'static str, Vec<String>)> = None;

    for line in info.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match find_label(line) {
            Some((field, rest)) => {
                if let Some((done, parts)) = open.take() {
                    close_field(&mut extracted, done, parts);
                }
                let mut parts = Vec::new();
                if !rest.is_empty() {
                    parts.push(rest.to_string());
                }
                open = Some((field, parts));
            }
            None => {
                if let Some((_, parts)) = open.as_mut() {
                    parts.push(line.to_string());
                }
            }
        }
    }
    if let Some((done, parts)) = open {
        close_field(&mut extracted, done, parts);
    }
    extracted
}

fn find_label(line: &str) -> Option<(&'static str, &str)> {
    INFO_LABELS.iter().find_map(|(label, field)| {
        line.find(label)
            .map(|at| (*field, line[at + label.len()..].trim()))
    })
}

fn close_field(extracted: &mut BTreeMap<&'static str, String>, field: &'static str, parts: Vec<String>) {
    if parts.is_empty() {
        return;
    }
    extracted.insert(field, parts.join(" "));
}

/// Copy of `raw` with derived info fields added. Fields already on the
/// record are never overwritten.
pub fn with_info_fields(raw: &RawRecord) -> RawRecord {
    let mut enriched = raw.clone();
    let Some(info) = raw.get_str(fields::INFO) else {
        return enriched;
    };
    for (field, value) in extract_info_fields(info) {
        if !enriched.contains(field) {
            enriched.insert(field, value);
        }
    }
    enriched
}
