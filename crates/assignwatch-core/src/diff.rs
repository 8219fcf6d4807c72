//! Snapshot diffing keyed by [`IdentityKey`].

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::warn;

use crate::identity::{comparable_fields, identity_key, records_equal, IdentityKey};
use crate::{describe_record, NormalizedRecord, EMPTY_SENTINEL};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

impl FieldChange {
    pub fn describe(&self) -> String {
        format!("{}: '{}' → '{}'", self.field, self.old, self.new)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordChange {
    pub key: IdentityKey,
    pub summary: String,
    pub fields: Vec<FieldChange>,
}

/// Result of comparing a previous snapshot with a fresh scrape.
///
/// `change_log` carries no ordering guarantee between its added, removed and
/// changed sections.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffOutcome {
    pub has_changes: bool,
    pub change_log: Vec<String>,
    pub newly_added: Vec<NormalizedRecord>,
    pub removed: Vec<IdentityKey>,
    pub changed: Vec<RecordChange>,
    pub unchanged: usize,
    /// Records dropped because a later record on the same side had the same key.
    pub duplicate_previous: usize,
    pub duplicate_current: usize,
}

impl DiffOutcome {
    pub fn is_notifiable(&self) -> bool {
        !self.newly_added.is_empty()
    }
}

pub fn diff(previous: &[NormalizedRecord], current: &[NormalizedRecord]) -> DiffOutcome {
    let (previous_index, duplicate_previous) = index_by_identity(previous);
    let (current_index, duplicate_current) = index_by_identity(current);
    if duplicate_previous > 0 || duplicate_current > 0 {
        warn!(
            duplicate_previous,
            duplicate_current, "identity key collisions collapsed (last record wins)"
        );
    }

    let mut outcome = DiffOutcome {
        duplicate_previous,
        duplicate_current,
        ..Default::default()
    };

    for (key, record) in &current_index {
        if !previous_index.contains_key(key) {
            outcome
                .change_log
                .push(format!("New assignment added: {}", describe_record(record)));
            outcome.newly_added.push((*record).clone());
        }
    }

    for (key, record) in &previous_index {
        if !current_index.contains_key(key) {
            outcome
                .change_log
                .push(format!("Assignment removed: {}", describe_record(record)));
            outcome.removed.push(key.clone());
        }
    }

    for (key, current_record) in &current_index {
        let Some(previous_record) = previous_index.get(key) else {
            continue;
        };
        if records_equal(previous_record, current_record) {
            outcome.unchanged += 1;
            continue;
        }
        let fields = field_changes(previous_record, current_record);
        if fields.is_empty() {
            outcome.unchanged += 1;
            continue;
        }
        let summary = describe_record(current_record);
        outcome
            .change_log
            .push(format!("Changes in Assignment ({summary}):"));
        outcome
            .change_log
            .extend(fields.iter().map(|change| format!("  - {}", change.describe())));
        outcome.changed.push(RecordChange {
            key: key.clone(),
            summary,
            fields,
        });
    }

    outcome.has_changes = !outcome.change_log.is_empty();
    outcome
}

fn index_by_identity(records: &[NormalizedRecord]) -> (BTreeMap<IdentityKey, &NormalizedRecord>, usize) {
    let mut index = BTreeMap::new();
    let mut duplicates = 0usize;
    for record in records {
        if index.insert(identity_key(record), record).is_some() {
            duplicates += 1;
        }
    }
    (index, duplicates)
}

/// Field-level differences, reported with the stored display values and only
/// when those differ beyond whitespace.
fn field_changes(previous: &NormalizedRecord, current: &NormalizedRecord) -> Vec<FieldChange> {
    let old_fields = comparable_fields(previous);
    let new_fields = comparable_fields(current);
    let names: BTreeSet<&String> = old_fields.keys().chain(new_fields.keys()).collect();

    let mut changes = Vec::new();
    for name in names {
        let old = old_fields.get(name);
        let new = new_fields.get(name);
        let old_cmp = old.map_or(EMPTY_SENTINEL, |f| f.compare.as_str());
        let new_cmp = new.map_or(EMPTY_SENTINEL, |f| f.compare.as_str());
        if old_cmp == new_cmp {
            continue;
        }
        let old_display = old.map_or_else(|| EMPTY_SENTINEL.to_string(), |f| f.display.clone());
        let new_display = new.map_or_else(|| EMPTY_SENTINEL.to_string(), |f| f.display.clone());
        if collapse(&old_display) == collapse(&new_display) {
            continue;
        }
        changes.push(FieldChange {
            field: name.clone(),
            old: old_display,
            new: new_display,
        });
    }
    changes
}

fn collapse(value: &str) -> String {
    crate::normalize::collapse_whitespace(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{normalize, RawRecord};

    fn record(pairs: &[(&str, &str)]) -> NormalizedRecord {
        normalize(&RawRecord::from_pairs(pairs.iter().copied()))
    }

    fn assignment(customer: &str, date_time: &str, language: &str, info: &str) -> NormalizedRecord {
        record(&[
            ("customer", customer),
            ("date_time", date_time),
            ("language", language),
            ("service_type", "In-person Interpretation"),
            ("info", info),
            ("comments", "Test comments"),
        ])
    }

    #[test]
    fn first_scrape_reports_everything_as_new() {
        let current = vec![assignment("Test School", "2/6/2025 10:15 AM", "French", "Test info")];
        let outcome = diff(&[], &current);
        assert!(outcome.has_changes);
        assert_eq!(outcome.newly_added.len(), 1);
        assert!(outcome.change_log.iter().any(|line| line.starts_with("New assignment added")
            && line.contains("test school")
            && line.contains("French")));
    }

    #[test]
    fn identical_scrape_has_no_changes() {
        let previous = vec![assignment("Test School", "2/6/2025 10:15 AM", "French", "Test info")];
        let current = vec![assignment("TEST SCHOOL", "02/06/2025 10:15 am", "French", "Test info")];
        let outcome = diff(&previous, &current);
        assert!(!outcome.has_changes);
        assert!(outcome.newly_added.is_empty());
        assert!(outcome.change_log.is_empty());
        assert_eq!(outcome.unchanged, 1);
    }

    #[test]
    fn info_change_is_a_modification_not_an_addition() {
        let previous = vec![assignment("Test School", "2/6/2025 10:15 AM", "French", "Test info")];
        let current = vec![assignment("Test School", "2/6/2025 10:15 AM", "French", "Different test info")];
        let outcome = diff(&previous, &current);
        assert!(outcome.has_changes);
        assert!(outcome.newly_added.is_empty());
        assert_eq!(outcome.changed.len(), 1);
        assert!(outcome
            .change_log
            .iter()
            .any(|line| line.starts_with("Changes in Assignment (")));
        assert!(outcome
            .change_log
            .contains(&"  - info: 'Test info' → 'Different test info'".to_string()));
    }

    #[test]
    fn whitespace_only_info_change_produces_no_field_lines() {
        let previous = vec![assignment("Acme", "2/6/2025 10:15 AM", "Spanish", "Room 4\nSecond floor")];
        let current = vec![assignment("Acme", "2/6/2025 10:15 AM", "Spanish", "Room   4\n\n Second floor")];
        let outcome = diff(&previous, &current);
        assert!(!outcome.has_changes);
        assert!(outcome.changed.is_empty());
    }

    #[test]
    fn removed_records_are_logged_but_not_returned() {
        let previous = vec![
            assignment("Acme", "2/6/2025 10:15 AM", "Spanish", "a"),
            assignment("Globex", "2/7/2025 2:30 PM", "Korean", "b"),
        ];
        let current = vec![assignment("Acme", "2/6/2025 10:15 AM", "Spanish", "a")];
        let outcome = diff(&previous, &current);
        assert!(outcome.has_changes);
        assert!(outcome.newly_added.is_empty());
        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.removed[0].customer, "globex");
        assert!(outcome
            .change_log
            .iter()
            .any(|line| line.starts_with("Assignment removed") && line.contains("globex")));
    }

    #[test]
    fn different_identity_is_new_even_when_descriptive_text_matches() {
        let previous = vec![assignment("Test School", "2/6/2025 10:15 AM", "French", "Same info")];
        let current = vec![
            assignment("Test School", "2/6/2025 10:15 AM", "French", "Same info"),
            assignment("Another School", "2/7/2025 2:30 PM", "Spanish", "Same info"),
        ];
        let outcome = diff(&previous, &current);
        assert_eq!(outcome.newly_added.len(), 1);
        assert_eq!(outcome.newly_added[0].get_str("customer"), Some("another school"));
    }

    #[test]
    fn every_distinct_key_lands_in_exactly_one_bucket() {
        let previous = vec![
            assignment("A", "2/1/2025 9:00 AM", "French", "x"),
            assignment("B", "2/2/2025 9:00 AM", "French", "x"),
            assignment("C", "2/3/2025 9:00 AM", "French", "x"),
        ];
        let current = vec![
            assignment("B", "2/2/2025 9:00 AM", "French", "x"),
            assignment("C", "2/3/2025 9:00 AM", "French", "changed"),
            assignment("D", "2/4/2025 9:00 AM", "French", "x"),
            assignment("E", "2/5/2025 9:00 AM", "French", "x"),
        ];
        let outcome = diff(&previous, &current);
        let distinct: BTreeSet<IdentityKey> = previous.iter().chain(current.iter()).map(identity_key).collect();
        assert_eq!(
            outcome.newly_added.len() + outcome.removed.len() + outcome.changed.len() + outcome.unchanged,
            distinct.len()
        );
        assert_eq!(outcome.newly_added.len(), 2);
        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.changed.len(), 1);
        assert_eq!(outcome.unchanged, 1);
    }

    // Two genuinely different postings sharing an identity key collapse into
    // one; the outcome must at least say so.
    #[test]
    fn duplicate_identity_keys_collapse_last_wins_and_are_counted() {
        let current = vec![
            assignment("Acme", "2/6/2025 10:15 AM", "Spanish", "first posting"),
            assignment("Acme", "2/6/2025 10:15 AM", "Spanish", "second posting"),
        ];
        let outcome = diff(&[], &current);
        assert_eq!(outcome.duplicate_current, 1);
        assert_eq!(outcome.newly_added.len(), 1);
        assert_eq!(outcome.newly_added[0].get_str("info"), Some("second posting"));
    }
}
