//! Snapshot persistence, legacy report I/O and HTTP fetch utilities.

use std::path::{Path, PathBuf};

use assignwatch_core::{diff, DiffOutcome, NormalizedRecord};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};
use uuid::Uuid;

pub mod http;
pub mod legacy;

pub use http::{
    is_transient, status_action, FetchError, FetchedPage, FetcherConfig, HttpFetcher, RetrySchedule,
    StatusAction,
};
pub use legacy::{parse_legacy_report, render_legacy_report};

pub const CRATE_NAME: &str = "assignwatch-storage";

pub const HISTORY_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignments: Vec<NormalizedRecord>,
}

/// On-disk document: current records plus a bounded history of prior sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, with = "lenient_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignments: Vec<NormalizedRecord>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Snapshot {
    /// Drops history entries without a timestamp or older than the retention
    /// window ending at `now`.
    pub fn prune_history(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(HISTORY_RETENTION_DAYS);
        self.history
            .retain(|entry| entry.timestamp.is_some_and(|ts| ts > cutoff));
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serializing snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("writing snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// JSON snapshot file. Every public operation degrades instead of failing:
/// unreadable files load as empty and failed writes return `false`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Snapshot {
        match self.try_load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(path = %self.path.display(), "no snapshot yet, starting empty");
                Snapshot::default()
            }
            Err(err) => {
                error!(error = %err, "snapshot unreadable, starting empty");
                Snapshot::default()
            }
        }
    }

    async fn try_load(&self) -> Result<Option<Snapshot>, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    pub async fn records(&self) -> Vec<NormalizedRecord> {
        self.load().await.assignments
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        let mut snapshot = self.load().await;
        snapshot.prune_history(Utc::now());
        snapshot.history
    }

    pub async fn save(&self, records: &[NormalizedRecord]) -> bool {
        self.save_at(records, Utc::now()).await
    }

    /// Rotates the current records into history, prunes it relative to `now`
    /// and rewrites the file.
    pub async fn save_at(&self, records: &[NormalizedRecord], now: DateTime<Utc>) -> bool {
        let mut snapshot = self.load().await;
        if !snapshot.assignments.is_empty() {
            let previous = std::mem::take(&mut snapshot.assignments);
            snapshot.history.push(HistoryEntry {
                timestamp: snapshot.last_updated,
                assignments: previous,
            });
        }
        snapshot.prune_history(now);
        snapshot.last_updated = Some(now);
        snapshot.assignments = records.to_vec();

        match self.write(&snapshot).await {
            Ok(()) => {
                info!(
                    path = %self.path.display(),
                    records = records.len(),
                    history = snapshot.history.len(),
                    "snapshot saved"
                );
                true
            }
            Err(err) => {
                error!(error = %err, "snapshot save failed");
                false
            }
        }
    }

    /// Diffs `new_records` against the stored set. Nothing is persisted.
    pub async fn compare_and_swap(&self, new_records: &[NormalizedRecord]) -> DiffOutcome {
        let stored = self.records().await;
        diff(&stored, new_records)
    }

    async fn write(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomically(&self.path, &bytes)
            .await
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// Writes through a temp file in the target directory, then renames over
/// `path`.
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}

/// RFC3339 on write. On read also accepts the naive ISO timestamps older
/// snapshots carry (taken as UTC); anything else reads as `None` with a warning.
mod lenient_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::warn;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }

    pub(crate) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(naive.and_utc());
        }
        warn!(value = raw, "unrecognized snapshot timestamp");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assignwatch_core::{normalize, RawRecord};
    use tempfile::tempdir;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("ts")
            .with_timezone(&Utc)
    }

    fn assignment(customer: &str, info: &str) -> NormalizedRecord {
        normalize(&RawRecord::from_pairs([
            ("customer", customer),
            ("date_time", "2/6/2025 10:15 AM"),
            ("language", "French"),
            ("service_type", "In-person Interpretation"),
            ("info", info),
            ("comments", "Test comments"),
        ]))
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_snapshot() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("data/assignments.json"));
        assert_eq!(store.load().await, Snapshot::default());
    }

    #[tokio::test]
    async fn corrupt_snapshot_loads_empty_and_everything_is_new() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("assignments.json");
        tokio::fs::write(&path, b"{ not json").await.expect("write");
        let store = SnapshotStore::new(&path);

        assert_eq!(store.load().await, Snapshot::default());
        let current = vec![assignment("Acme", "a"), assignment("Globex", "b")];
        let outcome = store.compare_and_swap(&current).await;
        assert_eq!(outcome.newly_added.len(), 2);
        assert!(outcome.has_changes);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_records() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("nested/dir/assignments.json"));
        let records = vec![assignment("Acme", "Room 4")];
        let now = ts("2025-02-06T12:00:00Z");

        assert!(store.save_at(&records, now).await);
        let snapshot = store.load().await;
        assert_eq!(snapshot.assignments, records);
        assert_eq!(snapshot.last_updated, Some(now));
        assert!(snapshot.history.is_empty());

        let raw: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(store.path()).await.expect("read")).expect("json");
        assert_eq!(raw["last_updated"], "2025-02-06T12:00:00+00:00");
        assert_eq!(raw["assignments"][0]["customer"], "acme");
    }

    #[tokio::test]
    async fn saving_rotates_previous_records_and_prunes_old_history() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("assignments.json"));

        assert!(store.save_at(&[assignment("A", "1")], ts("2025-02-01T09:00:00Z")).await);
        assert!(store.save_at(&[assignment("B", "2")], ts("2025-02-05T09:00:00Z")).await);
        let snapshot = store.load().await;
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.history[0].timestamp, Some(ts("2025-02-01T09:00:00Z")));
        assert_eq!(snapshot.history[0].assignments[0].get_str("customer"), Some("a"));

        // The entry stamped 02-01 falls outside the window ending 02-10.
        assert!(store.save_at(&[assignment("C", "3")], ts("2025-02-10T09:00:00Z")).await);
        let snapshot = store.load().await;
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.history[0].timestamp, Some(ts("2025-02-05T09:00:00Z")));
        assert_eq!(snapshot.assignments[0].get_str("customer"), Some("c"));
    }

    #[tokio::test]
    async fn compare_and_swap_does_not_persist() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("assignments.json"));
        assert!(store.save(&[assignment("Acme", "old")]).await);

        let outcome = store.compare_and_swap(&[assignment("Acme", "new")]).await;
        assert_eq!(outcome.changed.len(), 1);
        assert_eq!(store.records().await[0].get_str("info"), Some("old"));
    }

    #[tokio::test]
    async fn failed_write_returns_false() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, b"file, not dir").await.expect("write");
        let store = SnapshotStore::new(blocker.join("assignments.json"));
        assert!(!store.save(&[assignment("Acme", "x")]).await);
    }

    #[tokio::test]
    async fn naive_timestamps_from_older_snapshots_are_accepted() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("assignments.json");
        let body = r#"{
            "last_updated": "2025-02-06T10:15:30.123456",
            "assignments": [{"customer": "acme", "language": "French"}],
            "history": [{"timestamp": null, "assignments": []}]
        }"#;
        tokio::fs::write(&path, body).await.expect("write");

        let snapshot = SnapshotStore::new(&path).load().await;
        assert_eq!(snapshot.assignments.len(), 1);
        assert_eq!(
            snapshot.last_updated.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            Some("2025-02-06 10:15:30".to_string())
        );
        assert_eq!(snapshot.history[0].timestamp, None);
    }

    #[tokio::test]
    async fn history_view_is_pruned() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("assignments.json"));
        let long_ago = Utc::now() - Duration::days(30);
        assert!(store.save_at(&[assignment("A", "1")], long_ago).await);
        assert!(store.save_at(&[assignment("B", "2")], long_ago + Duration::hours(1)).await);
        assert_eq!(store.load().await.history.len(), 1);
        assert!(store.history().await.is_empty());
    }

    #[test]
    fn unrecognized_timestamp_reads_as_none() {
        assert_eq!(lenient_timestamp::parse("yesterday"), None);
        assert_eq!(
            lenient_timestamp::parse("2025-02-06T10:15:00Z"),
            Some(ts("2025-02-06T10:15:00Z"))
        );
    }
}
