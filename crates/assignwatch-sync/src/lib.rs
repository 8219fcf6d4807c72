//! Run orchestration: fetch, extract, normalize, validate, diff, persist,
//! notify and report.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use assignwatch_adapters::{FixtureSource, PortalSource, RawRecordSource, SessionHandle};
use assignwatch_core::{normalize_all, validate_all, DiffOutcome, FindingTally, NormalizedRecord, RawRecord};
use assignwatch_storage::{render_legacy_report, write_atomically, FetcherConfig, HttpFetcher, SnapshotStore};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod config;
pub mod extract;
pub mod notify;

pub use config::{NotifierKind, WatchConfig};
pub use extract::{extract_info_fields, with_info_fields};
pub use notify::{compose_notification, LogNotifier, Notification, Notifier, OutboxNotifier};

pub const CRATE_NAME: &str = "assignwatch-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    EmptyFetch,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub source_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched_records: usize,
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub duplicate_keys: usize,
    pub has_changes: bool,
    pub snapshot_saved: bool,
    pub notification_sent: bool,
    pub findings: FindingTally,
    pub reports_dir: String,
}

impl RunSummary {
    pub fn one_line(&self) -> String {
        format!(
            "check complete: run_id={} status={:?} fetched={} added={} removed={} changed={} saved={} notified={} reports={}",
            self.run_id,
            self.status,
            self.fetched_records,
            self.added,
            self.removed,
            self.changed,
            self.snapshot_saved,
            self.notification_sent,
            self.reports_dir
        )
    }
}

/// Raw records as the pipeline sees them: info sub-fields lifted, then
/// normalized.
pub fn prepare_records(raws: &[RawRecord]) -> Vec<NormalizedRecord> {
    let enriched: Vec<RawRecord> = raws.iter().map(with_info_fields).collect();
    normalize_all(&enriched)
}

pub struct WatchPipeline {
    config: WatchConfig,
    store: SnapshotStore,
    source: Box<dyn RawRecordSource>,
    notifier: Box<dyn Notifier>,
}

impl WatchPipeline {
    pub fn new(
        config: WatchConfig,
        store: SnapshotStore,
        source: Box<dyn RawRecordSource>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            source,
            notifier,
        }
    }

    /// Wires the configured source (fixture file or live portal), the
    /// snapshot file and the configured notifier.
    pub fn from_config(config: WatchConfig) -> Result<Self> {
        let store = SnapshotStore::new(config.snapshot_path.clone());
        let source: Box<dyn RawRecordSource> = match &config.fixture {
            Some(path) => Box::new(FixtureSource::new(path.clone())),
            None => {
                let http = HttpFetcher::new(FetcherConfig {
                    timeout: Duration::from_secs(config.http_timeout_secs),
                    user_agent: Some(config.user_agent.clone()),
                    ..Default::default()
                })?;
                Box::new(PortalSource::new(config.portal_url.clone(), http))
            }
        };
        let notifier: Box<dyn Notifier> = match config.notifier {
            NotifierKind::Outbox => Box::new(OutboxNotifier::new(
                config.outbox_dir.clone(),
                config.email_user.clone(),
            )),
            NotifierKind::Log => Box::new(LogNotifier),
        };
        Ok(Self::new(config, store, source, notifier))
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("watch_run", %run_id, source_id = self.source.source_id());
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunSummary> {
        let started_at = Utc::now();
        let session = SessionHandle::new(run_id, self.config.session_cookie.clone());
        let raws = self
            .source
            .fetch_raw_records(&session)
            .await
            .with_context(|| format!("fetching assignments from {}", self.source.source_id()))?;
        let reports_dir = self.config.reports_dir.join(run_id.to_string());

        let mut summary = RunSummary {
            run_id,
            source_id: self.source.source_id().to_string(),
            status: RunStatus::Completed,
            started_at,
            finished_at: started_at,
            fetched_records: raws.len(),
            added: 0,
            removed: 0,
            changed: 0,
            unchanged: 0,
            duplicate_keys: 0,
            has_changes: false,
            snapshot_saved: false,
            notification_sent: false,
            findings: FindingTally::default(),
            reports_dir: reports_dir.display().to_string(),
        };

        if raws.is_empty() {
            warn!("no assignments found; snapshot left untouched");
            summary.status = RunStatus::EmptyFetch;
            summary.finished_at = Utc::now();
            write_reports_or_warn(&reports_dir, &summary, &DiffOutcome::default()).await;
            return Ok(summary);
        }

        let records = prepare_records(&raws);
        let findings = validate_all(&records);
        summary.findings = FindingTally::from_findings(&findings);

        let outcome = self.store.compare_and_swap(&records).await;
        summary.added = outcome.newly_added.len();
        summary.removed = outcome.removed.len();
        summary.changed = outcome.changed.len();
        summary.unchanged = outcome.unchanged;
        summary.duplicate_keys = outcome.duplicate_current;
        summary.has_changes = outcome.has_changes;

        if outcome.has_changes {
            for line in &outcome.change_log {
                info!("{line}");
            }
            summary.snapshot_saved = self.store.save(&records).await;
        } else {
            info!(records = records.len(), "no changes detected");
        }

        if outcome.is_notifiable() {
            let notification = compose_notification(
                &outcome.newly_added,
                &outcome.change_log,
                Local::now().naive_local(),
            );
            match self.notifier.send(&notification).await {
                Ok(()) => summary.notification_sent = true,
                Err(err) => error!(notifier = self.notifier.name(), error = %err, "notification failed"),
            }
        }

        if let Err(err) = write_atomically(
            &self.config.legacy_report_path,
            render_legacy_report(&records).as_bytes(),
        )
        .await
        {
            warn!(
                path = %self.config.legacy_report_path.display(),
                error = %err,
                "legacy report export failed"
            );
        }

        summary.finished_at = Utc::now();
        write_reports_or_warn(&reports_dir, &summary, &outcome).await;
        info!(
            added = summary.added,
            removed = summary.removed,
            changed = summary.changed,
            saved = summary.snapshot_saved,
            notified = summary.notification_sent,
            "run complete"
        );
        Ok(summary)
    }
}

/// Reports are written after the snapshot is settled, so a failure here
/// only costs the report.
async fn write_reports_or_warn(reports_dir: &Path, summary: &RunSummary, outcome: &DiffOutcome) {
    if let Err(err) = write_reports(reports_dir, summary, outcome).await {
        warn!(path = %reports_dir.display(), error = %format!("{err:#}"), "run report not written");
    }
}

async fn write_reports(reports_dir: &Path, summary: &RunSummary, outcome: &DiffOutcome) -> Result<()> {
    fs::create_dir_all(reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let summary_json = serde_json::to_vec_pretty(&serde_json::json!({
        "summary": summary,
        "removed": outcome.removed,
        "changed": outcome.changed,
    }))
    .context("serializing run summary")?;
    fs::write(reports_dir.join("run_summary.json"), summary_json)
        .await
        .context("writing run_summary.json")?;

    fs::write(reports_dir.join("changes.md"), changes_markdown(summary, outcome))
        .await
        .context("writing changes.md")?;
    Ok(())
}

fn changes_markdown(summary: &RunSummary, outcome: &DiffOutcome) -> String {
    let mut out = format!(
        "# Assignment Changes\n\n- Run ID: `{}`\n- Source: {}\n- Started: {}\n- Finished: {}\n- Fetched: {}\n- Added: {}\n- Removed: {}\n- Changed: {}\n- Validation findings: {}\n",
        summary.run_id,
        summary.source_id,
        summary.started_at,
        summary.finished_at,
        summary.fetched_records,
        summary.added,
        summary.removed,
        summary.changed,
        summary.findings.total,
    );
    if summary.status == RunStatus::EmptyFetch {
        out.push_str("\nNo assignments were found on the listing page.\n");
    } else if outcome.change_log.is_empty() {
        out.push_str("\nNo changes detected.\n");
    } else {
        out.push_str("\n## Change Log\n\n```\n");
        for line in &outcome.change_log {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("```\n");
    }
    out
}

/// Resolves `path` against the workspace root unless it is absolute.
pub fn workspace_path(config: &WatchConfig, path: impl Into<PathBuf>) -> PathBuf {
    let path = path.into();
    if path.is_absolute() {
        path
    } else {
        config.workspace_root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assignwatch_adapters::SourceError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tempfile::{tempdir, TempDir};

    /// Serves one prepared batch per run.
    struct ScriptedSource {
        batches: Mutex<VecDeque<Result<Vec<RawRecord>, SourceError>>>,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Result<Vec<RawRecord>, SourceError>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
            }
        }
    }

    #[async_trait]
    impl RawRecordSource for ScriptedSource {
        fn source_id(&self) -> &str {
            "scripted"
        }

        async fn fetch_raw_records(&self, _session: &SessionHandle) -> Result<Vec<RawRecord>, SourceError> {
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<Notification>>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, notification: &Notification) -> Result<()> {
            if self.fail {
                anyhow::bail!("smtp unavailable");
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn config_in(dir: &TempDir) -> WatchConfig {
        let root = dir.path().to_str().expect("utf8 path").to_string();
        WatchConfig::from_lookup(move |key| (key == "ASSIGNWATCH_WORKSPACE").then(|| root.clone()))
            .expect("config")
    }

    fn listing(customer: &str, info: &str) -> RawRecord {
        RawRecord::from_pairs([
            ("customer", customer),
            ("date_time", "2/6/2025\n10:15 AM"),
            ("language", "French"),
            ("service_type", "In-person Interpretation"),
            ("info", info),
            ("comments", "Test comments"),
        ])
    }

    fn pipeline(
        dir: &TempDir,
        batches: Vec<Result<Vec<RawRecord>, SourceError>>,
        notifier: RecordingNotifier,
    ) -> WatchPipeline {
        let config = config_in(dir);
        let store = SnapshotStore::new(config.snapshot_path.clone());
        WatchPipeline::new(
            config,
            store,
            Box::new(ScriptedSource::new(batches)),
            Box::new(notifier),
        )
    }

    #[tokio::test]
    async fn first_run_saves_notifies_and_reports() {
        let dir = tempdir().expect("tempdir");
        let notifier = RecordingNotifier::default();
        let info = "Contact person's name and phone number: Jane Doe\n555-0100\nLocation: Room 4";
        let watch = pipeline(&dir, vec![Ok(vec![listing("Test School", info)])], notifier.clone());

        let summary = watch.run_once().await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.added, 1);
        assert!(summary.snapshot_saved);
        assert!(summary.notification_sent);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("Location: room 4"));

        let stored = watch.store().records().await;
        assert_eq!(stored[0].get_str("contact_person_name_and_phone"), Some("jane doe 555-0100"));
        assert_eq!(stored[0].get_str("date_time"), Some("02/06/2025 10:15 AM"));

        let reports = PathBuf::from(&summary.reports_dir);
        assert!(reports.join("run_summary.json").exists());
        let changes = std::fs::read_to_string(reports.join("changes.md")).unwrap();
        assert!(changes.contains("New assignment added"));
        let legacy = std::fs::read_to_string(dir.path().join("assignments.txt")).unwrap();
        assert!(legacy.starts_with("Bridge Assignments Report\n\nAssignment #1:\n"));
    }

    #[tokio::test]
    async fn recased_resubmission_is_quiet() {
        let dir = tempdir().expect("tempdir");
        let notifier = RecordingNotifier::default();
        let watch = pipeline(
            &dir,
            vec![
                Ok(vec![listing("Test School", "Test info")]),
                Ok(vec![listing("TEST SCHOOL", "Test info")]),
            ],
            notifier.clone(),
        );

        watch.run_once().await.unwrap();
        let second = watch.run_once().await.unwrap();
        assert!(!second.has_changes);
        assert!(!second.snapshot_saved);
        assert!(!second.notification_sent);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert!(watch.store().load().await.history.is_empty());
    }

    #[tokio::test]
    async fn info_only_change_is_saved_without_notification() {
        let dir = tempdir().expect("tempdir");
        let notifier = RecordingNotifier::default();
        let watch = pipeline(
            &dir,
            vec![
                Ok(vec![listing("Test School", "Test info")]),
                Ok(vec![listing("Test School", "Different test info")]),
            ],
            notifier.clone(),
        );

        watch.run_once().await.unwrap();
        let second = watch.run_once().await.unwrap();
        assert!(second.has_changes);
        assert_eq!(second.added, 0);
        assert_eq!(second.changed, 1);
        assert!(second.snapshot_saved);
        assert!(!second.notification_sent);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert_eq!(
            watch.store().records().await[0].get_str("info"),
            Some("Different test info")
        );
    }

    #[tokio::test]
    async fn notifier_failure_does_not_block_persistence() {
        let dir = tempdir().expect("tempdir");
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let watch = pipeline(&dir, vec![Ok(vec![listing("Acme", "x")])], notifier);

        let summary = watch.run_once().await.unwrap();
        assert!(summary.snapshot_saved);
        assert!(!summary.notification_sent);
        assert_eq!(watch.store().records().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_fetch_leaves_snapshot_alone() {
        let dir = tempdir().expect("tempdir");
        let notifier = RecordingNotifier::default();
        let watch = pipeline(
            &dir,
            vec![Ok(vec![listing("Acme", "x")]), Ok(Vec::new())],
            notifier.clone(),
        );

        watch.run_once().await.unwrap();
        let second = watch.run_once().await.unwrap();
        assert_eq!(second.status, RunStatus::EmptyFetch);
        assert!(!second.has_changes);
        assert!(!second.snapshot_saved);
        assert_eq!(watch.store().records().await.len(), 1);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert!(PathBuf::from(&second.reports_dir).join("changes.md").exists());
    }

    #[tokio::test]
    async fn source_failure_aborts_the_run() {
        let dir = tempdir().expect("tempdir");
        let watch = pipeline(
            &dir,
            vec![Err(SourceError::SessionExpired {
                url: "https://www.lbridge.com/Login.aspx".into(),
            })],
            RecordingNotifier::default(),
        );

        let err = watch.run_once().await.unwrap_err();
        assert!(format!("{err:#}").contains("session expired"));
        assert!(!dir.path().join("data/assignments.json").exists());
    }

    #[tokio::test]
    async fn unwritable_reports_dir_does_not_fail_the_run() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("reports"), b"not a directory").unwrap();
        let notifier = RecordingNotifier::default();
        let watch = pipeline(&dir, vec![Ok(vec![listing("Acme", "x")])], notifier.clone());

        let summary = watch.run_once().await.unwrap();
        assert!(summary.snapshot_saved);
        assert!(summary.notification_sent);
        assert!(!PathBuf::from(&summary.reports_dir).exists());
        assert_eq!(watch.store().records().await.len(), 1);
    }

    #[tokio::test]
    async fn validation_findings_are_tallied() {
        let dir = tempdir().expect("tempdir");
        let mut odd = listing("12345", "x");
        odd.insert("language", "Frnch");
        let watch = pipeline(&dir, vec![Ok(vec![odd])], RecordingNotifier::default());

        let summary = watch.run_once().await.unwrap();
        assert_eq!(summary.findings.count(assignwatch_core::FindingKind::PossibleTypo), 1);
        assert_eq!(summary.findings.count(assignwatch_core::FindingKind::InvalidCustomerName), 1);
    }
}
