use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use assignwatch_adapters::DEFAULT_PORTAL_URL;
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "watch.yaml";

#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    pub workspace_root: PathBuf,
    pub snapshot_path: PathBuf,
    pub reports_dir: PathBuf,
    pub outbox_dir: PathBuf,
    pub legacy_report_path: PathBuf,
    pub portal_url: String,
    pub fixture: Option<PathBuf>,
    pub session_cookie: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub email_user: Option<String>,
    pub notifier: NotifierKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Outbox,
    Log,
}

impl std::str::FromStr for NotifierKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "outbox" => Ok(Self::Outbox),
            "log" => Ok(Self::Log),
            other => anyhow::bail!("unknown notifier {other:?} (expected outbox or log)"),
        }
    }
}

/// Optional `watch.yaml`; every key mirrors an environment variable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WatchFile {
    snapshot_path: Option<PathBuf>,
    reports_dir: Option<PathBuf>,
    outbox_dir: Option<PathBuf>,
    legacy_report: Option<PathBuf>,
    portal_url: Option<String>,
    fixture: Option<PathBuf>,
    session_cookie: Option<String>,
    user_agent: Option<String>,
    http_timeout_secs: Option<u64>,
    email_user: Option<String>,
    notifier: Option<NotifierKind>,
}

impl WatchConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves settings from `lookup` (environment first), then
    /// `watch.yaml` in the workspace root, then defaults. Relative paths are
    /// anchored at the workspace root.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let workspace_root = lookup("ASSIGNWATCH_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let file = load_watch_file(&workspace_root)?;
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let path_or = |key: &str, from_file: Option<PathBuf>, default: &str| {
            let path = env(key)
                .map(PathBuf::from)
                .or(from_file)
                .unwrap_or_else(|| PathBuf::from(default));
            anchor(&workspace_root, path)
        };

        let http_timeout_secs = match env("ASSIGNWATCH_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("ASSIGNWATCH_HTTP_TIMEOUT_SECS is not a number: {raw}"))?,
            None => file.http_timeout_secs.unwrap_or(20),
        };

        let notifier = match env("ASSIGNWATCH_NOTIFIER") {
            Some(raw) => raw.parse()?,
            None => file.notifier.unwrap_or_default(),
        };

        Ok(Self {
            snapshot_path: path_or("ASSIGNWATCH_SNAPSHOT_PATH", file.snapshot_path, "data/assignments.json"),
            reports_dir: path_or("ASSIGNWATCH_REPORTS_DIR", file.reports_dir, "reports"),
            outbox_dir: path_or("ASSIGNWATCH_OUTBOX_DIR", file.outbox_dir, "outbox"),
            legacy_report_path: path_or("ASSIGNWATCH_LEGACY_REPORT", file.legacy_report, "assignments.txt"),
            portal_url: env("ASSIGNWATCH_PORTAL_URL")
                .or(file.portal_url)
                .unwrap_or_else(|| DEFAULT_PORTAL_URL.to_string()),
            fixture: env("ASSIGNWATCH_FIXTURE")
                .map(PathBuf::from)
                .or(file.fixture)
                .map(|p| anchor(&workspace_root, p)),
            session_cookie: env("ASSIGNWATCH_SESSION_COOKIE").or(file.session_cookie),
            user_agent: env("ASSIGNWATCH_USER_AGENT")
                .or(file.user_agent)
                .unwrap_or_else(|| "assignwatch/0.1".to_string()),
            http_timeout_secs,
            email_user: env("EMAIL_USER").or(file.email_user),
            notifier,
            workspace_root,
        })
    }
}

fn anchor(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

fn load_watch_file(root: &Path) -> Result<WatchFile> {
    let path = root.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(WatchFile::default());
    }
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
