//! Raw-record sources: the live assignment portal and file fixtures.

use std::path::{Path, PathBuf};

use assignwatch_core::{fields, RawRecord};
use assignwatch_storage::{FetchError, HttpFetcher};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "assignwatch-adapters";

pub const DEFAULT_PORTAL_URL: &str = "https://www.lbridge.com/Interpreters/open_assignments.aspx";

/// Table locators tried in order; the first that matches anything wins.
pub const TABLE_LOCATORS: &[&str] = &[
    "table#gvOrders",
    "table[id*='gvOrders']",
    "table[role='grid']",
    "table.grid",
    "div.gridview table",
    "table",
];

/// Listing columns in page order.
pub const LISTING_COLUMNS: [&str; 6] = [
    fields::CUSTOMER,
    fields::DATE_TIME,
    fields::LANGUAGE,
    fields::SERVICE_TYPE,
    fields::INFO,
    fields::COMMENTS,
];

/// Authenticated session established outside this crate. The cookie is
/// passed through verbatim.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub run_id: Uuid,
    cookie: Option<String>,
}

impl SessionHandle {
    pub fn new(run_id: Uuid, cookie: Option<String>) -> Self {
        Self { run_id, cookie }
    }

    pub fn anonymous(run_id: Uuid) -> Self {
        Self::new(run_id, None)
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("session expired: portal redirected to {url}")]
    SessionExpired { url: String },
    #[error("reading fixture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing fixture {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported fixture type: {0}")]
    UnsupportedFixture(PathBuf),
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait RawRecordSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_raw_records(&self, session: &SessionHandle) -> Result<Vec<RawRecord>, SourceError>;
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Message(e.to_string()))
}

/// Text nodes of a cell, trimmed and joined with newlines so multi-line
/// blocks keep their line structure.
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts listing rows from the portal page. Rows with fewer than six
/// cells (headers, pagers) are skipped; a page without a table yields
/// nothing.
pub fn parse_assignment_table(html: &str) -> Result<Vec<RawRecord>, SourceError> {
    let document = Html::parse_document(html);
    let row_sel = selector("tr")?;
    let cell_sel = selector("td")?;

    for locator in TABLE_LOCATORS {
        let table_sel = selector(locator)?;
        let Some(table) = document.select(&table_sel).next() else {
            continue;
        };
        debug!(locator, "assignment table located");

        let mut records = Vec::new();
        for row in table.select(&row_sel) {
            let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();
            if cells.len() < LISTING_COLUMNS.len() {
                continue;
            }
            let record = RawRecord::from_pairs(
                LISTING_COLUMNS
                    .iter()
                    .zip(cells.iter())
                    .map(|(field, cell)| (*field, cell_text(*cell))),
            );
            records.push(record);
        }
        return Ok(records);
    }

    warn!("no assignment table found on page");
    Ok(Vec::new())
}

/// Live listing page fetched with the caller's session.
#[derive(Debug)]
pub struct PortalSource {
    url: String,
    http: HttpFetcher,
}

impl PortalSource {
    pub fn new(url: impl Into<String>, http: HttpFetcher) -> Self {
        Self { url: url.into(), http }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn looks_like_login_page(final_url: &str) -> bool {
    final_url.to_ascii_lowercase().contains("login.aspx")
}

#[async_trait]
impl RawRecordSource for PortalSource {
    fn source_id(&self) -> &str {
        "portal"
    }

    async fn fetch_raw_records(&self, session: &SessionHandle) -> Result<Vec<RawRecord>, SourceError> {
        let page = self
            .http
            .fetch_page(session.run_id, self.source_id(), &self.url, session.cookie())
            .await?;
        if looks_like_login_page(&page.final_url) {
            return Err(SourceError::SessionExpired { url: page.final_url });
        }
        let records = parse_assignment_table(&page.body)?;
        info!(records = records.len(), url = %page.final_url, "listing page parsed");
        Ok(records)
    }
}

/// Records read from disk: a `.json` array of objects or a saved `.html`
/// listing page.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    path: PathBuf,
}

impl FixtureSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RawRecordSource for FixtureSource {
    fn source_id(&self) -> &str {
        "fixture"
    }

    async fn fetch_raw_records(&self, _session: &SessionHandle) -> Result<Vec<RawRecord>, SourceError> {
        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let read = || {
            std::fs::read_to_string(&self.path).map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })
        };

        let records = match extension.as_deref() {
            Some("json") => serde_json::from_str(&read()?).map_err(|source| SourceError::Json {
                path: self.path.clone(),
                source,
            })?,
            Some("html") | Some("htm") => parse_assignment_table(&read()?)?,
            _ => return Err(SourceError::UnsupportedFixture(self.path.clone())),
        };
        info!(records = records.len(), path = %self.path.display(), "fixture records loaded");
        Ok(records)
    }
}
