//! Single-page HTTP fetch with retry/backoff for the assignment portal.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::COOKIE;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

/// What the fetch loop does with a response that is not a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Retry,
    SessionRejected,
    Fail,
}

pub fn status_action(status: StatusCode) -> StatusAction {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StatusAction::SessionRejected,
        StatusCode::TOO_MANY_REQUESTS => StatusAction::Retry,
        s if s.is_server_error() => StatusAction::Retry,
        _ => StatusAction::Fail,
    }
}

/// Timeouts and connection failures are worth another attempt.
pub fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Doubling wait between attempts, capped at `longest_wait`.
#[derive(Debug, Clone, Copy)]
pub struct RetrySchedule {
    pub retries: usize,
    pub first_wait: Duration,
    pub longest_wait: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            retries: 3,
            first_wait: Duration::from_millis(500),
            longest_wait: Duration::from_secs(8),
        }
    }
}

impl RetrySchedule {
    pub fn wait_before_retry(&self, retry: usize) -> Duration {
        let shift = u32::try_from(retry).unwrap_or(u32::MAX);
        let multiplier = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
        self.first_wait.saturating_mul(multiplier).min(self.longest_wait)
    }

    fn allows(&self, retry: usize) -> bool {
        retry < self.retries
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetrySchedule,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            retry: RetrySchedule::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("session rejected by {url} (status {status})")]
    Unauthorized { status: u16, url: String },
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetrySchedule,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> anyhow::Result<Self> {
        let builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        let builder = match config.user_agent {
            Some(agent) => builder.user_agent(agent),
            None => builder,
        };
        Ok(Self {
            client: builder.build().context("building portal http client")?,
            retry: config.retry,
        })
    }

    /// Fetches one page, sending `session_cookie` verbatim as the `Cookie`
    /// header. 401/403 are reported as [`FetchError::Unauthorized`] and never
    /// retried.
    pub async fn fetch_page(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
        session_cookie: Option<&str>,
    ) -> Result<FetchedPage, FetchError> {
        let span = info_span!("http_fetch", %run_id, source_id, url);
        self.fetch_with_retries(url, session_cookie)
            .instrument(span)
            .await
    }

    async fn fetch_with_retries(
        &self,
        url: &str,
        session_cookie: Option<&str>,
    ) -> Result<FetchedPage, FetchError> {
        let mut retry = 0usize;
        loop {
            let mut request = self.client.get(url);
            if let Some(cookie) = session_cookie {
                request = request.header(COOKIE, cookie);
            }

            let failure = match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    let body = resp.text().await?;
                    return Ok(FetchedPage {
                        status,
                        final_url,
                        body,
                    });
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let url = resp.url().to_string();
                    match status_action(resp.status()) {
                        StatusAction::SessionRejected => {
                            return Err(FetchError::Unauthorized { status, url })
                        }
                        StatusAction::Retry => FetchError::HttpStatus { status, url },
                        StatusAction::Fail => return Err(FetchError::HttpStatus { status, url }),
                    }
                }
                Err(err) if is_transient(&err) => FetchError::Request(err),
                Err(err) => return Err(FetchError::Request(err)),
            };

            if !self.retry.allows(retry) {
                return Err(failure);
            }
            warn!(error = %failure, retry, "retrying listing fetch");
            tokio::time::sleep(self.retry.wait_before_retry(retry)).await;
            retry += 1;
        }
    }
}
