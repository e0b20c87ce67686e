//! Background refresh of the remote policy snapshot.
//!
//! The poller fetches `endpoint + data_path` on a fixed delay, starting
//! immediately, extracts the blocking data at `document_path`, and publishes
//! the result through a shared [`SnapshotCell`]. A failed fetch is logged and
//! the previous snapshot stays in force.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::loader::{snapshot_from_document, SnapshotError};
use crate::snapshot::{PolicySnapshot, SnapshotCell};

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Floor for [`PolicyPoller::with_interval`]; `tokio::time::interval` panics
/// on a zero period.
const MIN_OVERRIDE_INTERVAL: Duration = Duration::from_millis(1);

/// Connection and scheduling settings for [`PolicyPoller`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Base URL of the policy service, e.g. `http://localhost:8181`.
    pub endpoint: String,
    /// Sent as `Authorization: Bearer <token>` when present.
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    /// Accept invalid TLS certificates.
    pub skip_verify: bool,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// JSON pointer to the blocking data inside the response document.
    pub document_path: String,
    /// Path appended to `endpoint` for each fetch.
    pub data_path: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8181".to_string(),
            auth_token: None,
            skip_verify: false,
            poll_interval_secs: 30,
            request_timeout_secs: 10,
            document_path: "/result/capture/http/request".to_string(),
            data_path: "/v1/data".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("failed to build policy client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("policy fetch failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("policy endpoint returned status {status}")]
    Status { status: reqwest::StatusCode },

    #[error(transparent)]
    Document(#[from] SnapshotError),

    #[error("auth token is not a valid header value")]
    InvalidToken,
}

/// Periodically refreshes a [`SnapshotCell`] from the policy service.
#[derive(Debug, Clone)]
pub struct PolicyPoller {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    document_path: String,
    snapshot: Arc<SnapshotCell>,
}

impl PolicyPoller {
    pub fn new(config: &PollerConfig, snapshot: Arc<SnapshotCell>) -> Result<Self, PollError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = config.auth_token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| PollError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.skip_verify)
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(PollError::Client)?;

        let url = format!(
            "{}{}",
            config.endpoint.trim_end_matches('/'),
            config.data_path
        );

        Ok(Self {
            client,
            url,
            interval: Duration::from_secs(config.poll_interval_secs).max(MIN_POLL_INTERVAL),
            document_path: config.document_path.clone(),
            snapshot,
        })
    }

    /// Override the refresh interval. Values below one second are allowed
    /// here so tests can poll quickly; zero is raised to one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_OVERRIDE_INTERVAL);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch once and publish the result. On error the cell is untouched.
    pub async fn poll_once(&self) -> Result<Arc<PolicySnapshot>, PollError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status { status });
        }

        let document: serde_json::Value = response.json().await?;
        let snapshot = snapshot_from_document(&document, &self.document_path)?;
        debug!(
            allow_entries = snapshot.allow_list.len(),
            deny_entries = snapshot.deny_list.len(),
            "policy snapshot fetched"
        );

        let snapshot = Arc::new(snapshot);
        self.snapshot.publish(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Run the refresh loop until `cancel` fires. The first fetch happens
    /// immediately; later fetches wait `interval` after the previous one.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                url = %self.url,
                interval_ms = self.interval.as_millis() as u64,
                "policy poller started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.poll_once().await {
                            warn!(
                                error = %err,
                                url = %self.url,
                                "policy refresh failed, keeping previous snapshot"
                            );
                        }
                    }
                }
            }

            info!("policy poller stopped");
        })
    }
}
