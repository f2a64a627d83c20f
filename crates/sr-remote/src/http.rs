//! Remote job service reached over HTTP.
//!
//! Protocol:
//!
//! - `POST {endpoint}/v1/sessions` with the API key as bearer token returns
//!   `{"token": "..."}`; every other call uses that session token.
//! - `POST {endpoint}/v1/jobs` submits a [`JobDescription`]; `409` means the
//!   id is already known.
//! - `GET {endpoint}/v1/jobs/{id}` returns `{"state": ..., "result": ...}`.
//! - `GET {endpoint}/v1/jobs/{id}/logs?offset=N` returns new log lines.
//! - `DELETE {endpoint}/v1/jobs/{id}` cancels.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use sr_core::{FailureKind, JobDescription, JobId, JobResult};

use crate::backend::{forward_log, ComputeBackend};
use crate::session::{Session, SessionStore};

/// Timeout for a single API request (not for the job).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Consecutive failed status polls tolerated before giving up on a job.
const MAX_POLL_FAILURES: u32 = 5;

#[derive(Debug, Deserialize)]
struct SessionResponse {
    token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RemoteState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RemoteState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: RemoteState,
    #[serde(default)]
    result: Option<JobResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    #[serde(default)]
    lines: Vec<String>,
    next_offset: u64,
}

/// Backend speaking the job-service protocol described above.
pub struct HttpBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    poll_interval: Duration,
    sessions: SessionStore,
    token: Mutex<Option<String>>,
}

impl HttpBackend {
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        poll_interval: Duration,
        sessions: SessionStore,
    ) -> sr_core::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| sr_core::Error::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            poll_interval,
            sessions,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.endpoint, path)
    }

    /// Current session token: memory, then the session file, then a fresh
    /// login. `fresh` skips the first two.
    async fn session_token(&self, fresh: bool) -> sr_core::Result<String> {
        if !fresh {
            if let Some(token) = self.token.lock().clone() {
                return Ok(token);
            }
            if let Some(session) = self.sessions.load() {
                tracing::debug!(path = %self.sessions.path().display(), "Reusing saved session");
                *self.token.lock() = Some(session.token.clone());
                return Ok(session.token);
            }
        }
        self.login().await
    }

    async fn login(&self) -> sr_core::Result<String> {
        tracing::info!(endpoint = %self.endpoint, "Authenticating with job service");
        let response = self
            .client
            .post(self.url("/sessions"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| sr_core::Error::Remote(format!("authentication request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(sr_core::Error::Configuration(format!(
                "job service rejected the API key ({status})"
            )));
        }
        if !status.is_success() {
            return Err(sr_core::Error::Remote(format!("authentication failed: {status}")));
        }
        let body: SessionResponse = response
            .json()
            .await
            .map_err(|e| sr_core::Error::Remote(format!("malformed session response: {e}")))?;

        let session = Session::new(body.token);
        if let Err(e) = self.sessions.save(&session) {
            tracing::warn!(error = %e, "Could not persist session");
        }
        *self.token.lock() = Some(session.token.clone());
        Ok(session.token)
    }

    /// Send an authenticated request, re-authenticating once if the session
    /// is rejected.
    async fn send<F>(&self, build: F) -> sr_core::Result<Response>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let token = self.session_token(false).await?;
        let response = build(&token)
            .send()
            .await
            .map_err(|e| sr_core::Error::Remote(format!("request failed: {e}")))?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!("Session rejected by job service; re-authenticating");
        self.sessions.clear();
        *self.token.lock() = None;
        let token = self.session_token(true).await?;
        build(&token)
            .send()
            .await
            .map_err(|e| sr_core::Error::Remote(format!("request failed: {e}")))
    }

    async fn status(&self, id: JobId) -> sr_core::Result<StatusResponse> {
        let url = self.url(&format!("/jobs/{id}"));
        let response = self.send(|token| self.client.get(&url).bearer_auth(token)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(sr_core::Error::Remote(format!("status poll returned {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| sr_core::Error::Remote(format!("malformed status response: {e}")))
    }

    /// Forward new log lines and return the next offset. Log failures never
    /// fail the job.
    async fn drain_logs(&self, id: JobId, offset: u64) -> u64 {
        let url = self.url(&format!("/jobs/{id}/logs"));
        let response = self
            .send(|token| {
                self.client
                    .get(&url)
                    .query(&[("offset", offset)])
                    .bearer_auth(token)
            })
            .await;

        let logs: LogsResponse = match response {
            Ok(r) if r.status().is_success() => match r.json().await {
                Ok(logs) => logs,
                Err(e) => {
                    tracing::debug!(job = %id, error = %e, "Malformed log response");
                    return offset;
                }
            },
            Ok(r) => {
                tracing::debug!(job = %id, status = %r.status(), "Log fetch failed");
                return offset;
            }
            Err(e) => {
                tracing::debug!(job = %id, error = %e, "Log fetch failed");
                return offset;
            }
        };

        for line in &logs.lines {
            forward_log(id, line);
        }
        logs.next_offset.max(offset)
    }
}

#[async_trait]
impl ComputeBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn execute(&self, job: &JobDescription) -> sr_core::Result<JobResult> {
        let url = self.url("/jobs");
        let response = self
            .send(|token| self.client.post(&url).bearer_auth(token).json(job))
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::CONFLICT => {
                return Ok(JobResult::failure(
                    FailureKind::Rejected,
                    format!("job service already knows job {}", job.id),
                ))
            }
            s => {
                let body = response.text().await.unwrap_or_default();
                return Err(sr_core::Error::Remote(format!(
                    "job submission returned {s}: {}",
                    body.trim()
                )));
            }
        }
        tracing::info!(job = %job.id, "Job accepted by job service");

        let mut offset = 0u64;
        let mut poll_failures = 0u32;
        loop {
            offset = self.drain_logs(job.id, offset).await;
            let status = match self.status(job.id).await {
                Ok(status) => {
                    poll_failures = 0;
                    status
                }
                Err(e) => {
                    poll_failures += 1;
                    if poll_failures >= MAX_POLL_FAILURES {
                        tracing::error!(
                            job = %job.id,
                            failures = poll_failures,
                            error = %e,
                            "Giving up on job status; cancelling"
                        );
                        if let Err(cancel_err) = self.cancel(job.id).await {
                            tracing::warn!(job = %job.id, error = %cancel_err, "Cancellation failed");
                        }
                        return Err(e);
                    }
                    tracing::warn!(
                        job = %job.id,
                        failures = poll_failures,
                        max_failures = MAX_POLL_FAILURES,
                        error = %e,
                        "Status poll failed; retrying"
                    );
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };
            tracing::debug!(job = %job.id, state = ?status.state, "Polled job");

            if status.state.is_terminal() {
                // Pick up lines written between the last drain and completion.
                self.drain_logs(job.id, offset).await;
                return Ok(match (status.state, status.result) {
                    (_, Some(result)) => result,
                    (RemoteState::Cancelled, None) => JobResult::failure(
                        FailureKind::Backend,
                        status.error.unwrap_or_else(|| "job was cancelled".into()),
                    ),
                    (_, None) => JobResult::failure(
                        FailureKind::Backend,
                        status
                            .error
                            .unwrap_or_else(|| "job finished without a result".into()),
                    ),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn cancel(&self, job: JobId) -> sr_core::Result<()> {
        let url = self.url(&format!("/jobs/{job}"));
        let response = self.send(|token| self.client.delete(&url).bearer_auth(token)).await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(sr_core::Error::Remote(format!(
                "cancel returned {}",
                response.status()
            )));
        }
        tracing::info!(job = %job, "Cancellation requested");
        Ok(())
    }
}
