//! Health Prober: polls a sandbox's `GET /health` endpoint until it answers
//! or the configured timeout elapses.

use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
}

fn is_ok_body(body: &[u8]) -> bool {
    serde_json::from_slice::<HealthBody>(body)
        .map(|b| b.status == "ok")
        .unwrap_or(false)
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("health check did not succeed within {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("sandbox reported unhealthy: {reason}")]
    Unhealthy { reason: String },
}

pub type Result<T> = std::result::Result<T, ProbeError>;

#[derive(Clone)]
enum ProberKind {
    Http { client: reqwest::Client, timeout: Duration, interval: Duration },
    /// Bypasses all network I/O and reports healthy immediately. Used by
    /// controller unit tests that exercise pool bookkeeping against
    /// [`crate::driver::fake::FakeContainerDriver`], which never has a real
    /// `/health` endpoint listening behind it.
    AlwaysOk,
}

#[derive(Clone)]
pub struct HealthProber {
    kind: ProberKind,
}

impl HealthProber {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { kind: ProberKind::Http { client, timeout, interval } }
    }

    pub fn always_ok() -> Self {
        Self { kind: ProberKind::AlwaysOk }
    }

    /// Polls `GET {base_url}/health` until it returns `200` with body
    /// `{"status":"ok"}`, or bails out after `timeout` elapses. A reachable
    /// host answering with the wrong status or body is treated the same as
    /// an unreachable one: keep polling until the deadline, not a fatal
    /// failure mid-attempt.
    pub async fn wait_until_healthy(&self, base_url: &str) -> Result<()> {
        let ProberKind::Http { timeout, interval, .. } = &self.kind else {
            return Ok(());
        };
        let deadline = Instant::now() + *timeout;

        loop {
            if self.probe_once(base_url).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ProbeError::Timeout { timeout: *timeout });
            }
            tokio::time::sleep(*interval).await;
        }
    }

    /// A single probe, used by the idle recycler to re-check busy/idle
    /// sandboxes opportunistically without blocking on the full timeout.
    pub async fn probe_once(&self, base_url: &str) -> bool {
        let ProberKind::Http { client, .. } = &self.kind else {
            return true;
        };
        let url = format!("{base_url}/health");
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(body) => is_ok_body(&body),
                Err(_) => false,
            },
            _ => false,
        }
    }
}
