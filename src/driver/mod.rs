//! Container Driver: the thin async-trait boundary between the Worker Pool
//! Controller and whatever actually creates/destroys sandbox containers.
//!
//! A real deployment uses [`BollardContainerDriver`] against the Docker
//! Engine API. Tests use [`fake::FakeContainerDriver`], an in-memory
//! stand-in that never touches a container runtime — the controller's
//! acquire/release/record_failure logic is the thing under test, not Docker.

pub mod bollard_driver;
pub mod error;
pub mod fake;

pub use bollard_driver::BollardContainerDriver;
pub use error::{DriverError, Result};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

/// Default retry budget for a single container creation: retryable
/// failures get up to this many attempts with exponential backoff before
/// the caller gives up.
pub const DEFAULT_CREATE_RETRIES: usize = 3;

/// Runs `f` up to `max_attempts` times, retrying only on
/// [`DriverError::is_retryable`] failures, with exponential backoff
/// starting at 50ms between attempts. Fatal errors and the final attempt's
/// error are returned immediately.
pub async fn with_retries<F, Fut, T>(max_attempts: usize, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..max_attempts.max(1) {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = err.is_retryable();
                last_err = Some(err);
                if !retryable || attempt + 1 == max_attempts {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(attempt as u32))).await;
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

/// Everything needed to create one sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub env: Vec<(String, String)>,
    pub memory_limit_bytes: i64,
    pub cpu_quota: Option<i64>,
    /// Per-container writable-layer size cap in bytes, if the storage
    /// driver backing the engine supports one.
    pub disk_limit_bytes: Option<i64>,
    pub labels: HashMap<String, String>,
}

/// The internal HTTP port the sandbox agent listens on inside every
/// container. Fixed by the worker image contract.
pub const SANDBOX_AGENT_PORT: u16 = 8000;

/// A running container, reachable over the internal network at
/// `host:port`.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub container_id: String,
    pub host: String,
    pub port: u16,
}

impl ContainerHandle {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Abstraction over the container runtime. One coarse boundary so the pool
/// controller never talks to Docker directly.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Creates and starts a new container per `spec`. Does not wait for the
    /// workload inside to become healthy — that is the Health Prober's job.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Force-removes a container. Idempotent: removing an already-gone
    /// container is not an error.
    async fn destroy(&self, container_id: &str) -> Result<()>;

    /// Whether the container is currently in the running state.
    async fn is_running(&self, container_id: &str) -> Result<bool>;

    /// Lists the ids of all containers carrying the gateway's management
    /// label, used by the Worker Pool Controller's stale-cleanup-at-boot
    /// sweep.
    async fn list_managed(&self, label: &str) -> Result<Vec<String>>;
}
