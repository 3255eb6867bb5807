//! The Worker Pool Controller: the heart of the gateway. Owns sandbox
//! lifecycle, session binding, pre-warming, idle recycling, and the
//! destroy-and-replace failure model.
//!
//! Locking discipline: `inner` is a single `tokio::sync::Mutex` guarding
//! only the two index maps. All I/O — container creation, health probing,
//! destruction — happens with the lock released; the lock is re-acquired
//! only to commit or roll back an index mutation. Total container count is
//! bounded by a `tokio::sync::Semaphore` sized to `MaxTotalWorkers`; each
//! live `SandboxRecord` owns one permit, so dropping a record frees
//! capacity automatically.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{GatewayConfig, WorkerImageConfig};
use crate::driver::{ContainerDriver, ContainerSpec, DEFAULT_CREATE_RETRIES, with_retries};
use crate::error::{GatewayError, Result};
use crate::health::HealthProber;

use super::registry::{PoolInner, SandboxRecord};
use super::sandbox::{Sandbox, SandboxState};
use super::stats::PoolSnapshot;

pub struct WorkerPoolController {
    driver: Arc<dyn ContainerDriver>,
    prober: HealthProber,
    worker_image: WorkerImageConfig,
    min_idle_workers: usize,
    max_total_workers: usize,
    worker_idle_timeout: std::time::Duration,
    inner: Mutex<PoolInner>,
    semaphore: Arc<tokio::sync::Semaphore>,
    /// True until the pre-warm replenisher completes at least one pass.
    /// `acquire` refuses to provision just-in-time capacity while this is
    /// set so a cold-start flood of requests doesn't each race to create a
    /// sandbox; `GET /status` also surfaces it verbatim.
    is_initializing: AtomicBool,
}

impl WorkerPoolController {
    pub fn new(config: &GatewayConfig, driver: Arc<dyn ContainerDriver>) -> Arc<Self> {
        let prober = HealthProber::new(config.health.health_timeout, config.health.probe_interval);
        Self::new_with_prober(config, driver, prober)
    }

    /// Like [`Self::new`], but with an explicit [`HealthProber`] rather than
    /// one built from `config`. Controller unit tests pair this with
    /// [`HealthProber::always_ok`] and [`crate::driver::fake::FakeContainerDriver`],
    /// which has no real `/health` endpoint for a genuine prober to reach.
    pub fn new_with_prober(config: &GatewayConfig, driver: Arc<dyn ContainerDriver>, prober: HealthProber) -> Arc<Self> {
        Arc::new(Self {
            driver,
            prober,
            worker_image: config.worker_image.clone(),
            min_idle_workers: config.pool.min_idle_workers,
            max_total_workers: config.pool.max_total_workers,
            worker_idle_timeout: config.pool.worker_idle_timeout,
            inner: Mutex::new(PoolInner::new()),
            semaphore: Arc::new(tokio::sync::Semaphore::new(config.pool.max_total_workers)),
            // Starts `false` so a freshly-constructed controller (as every
            // unit test builds one) is immediately usable; real process
            // startup drives this explicitly via `begin_initialization`/
            // `finish_initialization` around its boot sequence.
            is_initializing: AtomicBool::new(false),
        })
    }

    /// Marks the pool as not yet ready: `acquire` refuses to provision
    /// just-in-time capacity and `GET /status` reports `is_initializing:
    /// true` until `finish_initialization` is called. Call once, before
    /// `cleanup_stale_on_boot`/the first `replenish_once`.
    pub fn begin_initialization(&self) {
        self.is_initializing.store(true, Ordering::SeqCst);
    }

    /// Marks the pool ready after its first pre-warm pass.
    pub fn finish_initialization(&self) {
        self.is_initializing.store(false, Ordering::SeqCst);
    }

    /// Destroys every container carrying the gateway's management label
    /// before the pool starts serving — a previous process's containers
    /// are orphans by definition, since this gateway never persists
    /// session state across restarts.
    pub async fn cleanup_stale_on_boot(&self) {
        match self.driver.list_managed(&self.worker_image.management_label).await {
            Ok(ids) => {
                for id in ids {
                    if let Err(err) = self.driver.destroy(&id).await {
                        tracing::warn!(container_id = %id, %err, "failed to remove stale container at boot");
                    } else {
                        tracing::info!(container_id = %id, "removed stale container left over from a previous run");
                    }
                }
            }
            Err(err) => tracing::warn!(%err, "failed to list stale containers at boot"),
        }
    }

    /// Binds `session_id` to a sandbox, creating one if no sandbox is
    /// already bound and no pre-warmed sandbox is available.
    ///
    /// A session already bound to a `Busy` sandbox is returned as-is rather
    /// than rejected: a second concurrent request for the same session
    /// serializes on the container's own processing, not something the pool
    /// controller queues or refuses — the Request Proxy forwards both calls
    /// and the sandbox's single in-flight-execute mutex does the serializing.
    pub async fn acquire(&self, session_id: &str) -> Result<Sandbox> {
        // Fast path and idle-claim share one locked critical section: both
        // the "is this session already bound" check and the "claim a
        // pre-warmed sandbox and bind it" commit must happen atomically, or
        // two concurrent first-time acquires for the same brand-new session
        // could each pass the bound-check, each independently claim (or
        // create) a sandbox, and race to overwrite each other's entry in
        // `inner.sessions` — leaking the loser's permit until the idle
        // recycler eventually times it out.
        {
            let mut inner = self.inner.lock().await;
            if let Some(container_id) = inner.sessions.get(session_id).cloned()
                && let Some(record) = inner.sandboxes.get_mut(&container_id)
            {
                record.sandbox.state = SandboxState::Busy;
                record.sandbox.last_used_at = Instant::now();
                return Ok(record.sandbox.clone());
            }
            if let Some(container_id) = inner.take_unbound_idle() {
                let record = inner.sandboxes.get_mut(&container_id).expect("just located");
                record.sandbox.session_id = Some(session_id.to_string());
                record.sandbox.state = SandboxState::Busy;
                record.sandbox.last_used_at = Instant::now();
                inner.sessions.insert(session_id.to_string(), container_id);
                return Ok(record.sandbox.clone());
            }
        }

        // No existing binding and nothing pre-warmed. While the pool hasn't
        // completed its first pre-warm pass, refuse rather than let a
        // cold-start flood each race a just-in-time creation.
        if self.is_initializing.load(Ordering::SeqCst) {
            return Err(GatewayError::Initializing);
        }

        // Create a new sandbox bound directly to this session. Acquire the
        // capacity permit before doing any I/O so concurrent callers see a
        // consistent NoCapacity signal.
        let permit = Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| GatewayError::NoCapacity {
                reason: format!("at capacity ({} workers)", self.max_total_workers),
            })?;

        let sandbox = self.create_and_probe(permit, Some(session_id.to_string())).await?;
        Ok(sandbox)
    }

    /// Creates one container, waits for it to become healthy, and commits
    /// it into the registry bound to `session_id` (or unbound, pre-warmed,
    /// if `session_id` is `None`). On any failure the permit is dropped,
    /// freeing capacity, and no partial state is committed.
    async fn create_and_probe(
        &self,
        permit: tokio::sync::OwnedSemaphorePermit,
        session_id: Option<String>,
    ) -> Result<Sandbox> {
        let container_id_hint = format!("sandbox-{}", Uuid::new_v4());
        let mut labels = HashMap::new();
        let (label_key, label_value) = self
            .worker_image
            .management_label
            .split_once('=')
            .unwrap_or((self.worker_image.management_label.as_str(), "true"));
        labels.insert(label_key.to_string(), label_value.to_string());

        let spec = ContainerSpec {
            name: container_id_hint.clone(),
            image: self.worker_image.image.clone(),
            network: self.worker_image.internal_network_name.clone(),
            env: Vec::new(),
            memory_limit_bytes: self.worker_image.memory_limit_bytes,
            cpu_quota: self.worker_image.cpu_quota,
            disk_limit_bytes: self.worker_image.disk_limit_bytes,
            labels,
        };

        let handle = with_retries(DEFAULT_CREATE_RETRIES, || self.driver.create(&spec))
            .await
            .map_err(|e| GatewayError::CreationFailed {
                session_id: session_id.clone().unwrap_or_else(|| "<pre-warm>".to_string()),
                reason: e.to_string(),
            })?;

        let mut sandbox = Sandbox::new(handle.container_id.clone(), handle.base_url());

        if let Err(err) = self.prober.wait_until_healthy(&sandbox.base_url).await {
            let _ = self.driver.destroy(&handle.container_id).await;
            drop(permit);
            return Err(GatewayError::CreationFailed {
                session_id: session_id.unwrap_or_else(|| "<pre-warm>".to_string()),
                reason: err.to_string(),
            });
        }

        sandbox.state = SandboxState::Idle;
        sandbox.session_id = session_id.clone();
        if session_id.is_some() {
            sandbox.state = SandboxState::Busy;
        }

        let container_id = sandbox.container_id.clone();
        let mut inner = self.inner.lock().await;
        if let Some(session_id) = &session_id
            && let Some(winner_container_id) = inner.sessions.get(session_id).cloned()
        {
            // Lost a race: another concurrent `acquire` for this same
            // session already committed a binding while this creation was
            // in flight (container create + health probe happen without
            // holding the lock). Our sandbox is pure waste — tear it down
            // outside the lock rather than silently overwrite the winner's
            // entry, and hand back the winner's sandbox instead.
            drop(inner);
            let _ = self.driver.destroy(&container_id).await;
            drop(permit);
            let inner = self.inner.lock().await;
            let winner = inner
                .sandboxes
                .get(&winner_container_id)
                .expect("a session binding always references a live record")
                .sandbox
                .clone();
            return Ok(winner);
        }
        if let Some(session_id) = &session_id {
            inner.sessions.insert(session_id.clone(), container_id.clone());
        }
        inner
            .sandboxes
            .insert(container_id, SandboxRecord { sandbox: sandbox.clone(), _permit: permit });

        Ok(sandbox)
    }

    /// Releases `session_id`'s sandbox. Unconditional: per the spec, a
    /// binding is torn down and removed from every index, and the
    /// container destroyed asynchronously. Idempotent — releasing an
    /// unknown or already-released session is a no-op.
    pub async fn release(&self, session_id: &str) {
        let container_id = {
            let inner = self.inner.lock().await;
            inner.sessions.get(session_id).cloned()
        };
        let Some(container_id) = container_id else {
            return;
        };
        self.destroy_sandbox(&container_id).await;
    }

    /// Marks the sandbox bound to `session_id` as contaminated. Semantically
    /// identical to [`Self::release`] — kept as a distinct name because the
    /// Request Proxy calls it from a different site (a non-recoverable
    /// proxy-layer error) with a different intent (cattle, not pets: never
    /// attempt repair).
    pub async fn record_failure(&self, session_id: &str) {
        self.release(session_id).await;
    }

    /// Refreshes `session_id`'s last-activity timestamp without touching its
    /// binding or state. Per the state machine, a sandbox that successfully
    /// answers a request — or returns a pure user-code error, which the
    /// gateway's policy preserves rather than destroys — "stays Busy, touch
    /// timestamp"; it is never demoted back to `Idle` while bound.
    pub async fn touch(&self, session_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(container_id) = inner.sessions.get(session_id).cloned()
            && let Some(record) = inner.sandboxes.get_mut(&container_id)
        {
            record.sandbox.last_used_at = Instant::now();
        }
    }

    async fn destroy_sandbox(&self, container_id: &str) {
        let record = {
            let mut inner = self.inner.lock().await;
            inner.remove(container_id)
        };
        let Some(record) = record else { return };
        if let Err(err) = self.driver.destroy(container_id).await {
            tracing::warn!(container_id, %err, "failed to destroy sandbox container");
        }
        drop(record); // releases the semaphore permit
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let inner = self.inner.lock().await;
        PoolSnapshot {
            total_workers: inner.total_count(),
            busy_workers: inner.sessions.len(),
            idle_workers_in_pool: inner.idle_unbound_count(),
            is_initializing: self.is_initializing.load(Ordering::SeqCst),
        }
    }

    /// Looks up the currently-bound sandbox for a session without
    /// transitioning its state — used by the proxy to forward a request
    /// once `acquire` has already marked it `Busy`.
    pub async fn lookup(&self, session_id: &str) -> Option<Sandbox> {
        let inner = self.inner.lock().await;
        let container_id = inner.sessions.get(session_id)?;
        inner.sandboxes.get(container_id).map(|r| r.sandbox.clone())
    }

    /// Tops the pre-warmed pool up to `min_idle_workers`, respecting
    /// `max_total_workers`. Intended to run on a fixed interval from
    /// `spawn_replenisher`.
    pub async fn replenish_once(self: &Arc<Self>) {
        loop {
            let idle = {
                let inner = self.inner.lock().await;
                inner.idle_unbound_count()
            };
            if idle >= self.min_idle_workers {
                return;
            }
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                return; // at capacity; nothing more to do this round
            };
            if let Err(err) = self.create_and_probe(permit, None).await {
                tracing::warn!(%err, "pre-warm replenish failed");
                return;
            }
        }
    }

    /// Destroys bound (`Busy`) sandboxes whose last activity is older than
    /// `worker_idle_timeout` — regardless of whether a request happens to
    /// be in flight at the instant of the scan, since a sandbox stays
    /// `Busy` for its whole bound lifetime, not just mid-request. Runs on
    /// `RecyclingInterval`.
    pub async fn recycle_idle_once(&self) {
        let stale: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .sandboxes
                .values()
                .filter(|r| r.sandbox.session_id.is_some() && r.sandbox.last_used_at.elapsed() >= self.worker_idle_timeout)
                .map(|r| r.sandbox.container_id.clone())
                .collect()
        };
        for container_id in stale {
            tracing::info!(container_id, "recycling idle sandbox past WorkerIdleTimeout");
            self.destroy_sandbox(&container_id).await;
        }
    }

    /// Spawns the pre-warm replenisher as a background task.
    pub fn spawn_replenisher(self: &Arc<Self>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                controller.replenish_once().await;
            }
        })
    }

    /// Spawns the idle recycler as a background task. Every scan is
    /// followed by a replenish pass, since destroying a long-idle sandbox
    /// is itself an event that can drop the pre-warmed pool below its
    /// floor.
    pub fn spawn_recycler(self: &Arc<Self>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                controller.recycle_idle_once().await;
                controller.replenish_once().await;
            }
        })
    }
}
