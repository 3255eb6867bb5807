//! The pool's in-memory indexes, guarded by one coarse mutex per the
//! locking discipline: index mutations happen only under this lock, all
//! I/O (container create/destroy, health probes) happens outside it.

use std::collections::HashMap;

use tokio::sync::OwnedSemaphorePermit;

use super::sandbox::Sandbox;

/// A registered sandbox plus the semaphore permit it holds. Dropping the
/// record drops the permit, which is how the `registry size <=
/// MaxTotalWorkers` invariant is enforced structurally rather than by
/// manual counting.
pub struct SandboxRecord {
    pub sandbox: Sandbox,
    pub _permit: OwnedSemaphorePermit,
}

#[derive(Default)]
pub struct PoolInner {
    /// container_id -> record. The source of truth.
    pub sandboxes: HashMap<String, SandboxRecord>,
    /// session_id -> container_id. Invariant: every key here names a value
    /// present in `sandboxes` whose `sandbox.session_id` equals that key.
    pub sessions: HashMap<String, String>,
}

impl PoolInner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks any unbound, healthy sandbox to satisfy a new session —
    /// first-found is fine, the pool makes no ordering guarantee among
    /// interchangeable pre-warmed containers.
    pub fn take_unbound_idle(&self) -> Option<String> {
        self.sandboxes
            .values()
            .find(|r| r.sandbox.is_unbound_idle())
            .map(|r| r.sandbox.container_id.clone())
    }

    pub fn idle_unbound_count(&self) -> usize {
        self.sandboxes.values().filter(|r| r.sandbox.is_unbound_idle()).count()
    }

    pub fn total_count(&self) -> usize {
        self.sandboxes.len()
    }

    pub fn remove(&mut self, container_id: &str) -> Option<SandboxRecord> {
        let record = self.sandboxes.remove(container_id)?;
        if let Some(session_id) = &record.sandbox.session_id {
            self.sessions.remove(session_id);
        }
        Some(record)
    }
}
