//! The `Sandbox` and `SessionBinding` data model: one pooled container and
//! the session, if any, it is currently bound to.

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Container created, health probe not yet confirmed.
    Warming,
    /// Healthy, unbound, and available for a new session to claim.
    Idle,
    /// Bound to a session. Stays `Busy` for the sandbox's whole bound
    /// lifetime, not just while a request is actually in flight — per the
    /// state machine, a successful reply leaves it `Busy` with only its
    /// activity timestamp touched. It never reverts to `Idle` while bound;
    /// the only way out is destruction (`release`/`record_failure`/idle
    /// recycling).
    Busy,
}

/// One pooled, isolated container. Once bound to a session it stays bound
/// for its whole lifetime — "cattle not pets" means a bad sandbox is
/// destroyed and replaced, never unbound and recycled back into the
/// pre-warmed pool.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub container_id: String,
    pub base_url: String,
    pub state: SandboxState,
    pub session_id: Option<String>,
    pub created_at: Instant,
    pub last_used_at: Instant,
}

impl Sandbox {
    pub fn new(container_id: String, base_url: String) -> Self {
        let now = Instant::now();
        Self {
            container_id,
            base_url,
            state: SandboxState::Warming,
            session_id: None,
            created_at: now,
            last_used_at: now,
        }
    }

    pub fn is_unbound_idle(&self) -> bool {
        self.state == SandboxState::Idle && self.session_id.is_none()
    }
}
