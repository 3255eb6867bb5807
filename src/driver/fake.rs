//! In-memory [`ContainerDriver`] used by pool controller unit tests and by
//! the reference Sandbox Agent test harness. Never touches a real runtime.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ContainerDriver, ContainerHandle, ContainerSpec, DriverError, Result, SANDBOX_AGENT_PORT};

/// Tracks which container ids are "alive" so tests can assert on destroy
/// calls, and can be told to fail the next N creations to exercise the
/// controller's capacity-rollback path.
pub struct FakeContainerDriver {
    alive: Mutex<HashSet<String>>,
    counter: AtomicU64,
    fail_next_creates: Mutex<usize>,
    create_delay: Mutex<Option<Duration>>,
}

impl FakeContainerDriver {
    pub fn new() -> Self {
        Self {
            alive: Mutex::new(HashSet::new()),
            counter: AtomicU64::new(0),
            fail_next_creates: Mutex::new(0),
            create_delay: Mutex::new(None),
        }
    }

    pub fn fail_next_creates(&self, n: usize) {
        *self.fail_next_creates.lock().expect("lock poisoned") = n;
    }

    /// Makes every subsequent `create` sleep for `delay` before completing
    /// — used to force two concurrent creations to genuinely overlap
    /// rather than run back-to-back with no yield point between them.
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().expect("lock poisoned") = Some(delay);
    }

    pub fn alive_count(&self) -> usize {
        self.alive.lock().expect("lock poisoned").len()
    }

    pub fn is_alive(&self, id: &str) -> bool {
        self.alive.lock().expect("lock poisoned").contains(id)
    }
}

impl Default for FakeContainerDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerDriver for FakeContainerDriver {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        {
            let mut remaining = self.fail_next_creates.lock().expect("lock poisoned");
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DriverError::Create {
                    name: spec.name.clone(),
                    reason: "synthetic failure".to_string(),
                });
            }
        }
        let delay = *self.create_delay.lock().expect("lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let id = format!("fake-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.alive.lock().expect("lock poisoned").insert(id.clone());
        Ok(ContainerHandle {
            container_id: id,
            host: "127.0.0.1".to_string(),
            port: SANDBOX_AGENT_PORT,
        })
    }

    async fn destroy(&self, container_id: &str) -> Result<()> {
        self.alive.lock().expect("lock poisoned").remove(container_id);
        Ok(())
    }

    async fn is_running(&self, container_id: &str) -> Result<bool> {
        Ok(self.is_alive(container_id))
    }

    async fn list_managed(&self, _label: &str) -> Result<Vec<String>> {
        Ok(self.alive.lock().expect("lock poisoned").iter().cloned().collect())
    }
}
