//! Point-in-time pool statistics exposed through `GET /status`.

use serde::Serialize;

/// The `GET /status` response body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub idle_workers_in_pool: usize,
    pub is_initializing: bool,
}
