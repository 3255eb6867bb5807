//! The pool registry and the Worker Pool Controller built on top of it.

pub mod controller;
pub mod registry;
pub mod sandbox;
pub mod stats;

pub use controller::WorkerPoolController;
pub use sandbox::{Sandbox, SandboxState};
pub use stats::PoolSnapshot;
