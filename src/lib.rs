//! Multi-tenant gateway in front of a pool of isolated, stateful
//! code-execution containers: sessions bind to sandboxes, the Worker Pool
//! Controller owns sandbox lifecycle, and the Request Proxy forwards
//! `/execute` traffic into whichever sandbox a session is bound to.

pub mod config;
pub mod driver;
pub mod error;
pub mod execution;
pub mod health;
pub mod pool;
pub mod proxy;

pub mod testkit;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use pool::WorkerPoolController;
