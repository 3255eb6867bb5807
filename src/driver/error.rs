use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("container runtime not available: {reason}")]
    RuntimeUnavailable { reason: String },
    #[error("failed to pull image '{image}': {reason}")]
    ImagePull { image: String, reason: String },
    #[error("failed to create container '{name}': {reason}")]
    Create { name: String, reason: String },
    #[error("failed to start container '{name}': {reason}")]
    Start { name: String, reason: String },
    #[error("failed to inspect container '{id}': {reason}")]
    Inspect { id: String, reason: String },
    #[error("failed to list containers: {reason}")]
    List { reason: String },
    #[error("failed to remove container '{id}': {reason}")]
    Remove { id: String, reason: String },
}

impl DriverError {
    /// Whether this failure is a transient engine hiccup worth retrying
    /// (e.g. a momentary daemon blip), as opposed to a fatal one (quota
    /// exceeded, image missing) that retrying cannot fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::RuntimeUnavailable { .. } | DriverError::Create { .. })
    }
}
