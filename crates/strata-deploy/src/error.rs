//! Deployment errors.

use thiserror::Error;

/// Result type alias for deployment operations.
pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, Error)]
pub enum DeployError {
    /// A deployment for this workload is already in flight. New
    /// requests are rejected, never queued or merged.
    #[error("a deployment for '{workload}' is already in progress (seq {seq})")]
    DeploymentInProgress { workload: String, seq: u64 },

    #[error(transparent)]
    State(#[from] strata_state::StateError),
}
