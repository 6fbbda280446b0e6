//! Policy validation errors.

use thiserror::Error;

/// Result type alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Violations detected during static policy validation.
///
/// All variants are surfaced before any provisioning side effect.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("rule references unknown group '{0}'")]
    UnknownGroup(String),

    #[error("group '{group}' is not edge-tier but accepts ingress from anywhere")]
    UnrestrictedIngress { group: String },

    #[error("path from '{from}' reaches data-tier group '{to}' without traversing the compute tier")]
    BypassesComputeTier { from: String, to: String },
}
