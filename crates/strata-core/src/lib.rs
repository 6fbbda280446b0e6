//! strata-core — shared types and `stack.toml` manifest handling.
//!
//! The manifest is the operator-facing declaration of one stack: its
//! network, database, registry, and service sections, each a typed
//! configuration struct with enumerated recognized options (unknown
//! keys are rejected at parse time, never passed through silently).
//! Lowering turns a parsed manifest into the resource graph, the
//! security rule set, and the deployment unit the rest of the system
//! operates on.

pub mod manifest;
pub mod types;

pub use manifest::{ScalingConfig, StackManifest};
pub use types::{DeploymentUnit, HealthContract, ShiftPolicy, parse_duration};
