//! Persisted domain types for the Strata state store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use strata_graph::ResourceKind;

/// The applied materialization of one resource node.
///
/// `outputs` is only readable once `outputs_visible` is set; the store
/// enforces the gate so a dependent can never observe a half-created
/// producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub name: String,
    pub kind: ResourceKind,
    /// Configuration as applied, for plan/diff against the manifest.
    pub config: BTreeMap<String, String>,
    /// Outputs produced by the provider (endpoints, identifiers,
    /// secret references).
    pub outputs: BTreeMap<String, String>,
    /// Set only after materialization completed and outputs were
    /// captured.
    pub outputs_visible: bool,
    /// Unix timestamp (seconds) of first materialization.
    pub applied_at: u64,
    /// Unix timestamp (seconds) of the last in-place update.
    pub updated_at: u64,
}

/// Blue/green state-machine state, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    Created,
    Staging,
    Verifying,
    Shifting,
    RollingBack,
    Completed,
    RolledBack,
}

impl DeployState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeployState::Completed | DeployState::RolledBack)
    }
}

/// Final result of a deployment, recorded once terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    RolledBack { reason: String },
    Aborted,
}

/// One release attempt of a workload.
///
/// Created per deployment request, mutated through the state machine,
/// immutable once `state` is terminal. The most recent terminal record
/// per workload determines which traffic target is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Monotonic per-workload sequence number.
    pub seq: u64,
    pub workload: String,
    /// Image reference identifying the version being released.
    pub image: String,
    pub state: DeployState,
    pub outcome: Option<Outcome>,
    /// Whether production traffic currently points at the new target.
    pub traffic_shifted: bool,
    /// Unix timestamp (seconds) when the record was registered.
    pub started_at: u64,
    /// Unix timestamp (seconds) when a terminal state was reached.
    pub finished_at: Option<u64>,
}

impl DeploymentRecord {
    /// Build the composite key for the deployments table.
    pub fn table_key(&self) -> String {
        deployment_key(&self.workload, self.seq)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Composite deployments-table key: zero-padded so lexicographic key
/// order matches sequence order.
pub fn deployment_key(workload: &str, seq: u64) -> String {
    format!("{workload}:{seq:08}")
}
