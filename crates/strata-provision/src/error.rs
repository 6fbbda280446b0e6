//! Provisioning errors.

use thiserror::Error;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A provider call failed while materializing a node. Nodes already
    /// materialized stay in place; the remaining order is abandoned.
    #[error("materialization of '{node}' failed: {source}")]
    Materialize {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("destroy of '{node}' failed: {source}")]
    Destroy {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    /// A producer finished without emitting an output a consumer reads.
    #[error("producer '{producer}' did not emit output '{key}' consumed by '{consumer}'")]
    MissingOutput {
        producer: String,
        key: String,
        consumer: String,
    },

    #[error("provisioning worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Graph(#[from] strata_graph::GraphError),

    #[error(transparent)]
    Policy(#[from] strata_policy::PolicyError),

    #[error(transparent)]
    State(#[from] strata_state::StateError),
}
