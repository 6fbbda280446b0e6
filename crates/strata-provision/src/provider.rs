//! The provider seam: everything that actually creates infrastructure
//! sits behind this trait.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use strata_graph::ResourceKind;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Everything a provider needs to materialize one resource node.
#[derive(Debug, Clone)]
pub struct MaterializeRequest {
    pub name: String,
    pub kind: ResourceKind,
    /// Declared configuration from the manifest.
    pub config: BTreeMap<String, String>,
    /// Output keys the node promises to emit.
    pub provides: Vec<String>,
    /// Resolved inputs from producer outputs, keyed `producer.key`.
    pub inputs: BTreeMap<String, String>,
}

/// Materializes, updates, and destroys resources.
///
/// Calls are at-least-once: a call that fails midway may be re-issued
/// on the next apply, so implementations must be idempotent keyed by
/// resource name. The provisioner holds no lock across a provider call.
pub trait Provider: Send + Sync + 'static {
    /// Create the resource; resolves to its output map, which must
    /// cover every key in `request.provides`.
    fn materialize(
        &self,
        request: MaterializeRequest,
    ) -> BoxFuture<anyhow::Result<BTreeMap<String, String>>>;

    /// Reconcile an existing resource with changed configuration.
    /// Resolves to the (possibly regenerated) output map.
    fn update(
        &self,
        request: MaterializeRequest,
    ) -> BoxFuture<anyhow::Result<BTreeMap<String, String>>>;

    /// Tear the resource down.
    fn destroy(&self, name: String, kind: ResourceKind) -> BoxFuture<anyhow::Result<()>>;
}
