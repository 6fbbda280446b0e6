//! strata-graph — the resource dependency graph.
//!
//! Declared resources are nodes; a directed edge runs from a consumer to
//! the producer whose output it reads, labeled with the consumed output
//! key. The edge set must stay acyclic, and `resolve_order()` gives a
//! deterministic topological order so repeated applies visit nodes the
//! same way every time.
//!
//! # Components
//!
//! - **`node`** — `ResourceKind`, `ResourceNode`, `OutputRef`
//! - **`graph`** — `ResourceGraph` (add, order resolution, visitor pass)

pub mod error;
pub mod graph;
pub mod node;

pub use error::{GraphError, GraphResult};
pub use graph::ResourceGraph;
pub use node::{OutputRef, ResourceKind, ResourceNode};
