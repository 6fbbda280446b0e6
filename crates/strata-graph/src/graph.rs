//! ResourceGraph — node registry, validation, and deterministic ordering.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::node::ResourceNode;

/// The resource dependency graph.
///
/// Nodes are keyed by stable name. References are validated at insertion
/// time: a node may only consume output keys its producers actually
/// declare, and the edge set must remain acyclic.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: BTreeMap<String, ResourceNode>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, validating its references against already-registered
    /// producers.
    ///
    /// Fails with [`GraphError::UnknownProducer`] /
    /// [`GraphError::UnknownReference`] if a required producer (or the
    /// specific output key) is not declared, and with
    /// [`GraphError::Cycle`] if the edge would break acyclicity.
    pub fn add_node(&mut self, node: ResourceNode) -> GraphResult<()> {
        if self.nodes.contains_key(&node.name) {
            return Err(GraphError::DuplicateNode(node.name));
        }

        for referenced in &node.requires {
            if referenced.producer == node.name {
                return Err(GraphError::Cycle {
                    node: node.name.clone(),
                });
            }
            let producer = self.nodes.get(&referenced.producer).ok_or_else(|| {
                GraphError::UnknownProducer {
                    consumer: node.name.clone(),
                    producer: referenced.producer.clone(),
                }
            })?;
            if !producer.provides.contains(&referenced.key) {
                return Err(GraphError::UnknownReference {
                    consumer: node.name.clone(),
                    producer: referenced.producer.clone(),
                    key: referenced.key.clone(),
                });
            }
        }

        debug!(node = %node.name, kind = %node.kind, deps = node.requires.len(), "node added");
        self.nodes.insert(node.name.clone(), node);

        // References can only point at pre-existing nodes, so insertion
        // cannot close a cycle; verify anyway so the acyclicity invariant
        // never rests on that ordering argument alone.
        self.resolve_order()?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate nodes in name order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Apply a mutation to every node exactly once, before any
    /// materialization. Used for cross-cutting passes such as stamping
    /// common tags into node configuration.
    pub fn visit_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut ResourceNode),
    {
        for node in self.nodes.values_mut() {
            f(node);
        }
    }

    /// Resolve a total order consistent with the dependency edges.
    ///
    /// Kahn's algorithm with a lexicographic ready set: any valid
    /// topological order is acceptable, but for a fixed graph the result
    /// is always the same, which keeps re-applies idempotent.
    pub fn resolve_order(&self) -> GraphResult<Vec<String>> {
        let mut remaining_deps: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for node in self.nodes.values() {
            let deps: BTreeSet<&str> = node.producer_names().into_iter().collect();
            for dep in deps.iter() {
                dependents.entry(*dep).or_default().push(&node.name);
            }
            remaining_deps.insert(&node.name, deps);
        }

        let mut ready: BTreeSet<&str> = remaining_deps
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| *name)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());
            if let Some(consumers) = dependents.get(name) {
                for consumer in consumers {
                    if let Some(deps) = remaining_deps.get_mut(*consumer) {
                        deps.remove(name);
                        if deps.is_empty() {
                            ready.insert(*consumer);
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            // Some node never became ready: a cycle. Name the smallest
            // unemitted node for the error.
            let stuck = remaining_deps
                .iter()
                .find(|(_, deps)| !deps.is_empty())
                .map(|(name, _)| name.to_string())
                .unwrap_or_default();
            return Err(GraphError::Cycle { node: stuck });
        }

        Ok(order)
    }

    /// Teardown order: the reverse of the creation order.
    pub fn reverse_order(&self) -> GraphResult<Vec<String>> {
        let mut order = self.resolve_order()?;
        order.reverse();
        Ok(order)
    }

    /// Group the creation order into dependency waves: every node in
    /// wave N only depends on nodes in waves < N, so nodes within a
    /// wave may materialize concurrently.
    pub fn waves(&self) -> GraphResult<Vec<Vec<String>>> {
        let order = self.resolve_order()?;
        let mut level: BTreeMap<&str, usize> = BTreeMap::new();
        let mut waves: Vec<Vec<String>> = Vec::new();

        for name in &order {
            let node = &self.nodes[name];
            let depth = node
                .producer_names()
                .iter()
                .map(|p| level.get(*p).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            level.insert(name.as_str(), depth);
            if waves.len() <= depth {
                waves.push(Vec::new());
            }
            waves[depth].push(name.clone());
        }

        Ok(waves)
    }
}
