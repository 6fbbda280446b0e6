//! Side-effect-free plan computation: graph vs. persisted state.

use serde::Serialize;

use strata_graph::ResourceGraph;
use strata_state::StateStore;

use crate::error::ProvisionResult;

/// One node's planned change, in apply order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum PlannedChange {
    Create { node: String },
    /// Config drifted from the applied record; lists the drifted keys.
    Update { node: String, changed: Vec<String> },
    NoChange { node: String },
    /// A record exists for a node the graph no longer declares.
    Delete { node: String },
}

impl PlannedChange {
    pub fn node(&self) -> &str {
        match self {
            PlannedChange::Create { node }
            | PlannedChange::Update { node, .. }
            | PlannedChange::NoChange { node }
            | PlannedChange::Delete { node } => node,
        }
    }
}

impl std::fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannedChange::Create { node } => write!(f, "+ create  {node}"),
            PlannedChange::Update { node, changed } => {
                write!(f, "~ update  {node} ({})", changed.join(", "))
            }
            PlannedChange::NoChange { node } => write!(f, "= ok      {node}"),
            PlannedChange::Delete { node } => write!(f, "- delete  {node}"),
        }
    }
}

/// Diff the declared graph against the store.
///
/// Creates, updates, and no-ops come out in dependency order; deletes
/// for orphaned records follow, name-ordered. Reads only, never writes.
pub fn plan(graph: &ResourceGraph, store: &StateStore) -> ProvisionResult<Vec<PlannedChange>> {
    let order = graph.resolve_order()?;
    let records = store.list_resources()?;

    let mut changes = Vec::with_capacity(order.len());
    for name in &order {
        let node = match graph.get(name) {
            Some(node) => node,
            None => continue,
        };
        let change = match records.iter().find(|r| &r.name == name) {
            None => PlannedChange::Create { node: name.clone() },
            Some(record) => {
                let mut changed: Vec<String> = node
                    .config
                    .iter()
                    .filter(|(k, v)| record.config.get(*k) != Some(v))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in record.config.keys() {
                    if !node.config.contains_key(key) {
                        changed.push(key.clone());
                    }
                }
                if changed.is_empty() {
                    PlannedChange::NoChange { node: name.clone() }
                } else {
                    changed.sort();
                    changed.dedup();
                    PlannedChange::Update {
                        node: name.clone(),
                        changed,
                    }
                }
            }
        };
        changes.push(change);
    }

    for record in &records {
        if graph.get(&record.name).is_none() {
            changes.push(PlannedChange::Delete {
                node: record.name.clone(),
            });
        }
    }

    Ok(changes)
}
