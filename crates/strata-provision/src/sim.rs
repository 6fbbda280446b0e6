//! In-process provider used by the CLI's dry-run mode and the tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use anyhow::bail;

use strata_graph::ResourceKind;

use crate::provider::{BoxFuture, MaterializeRequest, Provider};

/// Fabricates deterministic outputs (`sim-{node}-{key}`) instead of
/// touching real infrastructure, and records every call.
#[derive(Debug, Default)]
pub struct SimProvider {
    calls: Mutex<Vec<String>>,
    fail_nodes: Mutex<BTreeSet<String>>,
}

impl SimProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far, in completion order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Make every call for `node` fail until cleared.
    pub fn fail(&self, node: &str) {
        if let Ok(mut nodes) = self.fail_nodes.lock() {
            nodes.insert(node.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut nodes) = self.fail_nodes.lock() {
            nodes.clear();
        }
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn should_fail(&self, node: &str) -> bool {
        self.fail_nodes
            .lock()
            .map(|nodes| nodes.contains(node))
            .unwrap_or(false)
    }

    fn run(&self, verb: &str, request: MaterializeRequest) -> BoxFuture<anyhow::Result<BTreeMap<String, String>>> {
        self.record(format!("{verb} {}", request.name));
        let failing = self.should_fail(&request.name);
        Box::pin(async move {
            if failing {
                bail!("simulated failure for '{}'", request.name);
            }
            let outputs = request
                .provides
                .iter()
                .map(|key| (key.clone(), format!("sim-{}-{}", request.name, key)))
                .collect();
            Ok(outputs)
        })
    }
}

impl Provider for SimProvider {
    fn materialize(
        &self,
        request: MaterializeRequest,
    ) -> BoxFuture<anyhow::Result<BTreeMap<String, String>>> {
        self.run("materialize", request)
    }

    fn update(
        &self,
        request: MaterializeRequest,
    ) -> BoxFuture<anyhow::Result<BTreeMap<String, String>>> {
        self.run("update", request)
    }

    fn destroy(&self, name: String, _kind: ResourceKind) -> BoxFuture<anyhow::Result<()>> {
        self.record(format!("destroy {name}"));
        let failing = self.should_fail(&name);
        Box::pin(async move {
            if failing {
                bail!("simulated failure for '{name}'");
            }
            Ok(())
        })
    }
}
