//! Node and edge types for the resource graph.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Broad category of a declared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Network fabric: address space, subnets, security groups.
    Network,
    /// Managed data store.
    Data,
    /// Container image registry.
    Registry,
    /// Workload execution and load balancing.
    Compute,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Network => "network",
            ResourceKind::Data => "data",
            ResourceKind::Registry => "registry",
            ResourceKind::Compute => "compute",
        };
        f.write_str(s)
    }
}

/// A reference from a consumer node to one output key of a producer.
///
/// Edges are directed consumer → producer and labeled with the specific
/// output key consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub producer: String,
    pub key: String,
}

impl OutputRef {
    pub fn new(producer: &str, key: &str) -> Self {
        Self {
            producer: producer.to_string(),
            key: key.to_string(),
        }
    }
}

/// A declared resource: stable identity, kind, opaque configuration,
/// the output keys it promises to publish, and the producer outputs it
/// consumes.
///
/// Produced output *values* are not stored here — they live in the
/// state store and only become readable once materialization completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub name: String,
    pub kind: ResourceKind,
    /// Declared configuration, stored and passed through unchanged.
    pub config: BTreeMap<String, String>,
    /// Output keys this node publishes after materialization.
    pub provides: Vec<String>,
    /// Producer outputs this node consumes.
    pub requires: Vec<OutputRef>,
}

impl ResourceNode {
    pub fn new(name: &str, kind: ResourceKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            config: BTreeMap::new(),
            provides: Vec::new(),
            requires: Vec::new(),
        }
    }

    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.config.insert(key.to_string(), value.to_string());
        self
    }

    pub fn provides(mut self, key: &str) -> Self {
        self.provides.push(key.to_string());
        self
    }

    pub fn requires(mut self, producer: &str, key: &str) -> Self {
        self.requires.push(OutputRef::new(producer, key));
        self
    }

    /// Names of all producers this node depends on (deduplicated).
    pub fn producer_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.requires.iter().map(|r| r.producer.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
