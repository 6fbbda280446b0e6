//! Security rules and the reachability validation pass.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PolicyError, PolicyResult};

/// Which layer of the stack a resource group belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Public-facing: load balancers, ingress points.
    Edge,
    /// Workload execution.
    Compute,
    /// Data stores. Must never be reachable from the edge directly.
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ingress,
    Egress,
}

/// Where traffic permitted by a rule may originate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    /// Unrestricted source. Only acceptable for edge-tier destinations.
    Anywhere,
    /// Traffic from members of a named group.
    Group(String),
}

/// A single permitted flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub source: RuleSource,
    pub destination: String,
    pub protocol: Protocol,
    pub port: u16,
    pub direction: Direction,
}

impl SecurityRule {
    /// Ingress rule: `source` may reach `destination` on `port`/tcp.
    pub fn ingress_tcp(source: RuleSource, destination: &str, port: u16) -> Self {
        Self {
            source,
            destination: destination.to_string(),
            protocol: Protocol::Tcp,
            port,
            direction: Direction::Ingress,
        }
    }
}

/// A validated set of groups and rules.
///
/// Construction runs the full least-privilege check; holding a
/// `PolicyGraph` means the rule set passed. The provisioner re-validates
/// before applying so a policy constructed elsewhere cannot sneak past.
#[derive(Debug, Clone)]
pub struct PolicyGraph {
    groups: BTreeMap<String, Tier>,
    rules: Vec<SecurityRule>,
}

impl PolicyGraph {
    /// Validate and build. Fails closed on the first violation.
    pub fn new(groups: BTreeMap<String, Tier>, rules: Vec<SecurityRule>) -> PolicyResult<Self> {
        let graph = Self { groups, rules };
        graph.validate()?;
        Ok(graph)
    }

    pub fn rules(&self) -> &[SecurityRule] {
        &self.rules
    }

    pub fn groups(&self) -> &BTreeMap<String, Tier> {
        &self.groups
    }

    /// Run the static least-privilege check.
    ///
    /// Rejects unknown group references, unrestricted ingress to
    /// non-edge tiers, and any ingress path from an externally-reachable
    /// group to a data-tier group that does not traverse a compute-tier
    /// group.
    pub fn validate(&self) -> PolicyResult<()> {
        for rule in &self.rules {
            if !self.groups.contains_key(&rule.destination) {
                return Err(PolicyError::UnknownGroup(rule.destination.clone()));
            }
            if let RuleSource::Group(source) = &rule.source
                && !self.groups.contains_key(source)
            {
                return Err(PolicyError::UnknownGroup(source.clone()));
            }
        }

        // Unrestricted sources are only tolerable at the edge.
        for rule in &self.rules {
            if rule.direction == Direction::Ingress
                && rule.source == RuleSource::Anywhere
                && self.groups.get(&rule.destination) != Some(&Tier::Edge)
            {
                return Err(PolicyError::UnrestrictedIngress {
                    group: rule.destination.clone(),
                });
            }
        }

        // Reachability with compute-tier groups removed: anything that
        // still connects an externally-reachable group to the data tier
        // is a bypass path. Edges compose across protocols and ports —
        // a chain of permitted hops is a path regardless of port mix.
        let mut edges: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut external: BTreeSet<&str> = BTreeSet::new();
        for rule in &self.rules {
            if rule.direction != Direction::Ingress {
                continue;
            }
            match &rule.source {
                RuleSource::Anywhere => {
                    external.insert(&rule.destination);
                }
                RuleSource::Group(source) => {
                    if self.groups.get(source.as_str()) == Some(&Tier::Compute) {
                        continue; // Hop out of a compute group: allowed path.
                    }
                    if self.groups.get(rule.destination.as_str()) == Some(&Tier::Compute) {
                        continue; // Hop into a compute group: allowed path.
                    }
                    edges.entry(source).or_default().insert(&rule.destination);
                }
            }
        }

        for start in &external {
            let mut stack = vec![*start];
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            while let Some(group) = stack.pop() {
                if !seen.insert(group) {
                    continue;
                }
                if self.groups.get(group) == Some(&Tier::Data) {
                    return Err(PolicyError::BypassesComputeTier {
                        from: start.to_string(),
                        to: group.to_string(),
                    });
                }
                if let Some(next) = edges.get(group) {
                    stack.extend(next.iter().copied());
                }
            }
        }

        debug!(
            groups = self.groups.len(),
            rules = self.rules.len(),
            "policy validated"
        );
        Ok(())
    }
}
