//! Wave-based apply and reverse-order destroy.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use strata_graph::{ResourceGraph, ResourceNode};
use strata_policy::PolicyGraph;
use strata_state::{ResourceRecord, StateStore};

use crate::error::{ProvisionError, ProvisionResult};
use crate::plan::{PlannedChange, plan};
use crate::provider::{MaterializeRequest, Provider};

const DEFAULT_CONCURRENCY: usize = 4;

/// Materializes a resource graph through a [`Provider`], in dependency
/// order, with bounded intra-wave concurrency.
pub struct Provisioner {
    store: Arc<StateStore>,
    provider: Arc<dyn Provider>,
    concurrency: usize,
}

impl Provisioner {
    pub fn new(store: Arc<StateStore>, provider: Arc<dyn Provider>) -> Self {
        Self {
            store,
            provider,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Cap on concurrent provider calls within a wave (min 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Apply the graph: validate, diff, then materialize wave by wave.
    ///
    /// Structural or policy errors fail closed before any provider call.
    /// A node failure abandons the remaining waves but keeps everything
    /// already materialized, so a later apply can resume. Returns the
    /// changes that were executed (or confirmed as no-ops).
    pub async fn apply(
        &self,
        graph: &ResourceGraph,
        policy: &PolicyGraph,
    ) -> ProvisionResult<Vec<PlannedChange>> {
        policy.validate()?;
        let waves = graph.waves()?;
        let changes = plan(graph, &self.store)?;
        let by_node: BTreeMap<&str, &PlannedChange> =
            changes.iter().map(|c| (c.node(), c)).collect();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut failure: Option<ProvisionError> = None;

        'waves: for wave in &waves {
            let mut join_set: JoinSet<(String, anyhow::Result<BTreeMap<String, String>>)> =
                JoinSet::new();

            for name in wave {
                let node = match graph.get(name) {
                    Some(node) => node,
                    None => continue,
                };
                let change = by_node.get(name.as_str()).copied();
                let is_update = match change {
                    Some(PlannedChange::NoChange { .. }) => {
                        debug!(node = %name, "unchanged, skipping");
                        continue;
                    }
                    Some(PlannedChange::Update { changed, .. }) => {
                        info!(node = %name, changed = ?changed, "updating in place");
                        true
                    }
                    _ => {
                        info!(node = %name, kind = %node.kind, "materializing");
                        false
                    }
                };

                // Inputs resolve here, before the provider call, so the
                // outputs-visible gate is checked on the coordinator and
                // no store handle crosses into the worker.
                let request = self.build_request(node)?;
                let provider = self.provider.clone();
                let permit_source = semaphore.clone();
                let task_name = name.clone();
                join_set.spawn(async move {
                    let _permit = permit_source.acquire_owned().await;
                    let result = if is_update {
                        provider.update(request).await
                    } else {
                        provider.materialize(request).await
                    };
                    (task_name, result)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let (name, result) = joined?;
                match result {
                    Ok(outputs) => self.persist_applied(graph, &name, outputs)?,
                    Err(source) => {
                        warn!(node = %name, error = %source, "materialization failed");
                        if failure.is_none() {
                            failure = Some(ProvisionError::Materialize { node: name, source });
                        }
                    }
                }
            }

            if failure.is_some() {
                break 'waves;
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        // Records for nodes the graph no longer declares go last, after
        // everything they could have fed is reconciled.
        for change in &changes {
            if let PlannedChange::Delete { node } = change {
                let record = match self.store.get_resource(node)? {
                    Some(record) => record,
                    None => continue,
                };
                info!(node = %node, "removing orphaned resource");
                self.provider
                    .destroy(record.name.clone(), record.kind)
                    .await
                    .map_err(|source| ProvisionError::Destroy {
                        node: node.clone(),
                        source,
                    })?;
                self.store.delete_resource(node)?;
            }
        }

        Ok(changes)
    }

    /// Tear down every materialized node in reverse dependency order.
    /// Returns the names destroyed. Stops at the first provider failure.
    pub async fn destroy(&self, graph: &ResourceGraph) -> ProvisionResult<Vec<String>> {
        let order = graph.reverse_order()?;
        let mut destroyed = Vec::new();
        for name in order {
            let record = match self.store.get_resource(&name)? {
                Some(record) => record,
                None => continue,
            };
            info!(node = %name, kind = %record.kind, "destroying");
            self.provider
                .destroy(record.name.clone(), record.kind)
                .await
                .map_err(|source| ProvisionError::Destroy {
                    node: name.clone(),
                    source,
                })?;
            self.store.delete_resource(&name)?;
            destroyed.push(name);
        }
        Ok(destroyed)
    }

    fn build_request(&self, node: &ResourceNode) -> ProvisionResult<MaterializeRequest> {
        let mut inputs = BTreeMap::new();
        for output_ref in &node.requires {
            let outputs = self.store.outputs(&output_ref.producer)?;
            let value = outputs.get(&output_ref.key).ok_or_else(|| {
                ProvisionError::MissingOutput {
                    producer: output_ref.producer.clone(),
                    key: output_ref.key.clone(),
                    consumer: node.name.clone(),
                }
            })?;
            inputs.insert(
                format!("{}.{}", output_ref.producer, output_ref.key),
                value.clone(),
            );
        }
        Ok(MaterializeRequest {
            name: node.name.clone(),
            kind: node.kind,
            config: node.config.clone(),
            provides: node.provides.clone(),
            inputs,
        })
    }

    /// Persist the applied record, then flip outputs visible. A promised
    /// output the provider failed to emit fails the node.
    fn persist_applied(
        &self,
        graph: &ResourceGraph,
        name: &str,
        outputs: BTreeMap<String, String>,
    ) -> ProvisionResult<()> {
        let node = match graph.get(name) {
            Some(node) => node,
            None => return Ok(()),
        };
        for key in &node.provides {
            if !outputs.contains_key(key) {
                return Err(ProvisionError::Materialize {
                    node: name.to_string(),
                    source: anyhow::anyhow!("provider did not emit promised output '{key}'"),
                });
            }
        }
        let now = epoch_secs();
        let applied_at = self
            .store
            .get_resource(name)?
            .map(|r| r.applied_at)
            .unwrap_or(now);
        self.store.put_resource(&ResourceRecord {
            name: name.to_string(),
            kind: node.kind,
            config: node.config.clone(),
            outputs,
            outputs_visible: true,
            applied_at,
            updated_at: now,
        })?;
        debug!(node = %name, "outputs visible");
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimProvider;
    use strata_graph::ResourceKind;
    use strata_policy::{RuleSource, SecurityRule, Tier};

    fn stack_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(
                ResourceNode::new("network", ResourceKind::Network)
                    .with_config("cidr", "10.0.0.0/16")
                    .provides("vpc_id")
                    .provides("app_security_group"),
            )
            .unwrap();
        graph
            .add_node(
                ResourceNode::new("registry", ResourceKind::Registry)
                    .with_config("retain_images", "10")
                    .provides("repository_uri"),
            )
            .unwrap();
        graph
            .add_node(
                ResourceNode::new("database", ResourceKind::Data)
                    .with_config("engine", "postgres")
                    .provides("endpoint")
                    .provides("secret_ref")
                    .requires("network", "vpc_id"),
            )
            .unwrap();
        graph
            .add_node(
                ResourceNode::new("service", ResourceKind::Compute)
                    .with_config("replicas", "2")
                    .provides("alb_dns_name")
                    .requires("network", "vpc_id")
                    .requires("database", "endpoint")
                    .requires("registry", "repository_uri"),
            )
            .unwrap();
        graph
    }

    fn open_policy() -> PolicyGraph {
        let groups = [
            ("alb".to_string(), Tier::Edge),
            ("service".to_string(), Tier::Compute),
            ("database".to_string(), Tier::Data),
        ]
        .into_iter()
        .collect();
        let rules = vec![
            SecurityRule::ingress_tcp(RuleSource::Anywhere, "alb", 80),
            SecurityRule::ingress_tcp(RuleSource::Group("alb".to_string()), "service", 8080),
            SecurityRule::ingress_tcp(RuleSource::Group("service".to_string()), "database", 5432),
        ];
        PolicyGraph::new(groups, rules).unwrap()
    }

    fn provisioner(provider: Arc<SimProvider>) -> (Provisioner, Arc<StateStore>) {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        (
            Provisioner::new(store.clone(), provider).with_concurrency(2),
            store,
        )
    }

    #[tokio::test]
    async fn apply_materializes_in_dependency_order() {
        let provider = Arc::new(SimProvider::new());
        let (provisioner, store) = provisioner(provider.clone());

        let graph = stack_graph();
        let changes = provisioner.apply(&graph, &open_policy()).await.unwrap();
        assert_eq!(changes.len(), 4);

        let calls = provider.calls();
        let pos = |n: &str| calls.iter().position(|c| c.contains(n)).unwrap();
        assert!(pos("network") < pos("database"));
        assert!(pos("database") < pos("service"));
        assert!(pos("registry") < pos("service"));

        // Inputs carried producer outputs.
        let service = store.get_resource("service").unwrap().unwrap();
        assert!(service.outputs_visible);
        assert_eq!(
            store.outputs("network").unwrap().get("vpc_id"),
            Some(&"sim-network-vpc_id".to_string())
        );
    }

    #[tokio::test]
    async fn reapply_is_idempotent() {
        let provider = Arc::new(SimProvider::new());
        let (provisioner, _store) = provisioner(provider.clone());

        let graph = stack_graph();
        provisioner.apply(&graph, &open_policy()).await.unwrap();
        let first_calls = provider.calls().len();

        let changes = provisioner.apply(&graph, &open_policy()).await.unwrap();
        assert!(
            changes
                .iter()
                .all(|c| matches!(c, PlannedChange::NoChange { .. }))
        );
        assert_eq!(provider.calls().len(), first_calls);
    }

    #[tokio::test]
    async fn failure_aborts_dependents_but_keeps_applied_nodes() {
        let provider = Arc::new(SimProvider::new());
        provider.fail("database");
        let (provisioner, store) = provisioner(provider.clone());

        let graph = stack_graph();
        let err = provisioner.apply(&graph, &open_policy()).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Materialize { ref node, .. } if node == "database"
        ));

        // Wave one applied and stayed applied.
        assert!(store.get_resource("network").unwrap().is_some());
        assert!(store.get_resource("registry").unwrap().is_some());
        // The dependent never ran.
        assert!(store.get_resource("service").unwrap().is_none());
        assert!(!provider.calls().iter().any(|c| c.contains("service")));
    }

    #[tokio::test]
    async fn resume_after_failure_skips_applied_nodes() {
        let provider = Arc::new(SimProvider::new());
        provider.fail("database");
        let (provisioner, store) = provisioner(provider.clone());

        let graph = stack_graph();
        assert!(provisioner.apply(&graph, &open_policy()).await.is_err());

        provider.clear_failures();
        provisioner.apply(&graph, &open_policy()).await.unwrap();
        assert!(store.get_resource("service").unwrap().is_some());

        // network was materialized exactly once across both applies.
        let network_calls = provider
            .calls()
            .iter()
            .filter(|c| c.starts_with("materialize network"))
            .count();
        assert_eq!(network_calls, 1);
    }

    #[tokio::test]
    async fn changed_config_updates_in_place() {
        let provider = Arc::new(SimProvider::new());
        let (provisioner, store) = provisioner(provider.clone());

        let graph = stack_graph();
        provisioner.apply(&graph, &open_policy()).await.unwrap();

        let mut drifted = stack_graph();
        drifted.visit_mut(|node| {
            if node.name == "service" {
                node.config.insert("replicas".to_string(), "4".to_string());
            }
        });
        let changes = provisioner.apply(&drifted, &open_policy()).await.unwrap();
        assert!(changes.contains(&PlannedChange::Update {
            node: "service".to_string(),
            changed: vec!["replicas".to_string()],
        }));
        assert!(provider.calls().iter().any(|c| c.starts_with("update service")));
        assert_eq!(
            store.get_resource("service").unwrap().unwrap().config.get("replicas"),
            Some(&"4".to_string())
        );
    }

    #[tokio::test]
    async fn destroy_runs_in_reverse_order_and_clears_records() {
        let provider = Arc::new(SimProvider::new());
        let (provisioner, store) = provisioner(provider.clone());

        let graph = stack_graph();
        provisioner.apply(&graph, &open_policy()).await.unwrap();

        let destroyed = provisioner.destroy(&graph).await.unwrap();
        assert_eq!(destroyed.first().map(String::as_str), Some("service"));
        assert_eq!(destroyed.last().map(String::as_str), Some("network"));
        assert!(store.list_resources().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_policy_never_reaches_the_provider() {
        let provider = Arc::new(SimProvider::new());
        let (_provisioner, _store) = provisioner(provider.clone());

        let groups = [
            ("service".to_string(), Tier::Compute),
            ("database".to_string(), Tier::Data),
        ]
        .into_iter()
        .collect();
        // World-reachable non-edge group is rejected at construction,
        // so there is no policy handle to apply with.
        let rules = vec![SecurityRule::ingress_tcp(RuleSource::Anywhere, "service", 8080)];
        assert!(PolicyGraph::new(groups, rules).is_err());
        assert!(provider.calls().is_empty());
    }
}
