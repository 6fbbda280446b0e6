//! stack.toml manifest parser and lowering.
//!
//! Every section is a typed struct with `deny_unknown_fields`: a typo'd
//! or unsupported option is a parse error, not a silently ignored
//! pass-through. Lowering produces the resource graph, the security
//! rule set, and (given an image reference) the deployment unit.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use strata_graph::{GraphResult, ResourceGraph, ResourceKind, ResourceNode};
use strata_policy::{RuleSource, SecurityRule, Tier};

use crate::types::{DeploymentUnit, HealthContract, ShiftPolicy, parse_duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackManifest {
    pub stack: StackSection,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackSection {
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "dev".to_string()
}

/// Network fabric options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Availability zones to spread subnets across.
    #[serde(default = "default_azs")]
    pub availability_zones: u32,
    /// NAT gateways for private-subnet egress.
    #[serde(default = "default_nat_gateways")]
    pub nat_gateways: u32,
    /// Subnet prefix length.
    #[serde(default = "default_subnet_mask")]
    pub subnet_mask: u8,
}

fn default_azs() -> u32 {
    2
}
fn default_nat_gateways() -> u32 {
    1
}
fn default_subnet_mask() -> u8 {
    24
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            availability_zones: default_azs(),
            nat_gateways: default_nat_gateways(),
            subnet_mask: default_subnet_mask(),
        }
    }
}

/// Managed database options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_instance_class")]
    pub instance_class: String,
    #[serde(default = "default_storage_gib")]
    pub storage_gib: u32,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default)]
    pub multi_az: bool,
}

fn default_engine() -> String {
    "postgres".to_string()
}
fn default_instance_class() -> String {
    "micro".to_string()
}
fn default_storage_gib() -> u32 {
    20
}
fn default_db_port() -> u16 {
    5432
}
fn default_db_name() -> String {
    "app".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            instance_class: default_instance_class(),
            storage_gib: default_storage_gib(),
            port: default_db_port(),
            name: default_db_name(),
            multi_az: false,
        }
    }
}

/// Container registry options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Images kept before lifecycle expiry.
    #[serde(default = "default_image_retention")]
    pub image_retention: u32,
    #[serde(default)]
    pub scan_on_push: bool,
}

fn default_image_retention() -> u32 {
    10
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            image_retention: default_image_retention(),
            scan_on_push: false,
        }
    }
}

/// Workload / compute options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Env var name → secret-store reference.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    #[serde(default)]
    pub health: HealthContract,
    pub scaling: Option<ScalingConfig>,
    #[serde(default)]
    pub deploy: DeployConfig,
}

fn default_container_port() -> u16 {
    8080
}
fn default_cpu() -> u32 {
    256
}
fn default_memory_mib() -> u32 {
    512
}
fn default_replicas() -> u32 {
    1
}

/// Target-tracking autoscaling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalingConfig {
    /// Metric to track: "cpu" or "memory" utilization percent.
    #[serde(default = "default_metric")]
    pub metric: String,
    /// Utilization target the loop keeps the metric near.
    #[serde(default = "default_target")]
    pub target_percent: f64,
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,
    /// Cooldown after a scale-out before the next one, e.g. "60s".
    #[serde(default = "default_out_cooldown")]
    pub scale_out_cooldown: String,
    /// Cooldown after a scale-in before the next one, e.g. "5m".
    #[serde(default = "default_in_cooldown")]
    pub scale_in_cooldown: String,
}

fn default_metric() -> String {
    "cpu".to_string()
}
fn default_target() -> f64 {
    70.0
}
fn default_min_replicas() -> u32 {
    1
}
fn default_max_replicas() -> u32 {
    4
}
fn default_out_cooldown() -> String {
    "60s".to_string()
}
fn default_in_cooldown() -> String {
    "5m".to_string()
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            target_percent: default_target(),
            min_replicas: default_min_replicas(),
            max_replicas: default_max_replicas(),
            scale_out_cooldown: default_out_cooldown(),
            scale_in_cooldown: default_in_cooldown(),
        }
    }
}

/// Release behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    #[serde(default)]
    pub shift: ShiftPolicy,
    /// Old-target warm-keep wait after the shift, e.g. "5m".
    #[serde(default = "default_warm_keep")]
    pub warm_keep: String,
}

fn default_warm_keep() -> String {
    "5m".to_string()
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            shift: ShiftPolicy::default(),
            warm_keep: default_warm_keep(),
        }
    }
}

impl StackManifest {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str_toml(&content)
    }

    pub fn from_str_toml(content: &str) -> anyhow::Result<Self> {
        let manifest: Self = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks serde cannot express: durations must parse, and the stack
    /// name must stay safe for the `{workload}:{seq}` deployment keys.
    fn validate(&self) -> anyhow::Result<()> {
        if self.stack.name.is_empty() {
            bail!("stack name must not be empty");
        }
        if self.stack.name.contains(':') {
            bail!("stack name '{}' must not contain ':'", self.stack.name);
        }

        let mut durations = vec![
            ("service.health.interval", &self.service.health.interval),
            ("service.health.timeout", &self.service.health.timeout),
            (
                "service.health.verify_window",
                &self.service.health.verify_window,
            ),
            ("service.deploy.warm_keep", &self.service.deploy.warm_keep),
        ];
        if let ShiftPolicy::Linear { step_interval, .. } = &self.service.deploy.shift {
            durations.push(("service.deploy.shift.step_interval", step_interval));
        }
        if let Some(scaling) = &self.service.scaling {
            durations.push((
                "service.scaling.scale_out_cooldown",
                &scaling.scale_out_cooldown,
            ));
            durations.push((
                "service.scaling.scale_in_cooldown",
                &scaling.scale_in_cooldown,
            ));
        }
        for (field, value) in durations {
            if parse_duration(value).is_none() {
                bail!("invalid duration '{value}' for {field}");
            }
        }
        Ok(())
    }

    /// Lower the manifest into the four-node resource graph.
    ///
    /// Shape: network first, database depends on network, registry is
    /// independent, the service depends on all three. Every node also
    /// carries the stack's environment tag, stamped by a single visitor
    /// pass rather than per-section repetition.
    pub fn lower_graph(&self) -> GraphResult<ResourceGraph> {
        let mut graph = ResourceGraph::new();

        graph.add_node(
            ResourceNode::new("network", ResourceKind::Network)
                .with_config("availability_zones", &self.network.availability_zones.to_string())
                .with_config("nat_gateways", &self.network.nat_gateways.to_string())
                .with_config("subnet_mask", &self.network.subnet_mask.to_string())
                .provides("vpc_id")
                .provides("public_subnet_ids")
                .provides("private_subnet_ids")
                .provides("isolated_subnet_ids")
                .provides("edge_security_group")
                .provides("app_security_group")
                .provides("data_security_group"),
        )?;

        graph.add_node(
            ResourceNode::new("database", ResourceKind::Data)
                .with_config("engine", &self.database.engine)
                .with_config("instance_class", &self.database.instance_class)
                .with_config("storage_gib", &self.database.storage_gib.to_string())
                .with_config("port", &self.database.port.to_string())
                .with_config("name", &self.database.name)
                .with_config("multi_az", &self.database.multi_az.to_string())
                .provides("endpoint")
                .provides("port")
                .provides("secret_ref")
                .provides("database_name")
                .requires("network", "vpc_id")
                .requires("network", "isolated_subnet_ids")
                .requires("network", "data_security_group"),
        )?;

        graph.add_node(
            ResourceNode::new("registry", ResourceKind::Registry)
                .with_config("image_retention", &self.registry.image_retention.to_string())
                .with_config("scan_on_push", &self.registry.scan_on_push.to_string())
                .provides("repository_uri"),
        )?;

        graph.add_node(
            ResourceNode::new("service", ResourceKind::Compute)
                .with_config("container_port", &self.service.container_port.to_string())
                .with_config("cpu", &self.service.cpu.to_string())
                .with_config("memory_mib", &self.service.memory_mib.to_string())
                .with_config("replicas", &self.service.replicas.to_string())
                .provides("alb_dns_name")
                .provides("cluster_name")
                .provides("service_name")
                .requires("network", "vpc_id")
                .requires("network", "public_subnet_ids")
                .requires("network", "private_subnet_ids")
                .requires("network", "edge_security_group")
                .requires("network", "app_security_group")
                .requires("database", "endpoint")
                .requires("database", "secret_ref")
                .requires("registry", "repository_uri"),
        )?;

        let environment = self.stack.environment.clone();
        let stack_name = self.stack.name.clone();
        graph.visit_mut(|node| {
            node.config.insert("tag.environment".to_string(), environment.clone());
            node.config.insert("tag.stack".to_string(), stack_name.clone());
        });

        Ok(graph)
    }

    /// Lower the manifest into the three-tier security rule set:
    /// internet → alb (80/443), alb → service (container port),
    /// service → database (database port).
    pub fn lower_policy(&self) -> (BTreeMap<String, Tier>, Vec<SecurityRule>) {
        let groups: BTreeMap<String, Tier> = [
            ("alb".to_string(), Tier::Edge),
            ("service".to_string(), Tier::Compute),
            ("database".to_string(), Tier::Data),
        ]
        .into_iter()
        .collect();

        let rules = vec![
            SecurityRule::ingress_tcp(RuleSource::Anywhere, "alb", 80),
            SecurityRule::ingress_tcp(RuleSource::Anywhere, "alb", 443),
            SecurityRule::ingress_tcp(
                RuleSource::Group("alb".to_string()),
                "service",
                self.service.container_port,
            ),
            SecurityRule::ingress_tcp(
                RuleSource::Group("service".to_string()),
                "database",
                self.database.port,
            ),
        ];

        (groups, rules)
    }

    /// Build the deployment unit for a new workload version.
    pub fn deployment_unit(&self, image: &str) -> DeploymentUnit {
        DeploymentUnit {
            workload: self.stack.name.clone(),
            image: image.to_string(),
            replicas: self.service.replicas,
            cpu: self.service.cpu,
            memory_mib: self.service.memory_mib,
            env: self.service.env.clone(),
            secrets: self.service.secrets.clone(),
            health: self.service.health.clone(),
            shift: self.service.deploy.shift.clone(),
            warm_keep: self.service.deploy.warm_keep.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[stack]
name = "text-messaging"

[service]
container_port = 8080
"#;

    #[test]
    fn parse_minimal_manifest() {
        let manifest = StackManifest::from_str_toml(MINIMAL).unwrap();
        assert_eq!(manifest.stack.name, "text-messaging");
        assert_eq!(manifest.stack.environment, "dev");
        assert_eq!(manifest.network.availability_zones, 2);
        assert_eq!(manifest.database.port, 5432);
        assert_eq!(manifest.registry.image_retention, 10);
    }

    #[test]
    fn unknown_section_key_rejected() {
        let bad = r#"
[stack]
name = "app"

[service]
container_port = 8080
circuit_breaker = true
"#;
        assert!(StackManifest::from_str_toml(bad).is_err());
    }

    #[test]
    fn lowered_graph_has_expected_shape() {
        let manifest = StackManifest::from_str_toml(MINIMAL).unwrap();
        let graph = manifest.lower_graph().unwrap();

        let order = graph.resolve_order().unwrap();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("network") < pos("database"));
        assert!(pos("network") < pos("service"));
        assert!(pos("database") < pos("service"));
        assert!(pos("registry") < pos("service"));
    }

    #[test]
    fn visitor_pass_stamps_tags_on_every_node() {
        let manifest = StackManifest::from_str_toml(MINIMAL).unwrap();
        let graph = manifest.lower_graph().unwrap();
        for node in graph.nodes() {
            assert_eq!(node.config.get("tag.environment").map(String::as_str), Some("dev"));
            assert_eq!(
                node.config.get("tag.stack").map(String::as_str),
                Some("text-messaging")
            );
        }
    }

    #[test]
    fn lowered_policy_validates() {
        let manifest = StackManifest::from_str_toml(MINIMAL).unwrap();
        let (groups, rules) = manifest.lower_policy();
        assert!(strata_policy::PolicyGraph::new(groups, rules).is_ok());
    }

    #[test]
    fn deployment_unit_carries_service_settings() {
        let toml_str = r#"
[stack]
name = "text-messaging"

[service]
container_port = 8080
replicas = 2

[service.env]
PORT = "8080"

[service.secrets]
DB_PASSWORD = "secret://text-messaging/db-credentials#password"

[service.deploy]
warm_keep = "2m"
"#;
        let manifest = StackManifest::from_str_toml(toml_str).unwrap();
        let unit = manifest.deployment_unit("registry.local/app:v2");

        assert_eq!(unit.workload, "text-messaging");
        assert_eq!(unit.image, "registry.local/app:v2");
        assert_eq!(unit.replicas, 2);
        assert_eq!(unit.env.get("PORT").map(String::as_str), Some("8080"));
        assert!(unit.secrets.contains_key("DB_PASSWORD"));
        assert_eq!(unit.warm_keep, "2m");
        assert_eq!(unit.shift, ShiftPolicy::AllAtOnce);
    }

    #[test]
    fn linear_shift_policy_parses() {
        let toml_str = r#"
[stack]
name = "app"

[service]

[service.deploy.shift]
mode = "linear"
step_percent = 10
step_interval = "1m"
"#;
        let manifest = StackManifest::from_str_toml(toml_str).unwrap();
        assert_eq!(
            manifest.service.deploy.shift,
            ShiftPolicy::Linear {
                step_percent: 10,
                step_interval: "1m".to_string(),
            }
        );
    }

    #[test]
    fn invalid_duration_rejected_at_parse() {
        let bad = r#"
[stack]
name = "app"

[service]
container_port = 8080

[service.health]
interval = "5x"
"#;
        let err = StackManifest::from_str_toml(bad).unwrap_err();
        assert!(err.to_string().contains("service.health.interval"));
    }

    #[test]
    fn invalid_cooldown_rejected_at_parse() {
        let bad = r#"
[stack]
name = "app"

[service]
container_port = 8080

[service.scaling]
scale_in_cooldown = "soon"
"#;
        assert!(StackManifest::from_str_toml(bad).is_err());
    }

    #[test]
    fn stack_name_with_colon_rejected() {
        let bad = r#"
[stack]
name = "app:v2"

[service]
container_port = 8080
"#;
        let err = StackManifest::from_str_toml(bad).unwrap_err();
        assert!(err.to_string().contains("must not contain"));
    }
}
