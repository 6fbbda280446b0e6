//! Deployment-facing shared types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Health-check contract for a workload.
///
/// The workload exposes an HTTP endpoint that returns `expected_status`
/// when ready to serve. Verification and monitoring both poll it on
/// `interval` with a per-probe `timeout`; a target is healthy after
/// `healthy_threshold` consecutive passes and unhealthy after
/// `unhealthy_threshold` consecutive failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthContract {
    /// HTTP path to probe.
    #[serde(default = "default_health_path")]
    pub path: String,
    /// Status code counted as a pass.
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// Probe interval, e.g. "30s".
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Per-probe timeout, e.g. "5s".
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Consecutive passes before a target counts as healthy.
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    /// Consecutive failures before a target counts as unhealthy.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// Hard deadline for verification, e.g. "5m".
    #[serde(default = "default_verify_window")]
    pub verify_window: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}
fn default_expected_status() -> u16 {
    200
}
fn default_interval() -> String {
    "30s".to_string()
}
fn default_timeout() -> String {
    "5s".to_string()
}
fn default_healthy_threshold() -> u32 {
    2
}
fn default_unhealthy_threshold() -> u32 {
    3
}
fn default_verify_window() -> String {
    "5m".to_string()
}

impl Default for HealthContract {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            expected_status: default_expected_status(),
            interval: default_interval(),
            timeout: default_timeout(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
            verify_window: default_verify_window(),
        }
    }
}

impl HealthContract {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(30))
    }

    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn verify_window(&self) -> Duration {
        parse_duration(&self.verify_window).unwrap_or(Duration::from_secs(300))
    }
}

/// How production traffic moves to a verified staging target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ShiftPolicy {
    /// One atomic routing change. Default.
    AllAtOnce,
    /// Weighted steps of `step_percent` every `step_interval`, with the
    /// same rollback trigger as the atomic variant.
    Linear { step_percent: u32, step_interval: String },
}

impl Default for ShiftPolicy {
    fn default() -> Self {
        Self::AllAtOnce
    }
}

/// One releasable version of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    /// Workload name (stable across releases).
    pub workload: String,
    /// Container image reference identifying the version.
    pub image: String,
    /// Replica count for the staging target.
    pub replicas: u32,
    /// CPU request in provider units.
    pub cpu: u32,
    /// Memory request in MiB.
    pub memory_mib: u32,
    /// Plain environment variables.
    pub env: BTreeMap<String, String>,
    /// Env var name → secret-store reference, resolved at launch.
    pub secrets: BTreeMap<String, String>,
    pub health: HealthContract,
    pub shift: ShiftPolicy,
    /// Warm-keep wait after the shift before the old target is torn
    /// down, e.g. "5m".
    pub warm_keep: String,
}

impl DeploymentUnit {
    pub fn warm_keep(&self) -> Duration {
        parse_duration(&self.warm_keep).unwrap_or(Duration::from_secs(300))
    }
}

/// Parse a duration string like "5s", "500ms", "2m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("junk"), None);
    }

    #[test]
    fn health_contract_defaults() {
        let contract = HealthContract::default();
        assert_eq!(contract.path, "/health");
        assert_eq!(contract.expected_status, 200);
        assert_eq!(contract.healthy_threshold, 2);
        assert_eq!(contract.unhealthy_threshold, 3);
        assert_eq!(contract.interval(), Duration::from_secs(30));
        assert_eq!(contract.verify_window(), Duration::from_secs(300));
    }

    #[test]
    fn shift_policy_defaults_to_all_at_once() {
        assert_eq!(ShiftPolicy::default(), ShiftPolicy::AllAtOnce);
    }

    #[test]
    fn health_contract_rejects_unknown_fields() {
        let toml_str = r#"
path = "/healthz"
circuit_breaker = true
"#;
        assert!(toml::from_str::<HealthContract>(toml_str).is_err());
    }
}
