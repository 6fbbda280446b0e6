//! The blue/green deployment state machine.
//!
//! Pure transition logic: observations enter as [`DeployEvent`]s, side
//! effects leave as [`DeployAction`]s for the driver to execute. The
//! machine itself never touches the network or the state store, which
//! keeps every transition unit-testable.
//!
//! Success path: `Created → Staging → Verifying → Shifting → Completed`.
//! `Verifying` and `Shifting` both branch to `RollingBack` on failure,
//! and `RollingBack → RolledBack` is terminal. Exactly one terminal
//! state is reached for any event sequence, and production traffic ends
//! on the new target iff that state is `Completed`.

use tracing::{info, warn};

use strata_core::{DeploymentUnit, ShiftPolicy};
use strata_health::{ProbeOutcome, ProbeTracker, Verdict};
use strata_state::{DeployState, Outcome};

/// Why a deployment rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackReason {
    /// Staging replicas failed to launch.
    StagingFailed(String),
    /// The target's failure threshold was reached.
    UnhealthyTarget,
    /// The verification window elapsed without a healthy verdict.
    HealthCheckTimeout,
    /// The routing change failed.
    RoutingFailed(String),
    /// Explicit operator abort; always honored immediately.
    OperatorAbort,
}

impl std::fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackReason::StagingFailed(e) => write!(f, "staging launch failed: {e}"),
            RollbackReason::UnhealthyTarget => f.write_str("target became unhealthy"),
            RollbackReason::HealthCheckTimeout => f.write_str("health check timeout"),
            RollbackReason::RoutingFailed(e) => write!(f, "routing change failed: {e}"),
            RollbackReason::OperatorAbort => f.write_str("operator abort"),
        }
    }
}

/// An observation fed into the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployEvent {
    /// Begin the release.
    Start,
    /// Staging replicas are running (not yet verified).
    ReplicasReady,
    /// Staging replicas could not be launched.
    ReplicasFailed(String),
    /// One health-probe result for the new target.
    Probe(ProbeOutcome),
    /// The bounded verification window elapsed.
    VerifyTimeout,
    /// A routing change completed; `percent` of traffic now reaches
    /// the new target.
    Shifted { percent: u32 },
    /// A routing change failed.
    RoutingFailed(String),
    /// The post-shift warm-keep wait elapsed with no late failure.
    WarmKeepElapsed,
    /// Operator abort.
    Abort,
    /// The driver finished executing the rollback actions.
    RollbackComplete,
}

/// A side effect the driver must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployAction {
    /// Launch the new version's replicas into the staging target.
    LaunchStaging { replicas: u32 },
    /// Start polling the staging target's health endpoint, bounded by
    /// the verification window.
    BeginVerification,
    /// Route `percent` of production traffic to the new target.
    ShiftTraffic { percent: u32 },
    /// Point production traffic back at the original target.
    RevertTraffic,
    /// Remove the new version's replicas.
    TeardownStaging,
    /// Remove the previous version's (now idle) replicas.
    TeardownPrevious,
}

/// One in-flight release of a workload.
#[derive(Debug)]
pub struct Deployment {
    unit: DeploymentUnit,
    state: DeployState,
    tracker: ProbeTracker,
    /// Percent of production traffic currently routed to the new target.
    shifted_percent: u32,
    rollback_reason: Option<RollbackReason>,
}

impl Deployment {
    pub fn new(unit: DeploymentUnit) -> Self {
        let tracker = ProbeTracker::new(&unit.health);
        Self {
            unit,
            state: DeployState::Created,
            tracker,
            shifted_percent: 0,
            rollback_reason: None,
        }
    }

    pub fn unit(&self) -> &DeploymentUnit {
        &self.unit
    }

    pub fn state(&self) -> DeployState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether production traffic currently points at the new target.
    pub fn traffic_on_new_target(&self) -> bool {
        match self.state {
            DeployState::Completed => true,
            DeployState::Shifting => self.shifted_percent > 0,
            _ => false,
        }
    }

    /// The recorded outcome, available once terminal.
    pub fn outcome(&self) -> Option<Outcome> {
        match self.state {
            DeployState::Completed => Some(Outcome::Succeeded),
            DeployState::RolledBack => Some(match &self.rollback_reason {
                Some(RollbackReason::OperatorAbort) => Outcome::Aborted,
                Some(reason) => Outcome::RolledBack {
                    reason: reason.to_string(),
                },
                None => Outcome::RolledBack {
                    reason: "unknown".to_string(),
                },
            }),
            _ => None,
        }
    }

    /// Feed one event in, get the actions to execute out.
    ///
    /// Events arriving in a terminal state (stale probes, late timers)
    /// are ignored.
    pub fn handle(&mut self, event: DeployEvent) -> Vec<DeployAction> {
        if self.is_terminal() {
            return Vec::new();
        }

        // Abort wins over everything else, from any non-terminal state.
        if event == DeployEvent::Abort {
            warn!(workload = %self.unit.workload, "operator abort");
            return self.begin_rollback(RollbackReason::OperatorAbort);
        }

        match (self.state, event) {
            (DeployState::Created, DeployEvent::Start) => {
                self.state = DeployState::Staging;
                info!(
                    workload = %self.unit.workload,
                    image = %self.unit.image,
                    replicas = self.unit.replicas,
                    "staging new version"
                );
                vec![DeployAction::LaunchStaging {
                    replicas: self.unit.replicas,
                }]
            }

            (DeployState::Staging, DeployEvent::ReplicasReady) => {
                self.state = DeployState::Verifying;
                self.tracker.reset();
                info!(workload = %self.unit.workload, "verifying staging target");
                vec![DeployAction::BeginVerification]
            }
            (DeployState::Staging, DeployEvent::ReplicasFailed(e)) => {
                self.begin_rollback(RollbackReason::StagingFailed(e))
            }

            (DeployState::Verifying, DeployEvent::Probe(outcome)) => {
                match self.tracker.record(outcome) {
                    Verdict::Healthy => {
                        let percent = self.first_shift_percent();
                        self.state = DeployState::Shifting;
                        info!(
                            workload = %self.unit.workload,
                            percent,
                            "staging target healthy, shifting traffic"
                        );
                        vec![DeployAction::ShiftTraffic { percent }]
                    }
                    Verdict::Unhealthy => self.begin_rollback(RollbackReason::UnhealthyTarget),
                    Verdict::Pending => Vec::new(),
                }
            }
            (DeployState::Verifying, DeployEvent::VerifyTimeout) => {
                self.begin_rollback(RollbackReason::HealthCheckTimeout)
            }

            (DeployState::Shifting, DeployEvent::Shifted { percent }) => {
                self.shifted_percent = percent;
                if percent < 100 {
                    vec![DeployAction::ShiftTraffic {
                        percent: self.next_shift_percent(),
                    }]
                } else {
                    // Full shift done; warm-keep wait runs before the
                    // old target is torn down.
                    Vec::new()
                }
            }
            (DeployState::Shifting, DeployEvent::Probe(outcome)) => {
                // Late-failure watch while the old target is kept warm.
                match self.tracker.record(outcome) {
                    Verdict::Unhealthy => self.begin_rollback(RollbackReason::UnhealthyTarget),
                    _ => Vec::new(),
                }
            }
            (DeployState::Shifting, DeployEvent::RoutingFailed(e)) => {
                self.begin_rollback(RollbackReason::RoutingFailed(e))
            }
            (DeployState::Shifting, DeployEvent::WarmKeepElapsed) => {
                if self.shifted_percent < 100 {
                    return Vec::new();
                }
                self.state = DeployState::Completed;
                info!(workload = %self.unit.workload, "deployment completed");
                vec![DeployAction::TeardownPrevious]
            }

            (DeployState::RollingBack, DeployEvent::RollbackComplete) => {
                self.state = DeployState::RolledBack;
                info!(
                    workload = %self.unit.workload,
                    reason = %self.rollback_reason.as_ref().map(|r| r.to_string()).unwrap_or_default(),
                    "rollback complete"
                );
                Vec::new()
            }

            (state, event) => {
                // Stale observation for the current state.
                tracing::debug!(?state, ?event, "event ignored");
                Vec::new()
            }
        }
    }

    fn begin_rollback(&mut self, reason: RollbackReason) -> Vec<DeployAction> {
        warn!(
            workload = %self.unit.workload,
            reason = %reason,
            "rolling back"
        );
        let was_shifted = self.shifted_percent > 0;
        self.state = DeployState::RollingBack;
        self.rollback_reason = Some(reason);
        self.shifted_percent = 0;
        if was_shifted {
            vec![DeployAction::RevertTraffic, DeployAction::TeardownStaging]
        } else {
            vec![DeployAction::TeardownStaging]
        }
    }

    fn first_shift_percent(&self) -> u32 {
        match &self.unit.shift {
            ShiftPolicy::AllAtOnce => 100,
            ShiftPolicy::Linear { step_percent, .. } => (*step_percent).clamp(1, 100),
        }
    }

    fn next_shift_percent(&self) -> u32 {
        match &self.unit.shift {
            ShiftPolicy::AllAtOnce => 100,
            ShiftPolicy::Linear { step_percent, .. } => {
                (self.shifted_percent + (*step_percent).max(1)).min(100)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::HealthContract;

    fn unit(shift: ShiftPolicy) -> DeploymentUnit {
        DeploymentUnit {
            workload: "app".to_string(),
            image: "registry.local/app:v2".to_string(),
            replicas: 2,
            cpu: 256,
            memory_mib: 512,
            env: Default::default(),
            secrets: Default::default(),
            health: HealthContract {
                healthy_threshold: 2,
                unhealthy_threshold: 3,
                ..HealthContract::default()
            },
            shift,
            warm_keep: "5m".to_string(),
        }
    }

    fn staged(shift: ShiftPolicy) -> Deployment {
        let mut dep = Deployment::new(unit(shift));
        dep.handle(DeployEvent::Start);
        dep.handle(DeployEvent::ReplicasReady);
        assert_eq!(dep.state(), DeployState::Verifying);
        dep
    }

    #[test]
    fn success_path_all_at_once() {
        let mut dep = Deployment::new(unit(ShiftPolicy::AllAtOnce));

        let actions = dep.handle(DeployEvent::Start);
        assert_eq!(actions, vec![DeployAction::LaunchStaging { replicas: 2 }]);
        assert_eq!(dep.state(), DeployState::Staging);

        assert_eq!(
            dep.handle(DeployEvent::ReplicasReady),
            vec![DeployAction::BeginVerification]
        );

        // Success threshold is 2: the first pass keeps pending.
        assert!(dep.handle(DeployEvent::Probe(ProbeOutcome::Pass)).is_empty());
        let actions = dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
        assert_eq!(actions, vec![DeployAction::ShiftTraffic { percent: 100 }]);
        assert_eq!(dep.state(), DeployState::Shifting);

        assert!(dep.handle(DeployEvent::Shifted { percent: 100 }).is_empty());
        assert!(dep.traffic_on_new_target());

        let actions = dep.handle(DeployEvent::WarmKeepElapsed);
        assert_eq!(actions, vec![DeployAction::TeardownPrevious]);
        assert_eq!(dep.state(), DeployState::Completed);
        assert_eq!(dep.outcome(), Some(Outcome::Succeeded));
        assert!(dep.traffic_on_new_target());
    }

    #[test]
    fn three_consecutive_failures_roll_back() {
        let mut dep = staged(ShiftPolicy::AllAtOnce);

        assert!(dep.handle(DeployEvent::Probe(ProbeOutcome::Fail)).is_empty());
        assert!(dep.handle(DeployEvent::Probe(ProbeOutcome::Fail)).is_empty());
        let actions = dep.handle(DeployEvent::Probe(ProbeOutcome::Fail));
        assert_eq!(actions, vec![DeployAction::TeardownStaging]);
        assert_eq!(dep.state(), DeployState::RollingBack);

        dep.handle(DeployEvent::RollbackComplete);
        assert_eq!(dep.state(), DeployState::RolledBack);
        assert_eq!(
            dep.outcome(),
            Some(Outcome::RolledBack {
                reason: "target became unhealthy".to_string(),
            })
        );
        assert!(!dep.traffic_on_new_target());
    }

    #[test]
    fn isolated_failures_keep_verifying() {
        let mut dep = staged(ShiftPolicy::AllAtOnce);

        for _ in 0..5 {
            dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
            dep.handle(DeployEvent::Probe(ProbeOutcome::Fail));
        }
        // Never two passes or three failures in a row.
        assert_eq!(dep.state(), DeployState::Verifying);
    }

    #[test]
    fn verify_timeout_rolls_back() {
        let mut dep = staged(ShiftPolicy::AllAtOnce);

        dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
        let actions = dep.handle(DeployEvent::VerifyTimeout);
        assert_eq!(actions, vec![DeployAction::TeardownStaging]);

        dep.handle(DeployEvent::RollbackComplete);
        assert_eq!(
            dep.outcome(),
            Some(Outcome::RolledBack {
                reason: "health check timeout".to_string(),
            })
        );
    }

    #[test]
    fn abort_during_shifting_reverts_traffic() {
        let mut dep = staged(ShiftPolicy::AllAtOnce);
        dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
        dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
        dep.handle(DeployEvent::Shifted { percent: 100 });
        assert!(dep.traffic_on_new_target());

        let actions = dep.handle(DeployEvent::Abort);
        assert_eq!(
            actions,
            vec![DeployAction::RevertTraffic, DeployAction::TeardownStaging]
        );
        assert_eq!(dep.state(), DeployState::RollingBack);
        assert!(!dep.traffic_on_new_target());

        dep.handle(DeployEvent::RollbackComplete);
        assert_eq!(dep.state(), DeployState::RolledBack);
        assert_eq!(dep.outcome(), Some(Outcome::Aborted));
    }

    #[test]
    fn abort_before_shift_skips_revert() {
        let mut dep = staged(ShiftPolicy::AllAtOnce);
        let actions = dep.handle(DeployEvent::Abort);
        assert_eq!(actions, vec![DeployAction::TeardownStaging]);
    }

    #[test]
    fn routing_failure_rolls_back() {
        let mut dep = staged(ShiftPolicy::AllAtOnce);
        dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
        dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));

        let actions = dep.handle(DeployEvent::RoutingFailed("listener gone".to_string()));
        assert_eq!(actions, vec![DeployAction::TeardownStaging]);
        dep.handle(DeployEvent::RollbackComplete);
        assert_eq!(
            dep.outcome(),
            Some(Outcome::RolledBack {
                reason: "routing change failed: listener gone".to_string(),
            })
        );
    }

    #[test]
    fn late_failure_during_warm_keep_rolls_back() {
        let mut dep = staged(ShiftPolicy::AllAtOnce);
        dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
        dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
        dep.handle(DeployEvent::Shifted { percent: 100 });

        for _ in 0..3 {
            dep.handle(DeployEvent::Probe(ProbeOutcome::Fail));
        }
        assert_eq!(dep.state(), DeployState::RollingBack);
        dep.handle(DeployEvent::RollbackComplete);
        assert!(!dep.traffic_on_new_target());
    }

    #[test]
    fn linear_policy_shifts_in_steps() {
        let mut dep = staged(ShiftPolicy::Linear {
            step_percent: 40,
            step_interval: "1m".to_string(),
        });
        dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
        let actions = dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
        assert_eq!(actions, vec![DeployAction::ShiftTraffic { percent: 40 }]);

        let actions = dep.handle(DeployEvent::Shifted { percent: 40 });
        assert_eq!(actions, vec![DeployAction::ShiftTraffic { percent: 80 }]);

        let actions = dep.handle(DeployEvent::Shifted { percent: 80 });
        assert_eq!(actions, vec![DeployAction::ShiftTraffic { percent: 100 }]);

        assert!(dep.handle(DeployEvent::Shifted { percent: 100 }).is_empty());
        let actions = dep.handle(DeployEvent::WarmKeepElapsed);
        assert_eq!(actions, vec![DeployAction::TeardownPrevious]);
        assert_eq!(dep.state(), DeployState::Completed);
    }

    #[test]
    fn partial_linear_shift_rolls_back_with_revert() {
        let mut dep = staged(ShiftPolicy::Linear {
            step_percent: 25,
            step_interval: "1m".to_string(),
        });
        dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
        dep.handle(DeployEvent::Probe(ProbeOutcome::Pass));
        dep.handle(DeployEvent::Shifted { percent: 25 });

        let actions = dep.handle(DeployEvent::Abort);
        assert_eq!(
            actions,
            vec![DeployAction::RevertTraffic, DeployAction::TeardownStaging]
        );
    }

    #[test]
    fn terminal_state_ignores_further_events() {
        let mut dep = staged(ShiftPolicy::AllAtOnce);
        dep.handle(DeployEvent::VerifyTimeout);
        dep.handle(DeployEvent::RollbackComplete);
        assert_eq!(dep.state(), DeployState::RolledBack);

        assert!(dep.handle(DeployEvent::Probe(ProbeOutcome::Pass)).is_empty());
        assert!(dep.handle(DeployEvent::Abort).is_empty());
        assert!(dep.handle(DeployEvent::Start).is_empty());
        assert_eq!(dep.state(), DeployState::RolledBack);
    }

    #[test]
    fn exactly_one_terminal_state_for_random_event_mixes() {
        // Exhaustive-ish: drive the machine with assorted event
        // sequences and check it lands in exactly one terminal state
        // with traffic on the new target iff it completed.
        let sequences: Vec<Vec<DeployEvent>> = vec![
            vec![
                DeployEvent::Start,
                DeployEvent::ReplicasReady,
                DeployEvent::Probe(ProbeOutcome::Pass),
                DeployEvent::Probe(ProbeOutcome::Pass),
                DeployEvent::Shifted { percent: 100 },
                DeployEvent::WarmKeepElapsed,
                DeployEvent::Probe(ProbeOutcome::Fail),
            ],
            vec![
                DeployEvent::Start,
                DeployEvent::ReplicasFailed("no capacity".to_string()),
                DeployEvent::RollbackComplete,
                DeployEvent::WarmKeepElapsed,
            ],
            vec![
                DeployEvent::Start,
                DeployEvent::ReplicasReady,
                DeployEvent::Probe(ProbeOutcome::Fail),
                DeployEvent::VerifyTimeout,
                DeployEvent::RollbackComplete,
                DeployEvent::Shifted { percent: 100 },
            ],
            vec![
                DeployEvent::Start,
                DeployEvent::Abort,
                DeployEvent::RollbackComplete,
            ],
        ];

        for events in sequences {
            let mut dep = Deployment::new(unit(ShiftPolicy::AllAtOnce));
            for event in events {
                dep.handle(event);
            }
            assert!(dep.is_terminal());
            let completed = dep.state() == DeployState::Completed;
            assert_eq!(dep.traffic_on_new_target(), completed);
            assert_eq!(dep.outcome().is_some(), true);
        }
    }
}
