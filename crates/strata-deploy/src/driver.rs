//! Async driver that executes the deployment state machine.
//!
//! The driver owns the timers (probe interval, verification deadline,
//! shift steps, warm-keep wait), calls into a [`TargetRuntime`] for the
//! real side effects, and persists a [`DeploymentRecord`] whenever the
//! machine changes phase.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use strata_core::{DeploymentUnit, ShiftPolicy, parse_duration};
use strata_health::ProbeOutcome;
use strata_state::{DeployState, DeploymentRecord, Outcome, StateStore};

use crate::error::{DeployError, DeployResult};
use crate::machine::{DeployAction, DeployEvent, Deployment};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The compute and routing substrate a deployment runs against.
///
/// Implementations translate the machine's actions into calls on the
/// real platform. [`crate::SimRuntime`] is the in-process stand-in.
pub trait TargetRuntime: Send + Sync {
    /// Launch the new version's replicas; resolves to the staging
    /// target's probe address (`host:port`).
    fn launch_staging(&self, unit: &DeploymentUnit) -> BoxFuture<anyhow::Result<String>>;

    /// Route `percent` of production traffic to the staging target.
    fn shift_traffic(&self, workload: &str, percent: u32) -> BoxFuture<anyhow::Result<()>>;

    /// Point all production traffic back at the original target.
    fn revert_traffic(&self, workload: &str) -> BoxFuture<anyhow::Result<()>>;

    /// Remove the staging target's replicas.
    fn teardown_staging(&self, workload: &str) -> BoxFuture<anyhow::Result<()>>;

    /// Remove the previous version's replicas after a completed shift.
    fn teardown_previous(&self, workload: &str) -> BoxFuture<anyhow::Result<()>>;
}

/// Probe callback: address in, one probe result out.
pub type ProbeFn = Box<dyn Fn(&str) -> BoxFuture<ProbeOutcome> + Send + Sync>;

/// Drives one workload's releases end to end.
pub struct DeploymentController {
    store: Arc<StateStore>,
    runtime: Arc<dyn TargetRuntime>,
    probe: ProbeFn,
}

impl DeploymentController {
    pub fn new(store: Arc<StateStore>, runtime: Arc<dyn TargetRuntime>, probe: ProbeFn) -> Self {
        Self {
            store,
            runtime,
            probe,
        }
    }

    /// Register a new deployment for `unit`.
    ///
    /// Refuses when a non-terminal record already exists for the
    /// workload: exactly one in-flight deployment per workload.
    pub fn begin(&self, unit: &DeploymentUnit) -> DeployResult<DeploymentRecord> {
        if let Some(existing) = self.store.in_flight_deployment(&unit.workload)? {
            return Err(DeployError::DeploymentInProgress {
                workload: unit.workload.clone(),
                seq: existing.seq,
            });
        }
        let record = DeploymentRecord {
            seq: self.store.next_deployment_seq(&unit.workload)?,
            workload: unit.workload.clone(),
            image: unit.image.clone(),
            state: DeployState::Created,
            outcome: None,
            traffic_shifted: false,
            started_at: epoch_secs(),
            finished_at: None,
        };
        self.store.put_deployment(&record)?;
        Ok(record)
    }

    /// Run the deployment registered by [`begin`](Self::begin) to a
    /// terminal state and return its outcome.
    ///
    /// Flipping `abort` to `true` triggers a rollback from any
    /// non-terminal phase.
    pub async fn run(
        &self,
        record: DeploymentRecord,
        unit: DeploymentUnit,
        mut abort: watch::Receiver<bool>,
    ) -> DeployResult<Outcome> {
        let mut dep = Deployment::new(unit.clone());
        let mut pending: VecDeque<DeployEvent> = VecDeque::from([DeployEvent::Start]);

        let probe_every = unit.health.interval();
        let step_interval = match &unit.shift {
            ShiftPolicy::Linear { step_interval, .. } => {
                parse_duration(step_interval).unwrap_or(Duration::from_secs(30))
            }
            ShiftPolicy::AllAtOnce => Duration::ZERO,
        };

        let mut staging_addr = String::new();
        let mut next_probe: Option<Instant> = None;
        let mut verify_deadline: Option<Instant> = None;
        let mut shift_due: Option<(Instant, u32)> = None;
        let mut warm_due: Option<Instant> = None;
        let mut first_shift_done = false;
        let mut abort_closed = false;
        let mut last_persisted = record.state;

        loop {
            while let Some(event) = pending.pop_front() {
                for action in dep.handle(event) {
                    match action {
                        DeployAction::LaunchStaging { replicas } => {
                            debug!(workload = %unit.workload, replicas, "launching staging");
                            match self.runtime.launch_staging(&unit).await {
                                Ok(addr) => {
                                    staging_addr = addr;
                                    pending.push_back(DeployEvent::ReplicasReady);
                                }
                                Err(e) => {
                                    pending.push_back(DeployEvent::ReplicasFailed(e.to_string()));
                                }
                            }
                        }
                        DeployAction::BeginVerification => {
                            verify_deadline = Some(Instant::now() + unit.health.verify_window());
                            next_probe = Some(Instant::now());
                        }
                        DeployAction::ShiftTraffic { percent } => {
                            verify_deadline = None;
                            let at = if first_shift_done {
                                Instant::now() + step_interval
                            } else {
                                Instant::now()
                            };
                            first_shift_done = true;
                            shift_due = Some((at, percent));
                        }
                        DeployAction::RevertTraffic => {
                            if let Err(e) = self.runtime.revert_traffic(&unit.workload).await {
                                warn!(workload = %unit.workload, error = %e, "revert failed");
                            }
                        }
                        DeployAction::TeardownStaging => {
                            if let Err(e) = self.runtime.teardown_staging(&unit.workload).await {
                                warn!(workload = %unit.workload, error = %e, "staging teardown failed");
                            }
                        }
                        DeployAction::TeardownPrevious => {
                            if let Err(e) = self.runtime.teardown_previous(&unit.workload).await {
                                warn!(workload = %unit.workload, error = %e, "previous-target teardown failed");
                            }
                        }
                    }
                }
                if dep.state() != last_persisted {
                    self.persist(&record, &dep)?;
                    last_persisted = dep.state();
                }
            }

            if dep.state() == DeployState::RollingBack {
                next_probe = None;
                verify_deadline = None;
                shift_due = None;
                warm_due = None;
                pending.push_back(DeployEvent::RollbackComplete);
                continue;
            }
            if dep.is_terminal() {
                break;
            }

            let far = Instant::now() + Duration::from_secs(86_400);
            tokio::select! {
                _ = tokio::time::sleep_until(next_probe.unwrap_or(far)), if next_probe.is_some() => {
                    let outcome = (self.probe)(&staging_addr).await;
                    next_probe = Some(Instant::now() + probe_every);
                    pending.push_back(DeployEvent::Probe(outcome));
                }
                _ = tokio::time::sleep_until(verify_deadline.unwrap_or(far)), if verify_deadline.is_some() => {
                    verify_deadline = None;
                    pending.push_back(DeployEvent::VerifyTimeout);
                }
                _ = tokio::time::sleep_until(shift_due.map(|(at, _)| at).unwrap_or(far)), if shift_due.is_some() => {
                    let percent = shift_due.map(|(_, p)| p).unwrap_or(100);
                    shift_due = None;
                    match self.runtime.shift_traffic(&unit.workload, percent).await {
                        Ok(()) => {
                            if percent >= 100 {
                                warm_due = Some(Instant::now() + unit.warm_keep());
                            }
                            pending.push_back(DeployEvent::Shifted { percent });
                        }
                        Err(e) => pending.push_back(DeployEvent::RoutingFailed(e.to_string())),
                    }
                }
                _ = tokio::time::sleep_until(warm_due.unwrap_or(far)), if warm_due.is_some() => {
                    warm_due = None;
                    next_probe = None;
                    pending.push_back(DeployEvent::WarmKeepElapsed);
                }
                changed = abort.changed(), if !abort_closed => {
                    match changed {
                        Ok(()) if *abort.borrow() => pending.push_back(DeployEvent::Abort),
                        Ok(()) => {}
                        Err(_) => abort_closed = true,
                    }
                }
            }
        }

        match dep.outcome() {
            Some(outcome) => Ok(outcome),
            None => Ok(Outcome::Aborted),
        }
    }

    fn persist(&self, record: &DeploymentRecord, dep: &Deployment) -> DeployResult<()> {
        let mut updated = record.clone();
        updated.state = dep.state();
        updated.outcome = dep.outcome();
        updated.traffic_shifted = dep.traffic_on_new_target();
        if dep.is_terminal() {
            updated.finished_at = Some(epoch_secs());
        }
        self.store.put_deployment(&updated)?;
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
