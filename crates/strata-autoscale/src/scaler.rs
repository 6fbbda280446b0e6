//! Target-tracking autoscaler.
//!
//! Compares averaged utilization against the configured target and
//! emits scaling decisions. The actual resize is performed by a
//! callback to the runtime; decisions are also returned so callers can
//! log or assert on them. Scale-out and scale-in run on independent
//! cooldown clocks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use strata_core::{ScalingConfig, parse_duration};
use strata_state::StateStore;

/// A scaling decision for a single workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Resize the live target to the specified replica count.
    ScaleTo(u32),
    /// No change needed.
    NoChange,
}

type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Callback type for performing the resize.
///
/// The autoscaler calls this with (workload, target_replicas). The
/// callback addresses the live traffic target only; while a deployment
/// is in flight, the staging target's count stays pinned.
pub type ScaleCallback = Box<dyn Fn(&str, u32) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

/// Callback supplying the latest utilization sample for a workload.
pub type MetricsFn = Box<dyn Fn(&str) -> BoxFuture<anyhow::Result<Sample>> + Send + Sync>;

/// Utilization averaged across the live target's replicas.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Current live replica count.
    pub replicas: u32,
}

/// Per-workload cooldown clocks, tracked independently per direction.
struct ScaleState {
    last_scale_out: u64,
    last_scale_in: u64,
}

impl ScaleState {
    fn new() -> Self {
        Self {
            last_scale_out: 0,
            last_scale_in: 0,
        }
    }
}

/// Keeps each workload's utilization near its target by resizing the
/// live traffic target.
pub struct AutoScaler {
    store: Arc<StateStore>,
    scale_states: HashMap<String, ScaleState>,
    scale_fn: Option<ScaleCallback>,
    metrics_fn: Option<MetricsFn>,
}

impl AutoScaler {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            scale_states: HashMap::new(),
            scale_fn: None,
            metrics_fn: None,
        }
    }

    /// Set the callback used to perform the resize.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.scale_fn = Some(f);
        self
    }

    /// Set the callback used to fetch utilization samples.
    pub fn with_metrics_fn(mut self, f: MetricsFn) -> Self {
        self.metrics_fn = Some(f);
        self
    }

    /// Evaluate one workload against its scaling config.
    pub fn evaluate(
        &mut self,
        workload: &str,
        config: &ScalingConfig,
        sample: &Sample,
    ) -> ScaleDecision {
        self.evaluate_at(epoch_secs(), workload, config, sample)
    }

    /// Evaluation at an explicit clock, so cooldown behavior is
    /// testable without sleeping.
    pub fn evaluate_at(
        &mut self,
        now: u64,
        workload: &str,
        config: &ScalingConfig,
        sample: &Sample,
    ) -> ScaleDecision {
        let state = self
            .scale_states
            .entry(workload.to_string())
            .or_insert_with(ScaleState::new);

        let out_cooldown = cooldown_secs(&config.scale_out_cooldown, 60);
        let in_cooldown = cooldown_secs(&config.scale_in_cooldown, 300);

        let value = match config.metric.as_str() {
            "cpu" => sample.cpu_percent,
            "memory" => sample.memory_percent,
            other => {
                warn!(metric = %other, workload, "unknown scaling metric");
                return ScaleDecision::NoChange;
            }
        };

        let target = config.target_percent;
        let current = sample.replicas;
        if target <= 0.0 || current == 0 {
            return ScaleDecision::NoChange;
        }
        // Target tracking: the replica count where the metric would sit
        // at the target, assuming load spreads evenly.
        let desired = ((current as f64) * value / target).ceil() as u32;

        if value > target && now.saturating_sub(state.last_scale_out) >= out_cooldown {
            let clamped = desired.min(config.max_replicas);
            if clamped > current {
                state.last_scale_out = now;
                debug!(
                    workload,
                    from = current,
                    to = clamped,
                    metric = %config.metric,
                    value,
                    target,
                    "scaling out"
                );
                return ScaleDecision::ScaleTo(clamped);
            }
        }

        if value < target
            && current > config.min_replicas
            && now.saturating_sub(state.last_scale_in) >= in_cooldown
        {
            let clamped = desired.max(config.min_replicas).max(1);
            if clamped < current {
                state.last_scale_in = now;
                debug!(
                    workload,
                    from = current,
                    to = clamped,
                    metric = %config.metric,
                    value,
                    target,
                    "scaling in"
                );
                return ScaleDecision::ScaleTo(clamped);
            }
        }

        ScaleDecision::NoChange
    }

    /// One control-loop tick: fetch a sample, evaluate, and apply any
    /// resize through the callback.
    pub async fn tick(
        &mut self,
        workload: &str,
        config: &ScalingConfig,
    ) -> anyhow::Result<ScaleDecision> {
        let sample = match &self.metrics_fn {
            Some(metrics_fn) => metrics_fn(workload).await?,
            None => return Ok(ScaleDecision::NoChange),
        };

        if let Some(in_flight) = self.store.in_flight_deployment(workload)? {
            debug!(
                workload,
                seq = in_flight.seq,
                "deployment in flight, staging target pinned"
            );
        }

        let decision = self.evaluate(workload, config, &sample);
        if let ScaleDecision::ScaleTo(target) = &decision
            && let Some(scale_fn) = &self.scale_fn
            && let Err(e) = scale_fn(workload, *target).await
        {
            warn!(workload, target, error = %e, "resize failed");
        }
        Ok(decision)
    }

    /// Run the control loop on a fixed tick until shutdown flips.
    pub async fn run(
        &mut self,
        workload: &str,
        config: &ScalingConfig,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(workload, interval_secs = interval.as_secs(), "autoscaler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick(workload, config).await {
                        tracing::error!(workload, error = %e, "autoscaler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!(workload, "autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

fn cooldown_secs(s: &str, fallback: u64) -> u64 {
    parse_duration(s)
        .map(|d| d.as_secs())
        .unwrap_or(fallback)
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
