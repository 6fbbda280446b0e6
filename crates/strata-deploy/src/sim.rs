//! In-process runtime used by the CLI's dry-run mode and the tests.

use std::sync::Mutex;

use anyhow::bail;

use strata_core::DeploymentUnit;

use crate::driver::{BoxFuture, TargetRuntime};

/// Records every runtime call instead of touching real infrastructure.
#[derive(Debug, Default)]
pub struct SimRuntime {
    calls: Mutex<Vec<String>>,
    fail_launch: Mutex<Option<String>>,
    fail_shift: Mutex<Option<String>>,
}

impl SimRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Make the next `launch_staging` call fail with `message`.
    pub fn fail_launch(&self, message: &str) {
        if let Ok(mut slot) = self.fail_launch.lock() {
            *slot = Some(message.to_string());
        }
    }

    /// Make the next `shift_traffic` call fail with `message`.
    pub fn fail_shift(&self, message: &str) {
        if let Ok(mut slot) = self.fail_shift.lock() {
            *slot = Some(message.to_string());
        }
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl TargetRuntime for SimRuntime {
    fn launch_staging(&self, unit: &DeploymentUnit) -> BoxFuture<anyhow::Result<String>> {
        self.record(format!("launch_staging {} {}", unit.workload, unit.image));
        let failure = self.fail_launch.lock().ok().and_then(|mut slot| slot.take());
        let workload = unit.workload.clone();
        Box::pin(async move {
            match failure {
                Some(message) => bail!("{message}"),
                None => Ok(format!("sim-{workload}.staging.internal:8080")),
            }
        })
    }

    fn shift_traffic(&self, workload: &str, percent: u32) -> BoxFuture<anyhow::Result<()>> {
        self.record(format!("shift_traffic {workload} {percent}"));
        let failure = self.fail_shift.lock().ok().and_then(|mut slot| slot.take());
        Box::pin(async move {
            match failure {
                Some(message) => bail!("{message}"),
                None => Ok(()),
            }
        })
    }

    fn revert_traffic(&self, workload: &str) -> BoxFuture<anyhow::Result<()>> {
        self.record(format!("revert_traffic {workload}"));
        Box::pin(async { Ok(()) })
    }

    fn teardown_staging(&self, workload: &str) -> BoxFuture<anyhow::Result<()>> {
        self.record(format!("teardown_staging {workload}"));
        Box::pin(async { Ok(()) })
    }

    fn teardown_previous(&self, workload: &str) -> BoxFuture<anyhow::Result<()>> {
        self.record(format!("teardown_previous {workload}"));
        Box::pin(async { Ok(()) })
    }
}
