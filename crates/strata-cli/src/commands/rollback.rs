use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use tracing::warn;

use strata_deploy::{SimRuntime, TargetRuntime};
use strata_state::{DeployState, Outcome};

use super::{CommandError, CommandResult, Context};

/// Roll the workload's in-flight deployment back.
///
/// The operator-facing escape hatch: honored from any non-terminal
/// state and recorded as an abort. Production traffic is pointed back
/// at the original target (when any had been shifted) and the staging
/// replicas are removed before the record goes terminal.
pub async fn run(ctx: &Context) -> CommandResult {
    run_with_runtime(ctx, Arc::new(SimRuntime::new())).await
}

async fn run_with_runtime(ctx: &Context, runtime: Arc<dyn TargetRuntime>) -> CommandResult {
    let workload = &ctx.manifest.stack.name;
    let in_flight = ctx
        .store
        .in_flight_deployment(workload)
        .context("failed to read deployment history")
        .map_err(CommandError::Deploy)?;

    let mut record = match in_flight {
        Some(record) => record,
        None => {
            println!("No in-flight deployment for '{workload}'.");
            return Ok(());
        }
    };

    warn!(workload, seq = record.seq, state = ?record.state, "operator rollback");
    if record.traffic_shifted {
        runtime
            .revert_traffic(workload)
            .await
            .context("failed to point traffic back at the original target")
            .map_err(CommandError::Deploy)?;
    }
    if let Err(e) = runtime.teardown_staging(workload).await {
        warn!(workload, error = %e, "staging teardown failed");
    }

    record.state = DeployState::RolledBack;
    record.outcome = Some(Outcome::Aborted);
    record.traffic_shifted = false;
    record.finished_at = Some(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    );
    ctx.store
        .put_deployment(&record)
        .map_err(|e| CommandError::Deploy(anyhow::Error::new(e)))?;

    println!("Deployment {} of '{workload}' rolled back.", record.seq);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::write_stack;
    use strata_state::DeploymentRecord;

    fn in_flight_record(state: DeployState, traffic_shifted: bool) -> DeploymentRecord {
        DeploymentRecord {
            seq: 1,
            workload: "demo".to_string(),
            image: "registry.local/app:v1".to_string(),
            state,
            outcome: None,
            traffic_shifted,
            started_at: 100,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn no_in_flight_deployment_is_a_no_op() {
        let (_dir, manifest, state) = write_stack("");
        let ctx = Context::load(&manifest, &state).unwrap();
        let runtime = Arc::new(SimRuntime::new());
        run_with_runtime(&ctx, runtime.clone()).await.unwrap();
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn unshifted_rollback_tears_down_staging_only() {
        let (_dir, manifest, state) = write_stack("");
        let ctx = Context::load(&manifest, &state).unwrap();
        ctx.store
            .put_deployment(&in_flight_record(DeployState::Verifying, false))
            .unwrap();

        let runtime = Arc::new(SimRuntime::new());
        run_with_runtime(&ctx, runtime.clone()).await.unwrap();

        let record = ctx.store.get_deployment("demo", 1).unwrap().unwrap();
        assert_eq!(record.state, DeployState::RolledBack);
        assert_eq!(record.outcome, Some(Outcome::Aborted));
        assert!(!record.traffic_shifted);
        assert!(record.finished_at.is_some());

        // Traffic was never shifted, so no revert is issued.
        assert_eq!(runtime.calls(), vec!["teardown_staging demo"]);
    }

    #[tokio::test]
    async fn shifted_rollback_reverts_traffic_before_teardown() {
        let (_dir, manifest, state) = write_stack("");
        let ctx = Context::load(&manifest, &state).unwrap();
        ctx.store
            .put_deployment(&in_flight_record(DeployState::Shifting, true))
            .unwrap();

        let runtime = Arc::new(SimRuntime::new());
        run_with_runtime(&ctx, runtime.clone()).await.unwrap();

        let record = ctx.store.get_deployment("demo", 1).unwrap().unwrap();
        assert_eq!(record.state, DeployState::RolledBack);
        assert!(!record.traffic_shifted);

        assert_eq!(
            runtime.calls(),
            vec!["revert_traffic demo", "teardown_staging demo"]
        );
    }
}
