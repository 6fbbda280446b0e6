use std::sync::Arc;

use anyhow::anyhow;
use tracing::info;

use strata_deploy::{DeploymentController, ProbeFn, SimRuntime};
use strata_health::{ProbeOutcome, http_probe};
use strata_provision::{PlannedChange, Provisioner, SimProvider};
use strata_state::Outcome;

use super::{CommandError, CommandResult, Context, classify};

pub async fn run(ctx: &Context, concurrency: usize, image: Option<&str>) -> CommandResult {
    let provisioner = Provisioner::new(ctx.store.clone(), Arc::new(SimProvider::new()))
        .with_concurrency(concurrency);

    let changes = provisioner
        .apply(&ctx.graph, &ctx.policy)
        .await
        .map_err(classify)?;

    let executed = changes
        .iter()
        .filter(|c| !matches!(c, PlannedChange::NoChange { .. }))
        .count();
    println!("Applied stack '{}' ({executed} change(s)).", ctx.manifest.stack.name);
    if let Ok(outputs) = ctx.store.outputs("service")
        && let Some(dns) = outputs.get("alb_dns_name")
    {
        println!("  endpoint: {dns}");
    }

    if let Some(image) = image {
        release(ctx, image).await?;
    }
    Ok(())
}

/// Run a blue/green release of `image` against the reconciled stack.
async fn release(ctx: &Context, image: &str) -> CommandResult {
    let unit = ctx.manifest.deployment_unit(image);
    let health = unit.health.clone();

    // Staged with the sim runtime there is no live endpoint to probe;
    // a real runtime pairs with `http_probe` against the staging
    // address it returns.
    let probe: ProbeFn = Box::new(move |address: &str| {
        let address = address.to_string();
        let health = health.clone();
        Box::pin(async move {
            if address.starts_with("sim-") {
                ProbeOutcome::Pass
            } else {
                http_probe(&address, &health).await
            }
        })
    });

    let controller = DeploymentController::new(
        ctx.store.clone(),
        Arc::new(SimRuntime::new()),
        probe,
    );

    let record = controller
        .begin(&unit)
        .map_err(|e| CommandError::Deploy(anyhow::Error::new(e)))?;
    info!(workload = %unit.workload, seq = record.seq, image, "deployment registered");

    let (_abort_tx, abort_rx) = tokio::sync::watch::channel(false);
    let outcome = controller
        .run(record, unit, abort_rx)
        .await
        .map_err(|e| CommandError::Deploy(anyhow::Error::new(e)))?;

    match outcome {
        Outcome::Succeeded => {
            println!("Deployment of {image} completed.");
            Ok(())
        }
        Outcome::RolledBack { reason } => Err(CommandError::Deploy(anyhow!(
            "deployment rolled back: {reason}"
        ))),
        Outcome::Aborted => Err(CommandError::Deploy(anyhow!("deployment aborted"))),
    }
}
