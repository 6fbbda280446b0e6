use strata_provision::{PlannedChange, plan};

use super::{CommandResult, Context, classify};

pub fn run(ctx: &Context) -> CommandResult {
    let changes = plan(&ctx.graph, &ctx.store).map_err(classify)?;

    println!("Plan for stack '{}':", ctx.manifest.stack.name);
    for change in &changes {
        println!("  {change}");
    }

    let pending = changes
        .iter()
        .filter(|c| !matches!(c, PlannedChange::NoChange { .. }))
        .count();
    if pending == 0 {
        println!("Nothing to do, stack is up to date.");
    } else {
        println!("{pending} change(s) pending. Run `strata apply` to execute.");
    }
    Ok(())
}
