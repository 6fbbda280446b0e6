use std::sync::Arc;

use strata_provision::{Provisioner, SimProvider};

use super::{CommandResult, Context, classify};

pub async fn run(ctx: &Context) -> CommandResult {
    let provisioner = Provisioner::new(ctx.store.clone(), Arc::new(SimProvider::new()));
    let destroyed = provisioner.destroy(&ctx.graph).await.map_err(classify)?;

    if destroyed.is_empty() {
        println!("Nothing to destroy for stack '{}'.", ctx.manifest.stack.name);
    } else {
        for name in &destroyed {
            println!("  - destroyed {name}");
        }
        println!("Stack '{}' destroyed.", ctx.manifest.stack.name);
    }
    Ok(())
}
