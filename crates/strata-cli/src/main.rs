use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata — self-hosted stack provisioning and blue/green releases",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Stack manifest path
    #[arg(long, global = true, default_value = "stack.toml")]
    manifest: PathBuf,
    /// State database path
    #[arg(long, global = true, default_value = ".strata/state.redb")]
    state: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the changes an apply would make, without side effects
    Plan,
    /// Reconcile the stack with the manifest, in dependency order
    Apply {
        /// Cap on concurrent materializations within a wave
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Image to release once the stack is reconciled
        #[arg(long)]
        image: Option<String>,
    },
    /// Force the in-flight deployment to roll back
    Rollback,
    /// Tear the stack down in reverse dependency order
    Destroy,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("strata=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let result = match commands::Context::load(&cli.manifest, &cli.state) {
        Err(e) => Err(e),
        Ok(ctx) => match cli.command {
            Commands::Plan => commands::plan::run(&ctx),
            Commands::Apply { concurrency, image } => {
                commands::apply::run(&ctx, concurrency, image.as_deref()).await
            }
            Commands::Rollback => commands::rollback::run(&ctx).await,
            Commands::Destroy => commands::destroy::run(&ctx).await,
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
