//! strata-deploy — blue/green releases with health-gated cutover.
//!
//! A release stands up the new version in the staging traffic target,
//! verifies it against the workload's health contract, and only then
//! switches production traffic over — atomically by default, in
//! weighted steps if configured. Any failure on the way (verification
//! timeout, unhealthy verdict, routing error, operator abort) rolls the
//! release back to a traffic-safe terminal state; production traffic is
//! never left pointing at an unverified target.
//!
//! # Components
//!
//! - **`machine`** — the pure state machine (`Deployment::handle`)
//! - **`driver`** — async execution: timers, probes, persistence
//! - **`sim`** — in-process `TargetRuntime` for tests and dry runs

pub mod driver;
pub mod error;
pub mod machine;
pub mod sim;

pub use driver::{BoxFuture, DeploymentController, ProbeFn, TargetRuntime};
pub use error::{DeployError, DeployResult};
pub use machine::{DeployAction, DeployEvent, Deployment, RollbackReason};
pub use sim::SimRuntime;
