//! strata-provision — dependency-ordered resource materialization.
//!
//! The provisioner turns a validated [`strata_graph::ResourceGraph`]
//! into applied infrastructure through a [`Provider`]: diff against the
//! state store, walk the dependency waves, materialize concurrently
//! within a wave under a concurrency cap, and publish each node's
//! outputs only after its record is durably written. Failures abandon
//! the remaining order but never roll back what already applied; the
//! next apply resumes from the diff.
//!
//! # Components
//!
//! - **`provider`** — the `Provider` seam and `MaterializeRequest`
//! - **`plan`** — side-effect-free diff (`PlannedChange`)
//! - **`provisioner`** — wave-based apply, reverse-order destroy
//! - **`sim`** — deterministic in-process provider

pub mod error;
pub mod plan;
pub mod provider;
pub mod provisioner;
pub mod sim;

pub use error::{ProvisionError, ProvisionResult};
pub use plan::{PlannedChange, plan};
pub use provider::{BoxFuture, MaterializeRequest, Provider};
pub use provisioner::Provisioner;
pub use sim::SimProvider;
