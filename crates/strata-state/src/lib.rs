//! strata-state — embedded state store for Strata.
//!
//! Backed by [redb](https://docs.rs/redb), records the last-applied
//! materialization of every resource node (configuration, produced
//! outputs, and the outputs-visible gate) and the full deployment
//! history per workload. `plan`/`apply` diff against this store, and
//! deployment history survives process restarts.
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value
//! columns. Deployment keys embed a zero-padded sequence number so a
//! prefix scan returns a workload's records in order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
