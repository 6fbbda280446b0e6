//! strata-health — probe a workload's health endpoint and track the
//! resulting verdict.
//!
//! A target is never judged on a single probe: the tracker requires a
//! contiguous run of passes (healthy threshold) or failures (unhealthy
//! threshold) before settling, and stays `Pending` in between. The
//! deployment controller's verification phase and post-shift watch both
//! consume this verdict.

pub mod checker;

pub use checker::{ProbeOutcome, ProbeTracker, Verdict, http_probe};
