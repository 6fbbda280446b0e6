//! strata-policy — static validation of permitted network flows.
//!
//! Security rules describe which resource groups may talk to which, on
//! what protocol and port. Before anything is provisioned the rule set
//! is checked for least privilege: no unrestricted ingress outside the
//! edge tier, and no path from an externally-reachable group to the
//! data tier that bypasses the compute tier.
//!
//! This is a configuration check, not runtime enforcement — the
//! provider's network layer enforces the rules it is handed.

pub mod error;
pub mod rules;

pub use error::{PolicyError, PolicyResult};
pub use rules::{Direction, PolicyGraph, Protocol, RuleSource, SecurityRule, Tier};
