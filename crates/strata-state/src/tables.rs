//! redb table definitions for the Strata state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Deployment keys are `{workload}:{seq:08}` so a prefix
//! scan yields one workload's history in sequence order.

use redb::TableDefinition;

/// Applied resource records keyed by node name.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Deployment records keyed by `{workload}:{seq:08}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");
