//! StateStore — redb-backed persistence for Strata.
//!
//! Typed CRUD over applied resource records and deployment history.
//! All values are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter
//! for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone, Debug)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Insert or update a resource record.
    pub fn put_resource(&self, record: &ResourceRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            table
                .insert(record.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(name = %record.name, visible = record.outputs_visible, "resource stored");
        Ok(())
    }

    /// Get a resource record by node name.
    pub fn get_resource(&self, name: &str) -> StateResult<Option<ResourceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: ResourceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all applied resource records.
    pub fn list_resources(&self) -> StateResult<Vec<ResourceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: ResourceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Read a producer's outputs.
    ///
    /// Fails with [`StateError::OutputsNotReady`] unless materialization
    /// completed: reading before that is an error, not a default value.
    pub fn outputs(&self, name: &str) -> StateResult<BTreeMap<String, String>> {
        match self.get_resource(name)? {
            Some(record) if record.outputs_visible => Ok(record.outputs),
            Some(_) => Err(StateError::OutputsNotReady(name.to_string())),
            None => Err(StateError::NotFound(name.to_string())),
        }
    }

    /// Delete a resource record. Returns true if it existed.
    pub fn delete_resource(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, existed, "resource deleted");
        Ok(existed)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment record.
    ///
    /// A record that already reached a terminal state is immutable:
    /// writing different content over it fails with
    /// [`StateError::TerminalRecordImmutable`].
    pub fn put_deployment(&self, record: &DeploymentRecord) -> StateResult<()> {
        let key = record.table_key();
        if let Some(existing) = self.get_deployment(&record.workload, record.seq)?
            && existing.is_terminal()
            && existing != *record
        {
            return Err(StateError::TerminalRecordImmutable(key));
        }

        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, state = ?record.state, "deployment record stored");
        Ok(())
    }

    /// Get one deployment record.
    pub fn get_deployment(&self, workload: &str, seq: u64) -> StateResult<Option<DeploymentRecord>> {
        let key = deployment_key(workload, seq);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DeploymentRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Full history for a workload, oldest first.
    pub fn list_deployments(&self, workload: &str) -> StateResult<Vec<DeploymentRecord>> {
        let prefix = format!("{workload}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: DeploymentRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// The most recent deployment record for a workload, if any.
    pub fn latest_deployment(&self, workload: &str) -> StateResult<Option<DeploymentRecord>> {
        Ok(self.list_deployments(workload)?.into_iter().next_back())
    }

    /// The non-terminal deployment record for a workload, if one is in
    /// flight. The single-in-flight invariant means there is at most one.
    pub fn in_flight_deployment(&self, workload: &str) -> StateResult<Option<DeploymentRecord>> {
        Ok(self
            .list_deployments(workload)?
            .into_iter()
            .find(|r| !r.is_terminal()))
    }

    /// The next free sequence number for a workload.
    pub fn next_deployment_seq(&self, workload: &str) -> StateResult<u64> {
        Ok(self
            .latest_deployment(workload)?
            .map(|r| r.seq + 1)
            .unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_graph::ResourceKind;

    fn test_resource(name: &str, visible: bool) -> ResourceRecord {
        ResourceRecord {
            name: name.to_string(),
            kind: ResourceKind::Network,
            config: [("availability_zones".to_string(), "2".to_string())]
                .into_iter()
                .collect(),
            outputs: [("vpc_id".to_string(), "vpc-123".to_string())]
                .into_iter()
                .collect(),
            outputs_visible: visible,
            applied_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_record(workload: &str, seq: u64) -> DeploymentRecord {
        DeploymentRecord {
            seq,
            workload: workload.to_string(),
            image: format!("registry.local/app:v{seq}"),
            state: DeployState::Created,
            outcome: None,
            traffic_shifted: false,
            started_at: 1000,
            finished_at: None,
        }
    }

    // ── Resource records ───────────────────────────────────────────

    #[test]
    fn resource_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_resource("network", true);

        store.put_resource(&record).unwrap();
        assert_eq!(store.get_resource("network").unwrap(), Some(record));
    }

    #[test]
    fn resource_update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut record = test_resource("network", true);
        store.put_resource(&record).unwrap();

        record.config.insert("nat_gateways".to_string(), "2".to_string());
        record.updated_at = 2000;
        store.put_resource(&record).unwrap();

        let stored = store.get_resource("network").unwrap().unwrap();
        assert_eq!(stored.config.get("nat_gateways").map(String::as_str), Some("2"));
        assert_eq!(stored.updated_at, 2000);
    }

    #[test]
    fn outputs_gated_on_visibility() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_resource(&test_resource("network", false)).unwrap();

        assert!(matches!(
            store.outputs("network"),
            Err(StateError::OutputsNotReady(_))
        ));

        store.put_resource(&test_resource("network", true)).unwrap();
        let outputs = store.outputs("network").unwrap();
        assert_eq!(outputs.get("vpc_id").map(String::as_str), Some("vpc-123"));
    }

    #[test]
    fn outputs_of_unknown_resource_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(matches!(store.outputs("ghost"), Err(StateError::NotFound(_))));
    }

    #[test]
    fn resource_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_resource(&test_resource("network", true)).unwrap();

        assert!(store.delete_resource("network").unwrap());
        assert!(!store.delete_resource("network").unwrap());
        assert!(store.get_resource("network").unwrap().is_none());
    }

    // ── Deployment records ─────────────────────────────────────────

    #[test]
    fn deployment_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_record("app", 1);

        store.put_deployment(&record).unwrap();
        assert_eq!(store.get_deployment("app", 1).unwrap(), Some(record));
    }

    #[test]
    fn deployment_history_in_sequence_order() {
        let store = StateStore::open_in_memory().unwrap();
        for seq in [2u64, 1, 3] {
            let mut record = test_record("app", seq);
            record.state = DeployState::Completed;
            record.outcome = Some(Outcome::Succeeded);
            store.put_deployment(&record).unwrap();
        }

        let history = store.list_deployments("app").unwrap();
        let seqs: Vec<u64> = history.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn history_scoped_per_workload() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_deployment(&test_record("app", 1)).unwrap();
        store.put_deployment(&test_record("other", 1)).unwrap();

        assert_eq!(store.list_deployments("app").unwrap().len(), 1);
        assert_eq!(store.list_deployments("other").unwrap().len(), 1);
    }

    #[test]
    fn terminal_record_is_immutable() {
        let store = StateStore::open_in_memory().unwrap();
        let mut record = test_record("app", 1);
        record.state = DeployState::RolledBack;
        record.outcome = Some(Outcome::RolledBack {
            reason: "health check timeout".to_string(),
        });
        record.finished_at = Some(2000);
        store.put_deployment(&record).unwrap();

        // Identical re-write is fine (idempotent persistence).
        store.put_deployment(&record).unwrap();

        // Different content is not.
        let mut tampered = record.clone();
        tampered.outcome = Some(Outcome::Succeeded);
        assert!(matches!(
            store.put_deployment(&tampered),
            Err(StateError::TerminalRecordImmutable(_))
        ));
    }

    #[test]
    fn in_flight_lookup_skips_terminal_records() {
        let store = StateStore::open_in_memory().unwrap();

        let mut done = test_record("app", 1);
        done.state = DeployState::Completed;
        done.outcome = Some(Outcome::Succeeded);
        done.finished_at = Some(2000);
        store.put_deployment(&done).unwrap();

        assert!(store.in_flight_deployment("app").unwrap().is_none());

        let mut active = test_record("app", 2);
        active.state = DeployState::Verifying;
        store.put_deployment(&active).unwrap();

        let in_flight = store.in_flight_deployment("app").unwrap().unwrap();
        assert_eq!(in_flight.seq, 2);
    }

    #[test]
    fn next_seq_increments() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.next_deployment_seq("app").unwrap(), 1);

        store.put_deployment(&test_record("app", 1)).unwrap();
        assert_eq!(store.next_deployment_seq("app").unwrap(), 2);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_resource(&test_resource("network", true)).unwrap();
            store.put_deployment(&test_record("app", 1)).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_resource("network").unwrap().is_some());
        assert_eq!(store.list_deployments("app").unwrap().len(), 1);
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_resources().unwrap().is_empty());
        assert!(store.list_deployments("any").unwrap().is_empty());
        assert!(store.latest_deployment("any").unwrap().is_none());
        assert!(store.in_flight_deployment("any").unwrap().is_none());
        assert!(!store.delete_resource("nope").unwrap());
    }
}
