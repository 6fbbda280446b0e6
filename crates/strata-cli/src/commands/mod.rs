//! Command implementations and the shared load/classify plumbing.

pub mod apply;
pub mod destroy;
pub mod plan;
pub mod rollback;

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    const BASE_MANIFEST: &str = r#"
[stack]
name = "demo"
environment = "test"

[service]
container_port = 8080
replicas = 2
"#;

    /// Write a manifest (base plus `extra` TOML appended) into a temp
    /// dir and return it with a state path inside the same dir.
    pub(crate) fn write_stack(extra: &str) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("stack.toml");
        std::fs::write(&manifest, format!("{BASE_MANIFEST}{extra}")).unwrap();
        let state = dir.path().join("state.redb");
        (dir, manifest, state)
    }
}

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use strata_core::StackManifest;
use strata_graph::ResourceGraph;
use strata_policy::PolicyGraph;
use strata_provision::ProvisionError;
use strata_state::StateStore;

/// Failure category, mapped onto the process exit code.
#[derive(Debug)]
pub enum CommandError {
    /// Manifest, graph, or policy problem (exit 2).
    Validation(anyhow::Error),
    /// Provider or state failure during provisioning (exit 3).
    Provision(ProvisionError),
    /// Deployment failure or rollback (exit 4).
    Deploy(anyhow::Error),
}

impl CommandError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CommandError::Validation(_) => 2,
            CommandError::Provision(_) => 3,
            CommandError::Deploy(_) => 4,
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Validation(e) => write!(f, "{e:#}"),
            CommandError::Provision(e) => write!(f, "{e}"),
            CommandError::Deploy(e) => write!(f, "{e:#}"),
        }
    }
}

pub type CommandResult = Result<(), CommandError>;

/// Structural errors surfacing through the provisioner are still
/// validation failures; everything else is operational.
pub(crate) fn classify(err: ProvisionError) -> CommandError {
    match err {
        ProvisionError::Graph(_) | ProvisionError::Policy(_) => {
            CommandError::Validation(anyhow::Error::new(err))
        }
        other => CommandError::Provision(other),
    }
}

/// Everything a command needs: the parsed manifest, its lowered graph
/// and policy, and an open state store.
#[derive(Debug)]
pub struct Context {
    pub manifest: StackManifest,
    pub graph: ResourceGraph,
    pub policy: PolicyGraph,
    pub store: Arc<StateStore>,
}

impl Context {
    pub fn load(manifest_path: &Path, state_path: &Path) -> Result<Self, CommandError> {
        let manifest = StackManifest::from_file(manifest_path).map_err(|e| {
            CommandError::Validation(e.context(format!(
                "failed to load manifest '{}'",
                manifest_path.display()
            )))
        })?;
        let graph = manifest
            .lower_graph()
            .map_err(|e| CommandError::Validation(anyhow::Error::new(e)))?;
        let (groups, rules) = manifest.lower_policy();
        let policy = PolicyGraph::new(groups, rules)
            .map_err(|e| CommandError::Validation(anyhow::Error::new(e)))?;

        if let Some(parent) = state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                CommandError::Provision(ProvisionError::State(
                    strata_state::StateError::Open(e.to_string()),
                ))
            })?;
        }
        let store = StateStore::open(state_path)
            .map(Arc::new)
            .map_err(|e| CommandError::Provision(ProvisionError::State(e)))?;

        Ok(Self {
            manifest,
            graph,
            policy,
            store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::write_stack;

    #[test]
    fn invalid_duration_is_a_validation_failure() {
        let (_dir, manifest, state) = write_stack(
            r#"
[service.health]
interval = "5x"
"#,
        );
        let err = Context::load(&manifest, &state).unwrap_err();
        assert!(matches!(err, CommandError::Validation(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
