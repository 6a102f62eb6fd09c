//! Per-scenario environment reset

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::inventory::{Hosting, SharedInventory};
use crate::nodes::{NodeAvailabilityController, NodeTransitionError};

/// Brings the cluster back to a clean state around each scenario
///
/// `pre` is best-effort and never fails the scenario. `post` restores every
/// node the controller stopped and is meant to run on every exit path.
pub struct EnvironmentResetHook {
    hosting: Arc<dyn Hosting>,
    inventory: SharedInventory,
    controller: Arc<NodeAvailabilityController>,
    /// Local per-scenario scratch directory
    state_dir: PathBuf,
}

impl EnvironmentResetHook {
    pub fn new(
        hosting: Arc<dyn Hosting>,
        inventory: SharedInventory,
        controller: Arc<NodeAvailabilityController>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            hosting,
            inventory,
            controller,
            state_dir: state_dir.into(),
        }
    }

    /// Clear local state and wipe node data
    pub async fn pre(&self) {
        if let Err(e) = clear_dir(&self.state_dir).await {
            warn!("Failed to clear {}: {}", self.state_dir.display(), e);
        }

        let nodes = self.inventory.read().await.nodes().to_vec();
        let mut wiped = 0;
        for node in nodes.iter().filter(|n| n.is_running()) {
            match self.hosting.wipe_data(node).await {
                Ok(()) => wiped += 1,
                Err(e) => warn!("Failed to wipe data on {}: {}", node.id, e),
            }
        }
        debug!("Environment reset: {}/{} nodes wiped", wiped, nodes.len());
    }

    /// Restart every node stopped during the scenario
    pub async fn post(&self) -> Result<(), NodeTransitionError> {
        let restored = self.controller.restore().await?;
        if !restored.is_empty() {
            info!("Restored nodes {:?}", restored);
        }
        Ok(())
    }
}

/// Empty `dir`, creating it if missing
async fn clear_dir(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::ClusterInventory;
    use crate::test_utils::{MockHosting, storage_node};

    fn setup(
        state_dir: &Path,
    ) -> (Arc<MockHosting>, Arc<NodeAvailabilityController>, EnvironmentResetHook) {
        let nodes: Vec<_> = ["s01", "s02", "s03"].into_iter().map(storage_node).collect();
        let inventory = ClusterInventory::new(nodes.clone()).into_shared();
        let hosting = Arc::new(MockHosting::new(nodes));
        let controller = Arc::new(NodeAvailabilityController::new(hosting.clone(), inventory.clone()));
        let hook = EnvironmentResetHook::new(hosting.clone(), inventory, controller.clone(), state_dir);
        (hosting, controller, hook)
    }

    #[tokio::test]
    async fn test_pre_clears_state_and_wipes_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("stale.json"), b"{}").unwrap();
        let (hosting, _, hook) = setup(&state_dir);

        hook.pre().await;

        assert!(state_dir.exists());
        assert!(!state_dir.join("stale.json").exists());
        assert_eq!(hosting.calls("wipe"), vec!["s01", "s02", "s03"]);
    }

    #[tokio::test]
    async fn test_pre_failures_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (hosting, _, hook) = setup(&dir.path().join("state"));
        hosting.fail_wipe("s02");

        hook.pre().await;

        assert_eq!(hosting.calls("wipe").len(), 3);
    }

    #[tokio::test]
    async fn test_post_restores_stopped_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let (hosting, controller, hook) = setup(dir.path());
        let nodes: Vec<_> = ["s01", "s02", "s03"].into_iter().map(storage_node).collect();

        controller.shrink(&nodes, 1).await.unwrap();
        assert!(!hosting.is_running("s03"));

        hook.post().await.unwrap();
        assert!(hosting.is_running("s02"));
        assert!(hosting.is_running("s03"));
        assert!(controller.stopped_nodes().await.is_empty());

        // Second call is a no-op
        hook.post().await.unwrap();
        assert_eq!(hosting.calls("start").len(), 2);
    }
}
