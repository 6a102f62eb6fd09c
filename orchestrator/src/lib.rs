//! clusterload library
//!
//! Drives load scenarios against a storage cluster: shrinks the active node
//! set, resolves protocol endpoints, provisions load-tool sessions on remote
//! load nodes, runs them concurrently and restores the cluster afterwards.

pub mod config;
pub mod inventory;
pub mod load;
pub mod nodes;
pub mod remote;
pub mod scenario;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use config::Config;
pub use inventory::{Hosting, ProtocolFamily, ShellHosting, StorageNode};
pub use load::{LoadParameters, RunOutcome, ScenarioResult, SuiteReport};
pub use nodes::NodeAvailabilityController;
pub use remote::{Connector, RemoteShell, SshConnector};
pub use scenario::{ScenarioError, ScenarioMatrix, ScenarioRunner, ScenarioSpec};
