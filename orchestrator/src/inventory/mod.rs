//! Cluster inventory, hosting collaborator and endpoint resolution

pub mod hosting;
pub mod resolver;
pub mod types;

pub use hosting::{Hosting, HostingError, ShellHosting, discover};
pub use resolver::{ProtocolFamily, ResolveError, ServiceSelector, resolve, resolve_all};
pub use types::{ClusterInventory, NodeStatus, SharedInventory, StorageNode};
