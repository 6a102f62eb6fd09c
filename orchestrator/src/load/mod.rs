//! Load generation
//!
//! Everything between a resolved endpoint list and an aggregated scenario
//! result: parameters, protocol bootstrap, session provisioning and the
//! concurrent run itself.

mod bootstrap;
mod coordinator;
pub mod params;
mod provision;
mod result;
mod session;

pub use bootstrap::{BootstrapError, IssuerSettings, ProtocolBootstrapper, S3Credentials};
pub use coordinator::{CoordinatorConfig, LoadRunCoordinator};
pub use params::{LoadNode, LoadParameters, ParameterError, Workload};
pub use provision::{LoadSessionProvisioner, ProvisionOutcome, ProvisioningError, ProvisioningFailure};
pub use result::{RunOutcome, RunResult, ScenarioResult, SuiteEntry, SuiteReport};
pub use session::{LoadSession, LoadTool};
