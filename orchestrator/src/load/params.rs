//! Load parameters and load node descriptors

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inventory::ProtocolFamily;

/// Rejected load parameter values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("{0} must be positive")]
    NotPositive(&'static str),

    #[error("No endpoints selected")]
    NoEndpoints,

    #[error("At least one writer, reader or deleter is required")]
    NoWorkers,

    #[error("Output file name must not be empty or contain '/'")]
    InvalidOutFile,
}

/// A remote host dedicated to generating load
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadNode {
    pub address: String,
    pub login: String,
    pub key_path: PathBuf,
}

impl LoadNode {
    pub fn new(address: impl Into<String>, login: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            login: login.into(),
            key_path: key_path.into(),
        }
    }

    /// Filesystem-safe identity derived from the address
    pub fn identity(&self) -> String {
        self.address
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }
}

/// Immutable parameter set shared by every session of a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadParameters {
    /// Comma-joined endpoint list
    endpoint: String,
    /// Object size in KiB
    pub obj_size: u64,
    pub containers_count: u32,
    /// Objects pre-generated per container before the run
    pub obj_count: u32,
    pub writers: u32,
    pub readers: u32,
    pub deleters: u32,
    pub load_time: Duration,
    /// Base name of the output artifact; sessions derive unique paths from it
    pub out_file: String,
    pub load_type: ProtocolFamily,
}

/// Scalar inputs for `LoadParameters::new`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub obj_size: u64,
    pub containers_count: u32,
    pub obj_count: u32,
    pub writers: u32,
    pub readers: u32,
    pub deleters: u32,
    pub load_time: Duration,
    pub out_file: String,
    pub load_type: ProtocolFamily,
}

impl LoadParameters {
    pub fn new(endpoints: &[String], workload: Workload) -> Result<Self, ParameterError> {
        if endpoints.is_empty() {
            return Err(ParameterError::NoEndpoints);
        }
        if workload.obj_size == 0 {
            return Err(ParameterError::NotPositive("obj_size"));
        }
        if workload.containers_count == 0 {
            return Err(ParameterError::NotPositive("containers_count"));
        }
        if workload.writers == 0 && workload.readers == 0 && workload.deleters == 0 {
            return Err(ParameterError::NoWorkers);
        }
        if workload.out_file.is_empty() || workload.out_file.contains('/') {
            return Err(ParameterError::InvalidOutFile);
        }

        Ok(Self {
            endpoint: endpoints.join(","),
            obj_size: workload.obj_size,
            containers_count: workload.containers_count,
            obj_count: workload.obj_count,
            writers: workload.writers,
            readers: workload.readers,
            deleters: workload.deleters,
            load_time: workload.load_time,
            out_file: workload.out_file,
            load_type: workload.load_type,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoint.split(',').map(str::to_string).collect()
    }

    /// Artifact file name for one session: `<load_type>_<identity>_<out_file>`
    pub fn artifact_name(&self, identity: &str) -> String {
        format!("{}_{}_{}", self.load_type, identity, self.out_file)
    }
}
