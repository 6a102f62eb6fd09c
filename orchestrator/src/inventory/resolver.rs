//! Endpoint resolution over a known inventory
//!
//! Resolution is a lookup over already-known configuration, not a liveness
//! check: it never touches the network.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::types::ClusterInventory;
use crate::config::ServicePatterns;

/// Errors raised while resolving endpoints
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No running service matches pattern '{0}'")]
    NoMatchingService(String),

    #[error("Service {service} has no '{field}' endpoint")]
    MissingEndpoint { service: String, field: String },

    #[error("Invalid service pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Protocol family a load scenario exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    /// Object-level RPC served directly by storage nodes
    Grpc,
    /// HTTP gateway
    Http,
    /// S3-compatible gateway
    S3,
}

impl ProtocolFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolFamily::Grpc => "grpc",
            ProtocolFamily::Http => "http",
            ProtocolFamily::S3 => "s3",
        }
    }

    /// Attribute holding the reachable address for this protocol
    pub fn endpoint_field(&self) -> &'static str {
        match self {
            ProtocolFamily::Grpc => "rpc_endpoint",
            ProtocolFamily::Http | ProtocolFamily::S3 => "endpoint",
        }
    }

    /// Whether sessions need a pre-provisioned credential
    pub fn requires_bootstrap(&self) -> bool {
        matches!(self, ProtocolFamily::S3)
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "grpc" => Ok(ProtocolFamily::Grpc),
            "http" => Ok(ProtocolFamily::Http),
            "s3" => Ok(ProtocolFamily::S3),
            other => Err(format!("unknown load type: {}", other)),
        }
    }
}

/// Service-name pattern plus the endpoint field to extract
#[derive(Debug, Clone)]
pub struct ServiceSelector {
    pattern: Regex,
    endpoint_field: String,
}

impl ServiceSelector {
    /// Build a selector. The pattern must match the whole service name.
    pub fn new(pattern: &str, endpoint_field: impl Into<String>) -> Result<Self, ResolveError> {
        let anchored = format!("^(?:{})$", pattern);
        let pattern = Regex::new(&anchored).map_err(|source| ResolveError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern,
            endpoint_field: endpoint_field.into(),
        })
    }

    pub fn for_protocol(
        protocol: ProtocolFamily,
        patterns: &ServicePatterns,
    ) -> Result<Self, ResolveError> {
        let pattern = match protocol {
            ProtocolFamily::Grpc => &patterns.storage_node,
            ProtocolFamily::Http => &patterns.http_gate,
            ProtocolFamily::S3 => &patterns.s3_gate,
        };
        Self::new(pattern, protocol.endpoint_field())
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    pub fn endpoint_field(&self) -> &str {
        &self.endpoint_field
    }
}

/// Resolve the endpoints of every running service matched by `selector`,
/// requiring at least one
///
/// Stopped (or unknown-state) nodes are skipped. Inventory order is kept.
pub fn resolve(
    inventory: &ClusterInventory,
    selector: &ServiceSelector,
) -> Result<Vec<String>, ResolveError> {
    let endpoints = resolve_all(inventory, selector)?;
    if endpoints.is_empty() {
        return Err(ResolveError::NoMatchingService(
            selector.pattern().as_str().to_string(),
        ));
    }
    Ok(endpoints)
}

/// Like [`resolve`], but zero matches yield an empty list
pub fn resolve_all(
    inventory: &ClusterInventory,
    selector: &ServiceSelector,
) -> Result<Vec<String>, ResolveError> {
    let mut endpoints = Vec::new();

    for node in inventory.matching(selector.pattern()).filter(|n| n.is_running()) {
        let endpoint = node.endpoint(selector.endpoint_field()).ok_or_else(|| {
            ResolveError::MissingEndpoint {
                service: node.service_name.clone(),
                field: selector.endpoint_field().to_string(),
            }
        })?;
        endpoints.push(endpoint.to_string());
    }

    debug!(
        "Resolved {} '{}' endpoints: {:?}",
        endpoints.len(),
        selector.endpoint_field(),
        endpoints
    );
    Ok(endpoints)
}
