use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vault_core::jsonrpc::Request;

/// Capability the vault DON advertises in the registry.
pub const VAULT_CAPABILITY_ID: &str = "vault@1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonConfig {
    pub don_id: String,
    pub members: Vec<NodeConfig>,
}

impl DonConfig {
    pub fn is_member(&self, address: &str) -> bool {
        self.members.iter().any(|node| node.address == address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DonError {
    #[error("node {0} is unreachable")]
    Unreachable(String),
    #[error("failed to send to node {node}: {reason}")]
    Send { node: String, reason: String },
}

/// Delivers gateway requests to individual DON members.
#[async_trait]
pub trait Don: Send + Sync {
    async fn send_to_node(&self, node_address: &str, request: &Request) -> Result<(), DonError>;
}

/// Fault tolerance and size of the DON serving a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DonInfo {
    /// Maximum number of faulty members tolerated.
    pub f: usize,
    pub members: usize,
}

impl DonInfo {
    /// Number of matching responses needed to treat a result as final.
    pub fn quorum(&self) -> usize {
        self.f + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no DON serves capability {0}")]
    UnknownCapability(String),
    #[error("capability {0} is served by more than one DON")]
    AmbiguousCapability(String),
    #[error("registry lookup failed: {0}")]
    Lookup(String),
}

/// Node-discovery source telling the gateway how a capability's DON is shaped.
#[async_trait]
pub trait CapabilitiesRegistry: Send + Sync {
    async fn don_for_capability(&self, capability_id: &str) -> Result<DonInfo, RegistryError>;
}

/// Registry answering with a fixed DON shape.
#[derive(Debug, Clone, Copy)]
pub struct StaticRegistry {
    info: DonInfo,
}

impl StaticRegistry {
    pub fn new(f: usize, members: usize) -> Self {
        Self {
            info: DonInfo { f, members },
        }
    }
}

#[async_trait]
impl CapabilitiesRegistry for StaticRegistry {
    async fn don_for_capability(&self, _capability_id: &str) -> Result<DonInfo, RegistryError> {
        Ok(self.info)
    }
}
