use serde::{Deserialize, Serialize};
use serde_json::Value;
use vault_core::capability_request_id;

/// Capability ID the vault capability registers under.
pub const CAPABILITY_ID: &str = "vault@1.0.0";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(default)]
    pub workflow_id: String,
    /// Empty while the workflow is still in its subscription phase.
    #[serde(default)]
    pub workflow_execution_id: String,
    #[serde(default)]
    pub reference_id: String,
}

impl RequestMetadata {
    /// Correlation ID unique per workflow, phase and reference.
    pub fn correlation_id(&self) -> String {
        capability_request_id(
            &self.workflow_id,
            &self.workflow_execution_id,
            &self.reference_id,
        )
    }
}

/// A direct call from a workflow. Requests without a payload use the retired
/// v1 encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default)]
    pub metadata: RequestMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityType {
    Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub id: String,
    pub capability_type: CapabilityType,
    pub description: String,
}
