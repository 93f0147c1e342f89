use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use vault_core::{
    CreateSecretsRequest, DeleteSecretsRequest, GetSecretsRequest, ListSecretIdentifiersRequest,
    METHOD_SECRETS_CREATE, METHOD_SECRETS_DELETE, METHOD_SECRETS_GET, METHOD_SECRETS_LIST,
    METHOD_SECRETS_UPDATE, UpdateSecretsRequest,
};

/// Normalized vault operation handed to consensus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum VaultPayload {
    #[serde(rename = "vault.secrets.create")]
    CreateSecrets(CreateSecretsRequest),
    #[serde(rename = "vault.secrets.update")]
    UpdateSecrets(UpdateSecretsRequest),
    #[serde(rename = "vault.secrets.delete")]
    DeleteSecrets(DeleteSecretsRequest),
    #[serde(rename = "vault.secrets.get")]
    GetSecrets(GetSecretsRequest),
    #[serde(rename = "vault.secrets.list")]
    ListSecretIdentifiers(ListSecretIdentifiersRequest),
}

impl VaultPayload {
    pub fn method(&self) -> &'static str {
        match self {
            VaultPayload::CreateSecrets(_) => METHOD_SECRETS_CREATE,
            VaultPayload::UpdateSecrets(_) => METHOD_SECRETS_UPDATE,
            VaultPayload::DeleteSecrets(_) => METHOD_SECRETS_DELETE,
            VaultPayload::GetSecrets(_) => METHOD_SECRETS_GET,
            VaultPayload::ListSecretIdentifiers(_) => METHOD_SECRETS_LIST,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusRequest {
    pub id: String,
    pub payload: VaultPayload,
    /// Deadline after which the response store answers with an expiry error.
    pub expires_at: Instant,
}

/// Agreed result for one request, delivered back through the response store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaultResponse {
    pub id: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VaultResponse {
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: Value::Null,
            error: Some(error.into()),
        }
    }

    /// The embedded error, treating an empty string as no error.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|message| !message.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("consensus pipeline rejected request {id}: {reason}")]
    Rejected { id: String, reason: String },
    #[error("consensus pipeline is closed")]
    Closed,
}

/// Entry point into the consensus engine that produces agreed responses.
#[async_trait]
pub trait ConsensusPipeline: Send + Sync {
    async fn submit(&self, request: ConsensusRequest) -> Result<(), PipelineError>;
}
