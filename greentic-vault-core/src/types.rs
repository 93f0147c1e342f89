use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one secret inside an owner's namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SecretIdentifier {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub owner: String,
}

impl SecretIdentifier {
    pub fn new(
        key: impl Into<String>,
        namespace: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            namespace: namespace.into(),
            owner: owner.into(),
        }
    }

    /// Key used to detect two identifiers naming the same secret.
    pub fn equality_key(&self) -> String {
        format!("{}::{}::{}", self.owner, self.namespace, self.key)
    }

    /// Both key and owner are required wherever an identifier appears in a request.
    pub fn is_complete(&self) -> bool {
        !self.key.is_empty() && !self.owner.is_empty()
    }
}

impl fmt::Display for SecretIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key:{:?} namespace:{:?} owner:{:?}",
            self.key, self.namespace, self.owner
        )
    }
}

/// A secret value encrypted to the DON's master public key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedSecret {
    #[serde(default)]
    pub id: Option<SecretIdentifier>,
    #[serde(default)]
    pub encrypted_value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSecretsRequest {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub encrypted_secrets: Vec<EncryptedSecret>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateSecretsRequest {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub encrypted_secrets: Vec<EncryptedSecret>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteSecretsRequest {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub ids: Vec<SecretIdentifier>,
}

/// One entry of a get batch: the secret plus the keys its shares are re-encrypted to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretRequest {
    #[serde(default)]
    pub id: Option<SecretIdentifier>,
    #[serde(default)]
    pub encryption_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetSecretsRequest {
    #[serde(default)]
    pub requests: Vec<SecretRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListSecretIdentifiersRequest {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub namespace: String,
}

/// Outcome for a single identifier of a create, update or delete batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretOperationResponse {
    #[serde(default)]
    pub id: Option<SecretIdentifier>,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSecretsResponse {
    #[serde(default)]
    pub responses: Vec<SecretOperationResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateSecretsResponse {
    #[serde(default)]
    pub responses: Vec<SecretOperationResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteSecretsResponse {
    #[serde(default)]
    pub responses: Vec<SecretOperationResponse>,
}

/// Decryption key shares re-encrypted to one requester key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedShares {
    pub encryption_key: String,
    #[serde(default)]
    pub shares: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretData {
    pub encrypted_value: String,
    #[serde(default)]
    pub encrypted_decryption_key_shares: Vec<EncryptedShares>,
}

/// Result for one entry of a get batch; exactly one of `data` and `error` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretResponse {
    #[serde(default)]
    pub id: Option<SecretIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SecretData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetSecretsResponse {
    #[serde(default)]
    pub responses: Vec<SecretResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListSecretIdentifiersResponse {
    #[serde(default)]
    pub identifiers: Vec<SecretIdentifier>,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
