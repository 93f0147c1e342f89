//! Node-side vault capability.
//!
//! Requests are validated, authorized, pinned to the authorized owner and then
//! submitted to consensus. The caller waits on a reply slot in the response
//! store until consensus answers, the request expires or the caller cancels.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};
use vault_core::correlation::{is_owned_by, is_valid_owner};
use vault_core::jsonrpc::Request;
use vault_core::{
    CancelToken, CreateSecretsRequest, DeleteSecretsRequest, GetSecretsRequest,
    GetSecretsResponse, LifecycleError, ListSecretIdentifiersRequest, METHOD_SECRETS_CREATE,
    METHOD_SECRETS_DELETE, METHOD_SECRETS_GET, METHOD_SECRETS_LIST, METHOD_SECRETS_UPDATE,
    ReplyError, RequestAuthorizer, UpdateSecretsRequest, validate,
};

use crate::config::CapabilityConfig;
use crate::error::CapabilityError;
use crate::pipeline::{ConsensusPipeline, ConsensusRequest, VaultPayload, VaultResponse};
use crate::request::{
    CAPABILITY_ID, CapabilityInfo, CapabilityRequest, CapabilityResponse, CapabilityType,
};
use crate::store::ResponseStore;

pub struct VaultCapability {
    config: CapabilityConfig,
    store: Arc<ResponseStore>,
    pipeline: Arc<dyn ConsensusPipeline>,
    authorizer: Arc<dyn RequestAuthorizer>,
}

impl VaultCapability {
    pub fn new(
        config: CapabilityConfig,
        store: Arc<ResponseStore>,
        pipeline: Arc<dyn ConsensusPipeline>,
        authorizer: Arc<dyn RequestAuthorizer>,
    ) -> Self {
        Self {
            config,
            store,
            pipeline,
            authorizer,
        }
    }

    pub fn info(&self) -> CapabilityInfo {
        CapabilityInfo {
            id: CAPABILITY_ID.to_string(),
            capability_type: CapabilityType::Action,
            description: "Vault Capability".to_string(),
        }
    }

    pub fn store(&self) -> &Arc<ResponseStore> {
        &self.store
    }

    pub async fn start(&self) -> Result<(), LifecycleError> {
        self.store.start()
    }

    pub async fn close(&self) -> Result<(), LifecycleError> {
        self.store.close().await
    }

    /// Direct workflow call. Only secret retrieval is exposed this way.
    pub async fn execute(
        &self,
        request: CapabilityRequest,
        cancel: &CancelToken,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let payload = request.payload.ok_or(CapabilityError::MissingPayload)?;
        if request.method != METHOD_SECRETS_GET {
            return Err(CapabilityError::UnsupportedMethod(request.method));
        }
        let get: GetSecretsRequest = serde_json::from_value(payload)
            .map_err(|err| CapabilityError::InvalidPayload(err.to_string()))?;

        let id = request.metadata.correlation_id();
        let response = self.get_secrets(&id, get, cancel).await?;

        let decoded: GetSecretsResponse = serde_json::from_value(response.payload)
            .map_err(|err| CapabilityError::InvalidResponse(err.to_string()))?;
        let payload = serde_json::to_value(&decoded)
            .map_err(|err| CapabilityError::InvalidResponse(err.to_string()))?;
        Ok(CapabilityResponse { payload })
    }

    pub async fn create_secrets(
        &self,
        mut request: CreateSecretsRequest,
        cancel: &CancelToken,
    ) -> Result<VaultResponse, CapabilityError> {
        info!(request_id = %request.request_id, batch = request.encrypted_secrets.len(), "received create secrets request");
        validate::create(&request).inspect_err(|err| rejected(&request.request_id, err))?;
        let owner = self
            .authorize(METHOD_SECRETS_CREATE, &request.request_id, &request)
            .await?;
        for id in request
            .encrypted_secrets
            .iter_mut()
            .filter_map(|secret| secret.id.as_mut())
        {
            id.owner = owner.clone();
        }
        self.submit(
            request.request_id.clone(),
            VaultPayload::CreateSecrets(request),
            cancel,
        )
        .await
    }

    pub async fn update_secrets(
        &self,
        mut request: UpdateSecretsRequest,
        cancel: &CancelToken,
    ) -> Result<VaultResponse, CapabilityError> {
        info!(request_id = %request.request_id, batch = request.encrypted_secrets.len(), "received update secrets request");
        validate::update(&request).inspect_err(|err| rejected(&request.request_id, err))?;
        let owner = self
            .authorize(METHOD_SECRETS_UPDATE, &request.request_id, &request)
            .await?;
        for id in request
            .encrypted_secrets
            .iter_mut()
            .filter_map(|secret| secret.id.as_mut())
        {
            id.owner = owner.clone();
        }
        self.submit(
            request.request_id.clone(),
            VaultPayload::UpdateSecrets(request),
            cancel,
        )
        .await
    }

    pub async fn delete_secrets(
        &self,
        mut request: DeleteSecretsRequest,
        cancel: &CancelToken,
    ) -> Result<VaultResponse, CapabilityError> {
        info!(request_id = %request.request_id, batch = request.ids.len(), "received delete secrets request");
        validate::delete(&request).inspect_err(|err| rejected(&request.request_id, err))?;
        let owner = self
            .authorize(METHOD_SECRETS_DELETE, &request.request_id, &request)
            .await?;
        for id in &mut request.ids {
            id.owner = owner.clone();
        }
        self.submit(
            request.request_id.clone(),
            VaultPayload::DeleteSecrets(request),
            cancel,
        )
        .await
    }

    pub async fn list_secret_identifiers(
        &self,
        mut request: ListSecretIdentifiersRequest,
        cancel: &CancelToken,
    ) -> Result<VaultResponse, CapabilityError> {
        info!(request_id = %request.request_id, "received list secret identifiers request");
        validate::list(&request).inspect_err(|err| rejected(&request.request_id, err))?;
        let owner = self
            .authorize(METHOD_SECRETS_LIST, &request.request_id, &request)
            .await?;
        request.owner = owner;
        self.submit(
            request.request_id.clone(),
            VaultPayload::ListSecretIdentifiers(request),
            cancel,
        )
        .await
    }

    /// Internal path only; callers reaching it were authorized upstream.
    pub async fn get_secrets(
        &self,
        request_id: &str,
        request: GetSecretsRequest,
        cancel: &CancelToken,
    ) -> Result<VaultResponse, CapabilityError> {
        info!(request_id, batch = request.requests.len(), "received get secrets request");
        validate::get(&request).inspect_err(|err| rejected(request_id, err))?;
        self.submit(
            request_id.to_string(),
            VaultPayload::GetSecrets(request),
            cancel,
        )
        .await
    }

    /// Authorizes `body` as a `method` call and checks that `request_id` was
    /// issued for the authorized owner.
    async fn authorize<T: Serialize>(
        &self,
        method: &str,
        request_id: &str,
        body: &T,
    ) -> Result<String, CapabilityError> {
        let params = serde_json::to_value(body)
            .map_err(|err| CapabilityError::Encoding(err.to_string()))?;
        let request = Request::new(String::new(), method, Some(params));
        let owner = self
            .authorizer
            .authorize_request(&request)
            .await
            .inspect_err(|err| info!(request_id, method, reason = %err, "request not authorized"))?;
        if !is_valid_owner(&owner) {
            info!(request_id, owner = %owner, "authorized owner cannot prefix a request ID");
            return Err(CapabilityError::InvalidOwner(owner));
        }

        if !is_owned_by(request_id, &owner) {
            info!(request_id, owner = %owner, "request ID does not carry the authorized owner");
            return Err(CapabilityError::OwnerMismatch {
                request_id: request_id.to_string(),
                owner,
            });
        }
        Ok(owner)
    }

    async fn submit(
        &self,
        id: String,
        payload: VaultPayload,
        cancel: &CancelToken,
    ) -> Result<VaultResponse, CapabilityError> {
        let method = payload.method();
        let expires_at = Instant::now() + self.config.request_expiry();
        let waiter = self.store.register(&id, expires_at)?;

        let submitted = self
            .pipeline
            .submit(ConsensusRequest {
                id: id.clone(),
                payload,
                expires_at,
            })
            .await;
        if let Err(err) = submitted {
            self.store.abandon(&id);
            return Err(err.into());
        }
        debug!(request_id = %id, method, "sent request to consensus pipeline");

        match waiter.wait(cancel).await {
            Ok(response) => {
                debug!(request_id = %id, error = ?response.error_message(), "received response for request");
                match response.error_message() {
                    Some(message) => Err(CapabilityError::Processing {
                        message: message.to_string(),
                        id,
                    }),
                    None => Ok(response),
                }
            }
            Err(ReplyError::Cancelled) => {
                self.store.abandon(&id);
                debug!(request_id = %id, "request cancelled by caller");
                Err(CapabilityError::Cancelled)
            }
            Err(_) => Err(CapabilityError::Abandoned(id)),
        }
    }
}

fn rejected(request_id: &str, err: &vault_core::ValidationError) {
    info!(request_id, error = %err, "request failed validation checks");
}
