use thiserror::Error;
use vault_core::{AuthorizationError, ValidationError};

use crate::pipeline::PipelineError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("request not authorized: {0}")]
    Unauthorized(#[from] AuthorizationError),
    #[error("request ID: {request_id} must start with owner address: {owner}")]
    OwnerMismatch { request_id: String, owner: String },
    #[error("authorized owner {0:?} cannot prefix a request ID")]
    InvalidOwner(String),
    #[error("capability does not support v1 requests")]
    MissingPayload,
    #[error("unsupported method: can only call GetSecrets via capability interface")]
    UnsupportedMethod(String),
    #[error("could not unmarshal payload to GetSecretsRequest: {0}")]
    InvalidPayload(String),
    #[error("could not unmarshal response to GetSecretsResponse: {0}")]
    InvalidResponse(String),
    #[error("could not encode request for authorization: {0}")]
    Encoding(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("error processing request {id}: {message}")]
    Processing { id: String, message: String },
    #[error("request cancelled")]
    Cancelled,
    #[error("request {0} was dropped without a response")]
    Abandoned(String),
}
