//! Protocol primitives shared by the vault gateway handler and the node-side capability.

pub mod auth;
pub mod cancel;
pub mod correlation;
pub mod errors;
pub mod jsonrpc;
pub mod lifecycle;
pub mod methods;
pub mod reply;
pub mod types;
pub mod validate;

pub use auth::{AllowlistAuthorizer, AuthorizationError, RequestAuthorizer};
pub use cancel::CancelToken;
pub use correlation::{
    capability_request_id, is_valid_owner, owner_of, prefix_with_owner, strip_owner_prefix,
};
pub use errors::{Result, ValidationError};
pub use lifecycle::{LifecycleError, State, StateMachine};
pub use methods::{
    MAX_BATCH_SIZE, METHOD_SECRETS_CREATE, METHOD_SECRETS_DELETE, METHOD_SECRETS_GET,
    METHOD_SECRETS_LIST, METHOD_SECRETS_UPDATE, METHODS,
};
pub use reply::{ReplyError, ReplySlot, ReplyWaiter};
pub use types::{
    CreateSecretsRequest, CreateSecretsResponse, DeleteSecretsRequest, DeleteSecretsResponse,
    EncryptedSecret, GetSecretsRequest, GetSecretsResponse, ListSecretIdentifiersRequest,
    ListSecretIdentifiersResponse, SecretData, SecretIdentifier, SecretOperationResponse,
    SecretRequest, SecretResponse, UpdateSecretsRequest, UpdateSecretsResponse,
};
