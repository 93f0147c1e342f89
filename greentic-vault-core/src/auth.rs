use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::jsonrpc::Request;
use crate::methods::{
    METHOD_SECRETS_CREATE, METHOD_SECRETS_DELETE, METHOD_SECRETS_GET, METHOD_SECRETS_LIST,
    METHOD_SECRETS_UPDATE,
};
use crate::types::{
    CreateSecretsRequest, DeleteSecretsRequest, GetSecretsRequest, ListSecretIdentifiersRequest,
    UpdateSecretsRequest,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("request digest {0} is not allow-listed")]
    NotAllowlisted(String),
    #[error("authorization for request digest {0} has expired")]
    Expired(String),
    #[error("request digest {0} has already been authorized")]
    Replayed(String),
    #[error("could not encode request for digest: {0}")]
    Encoding(String),
    #[error("{0}")]
    Denied(String),
}

/// Decides whether a request may proceed and which owner it belongs to.
///
/// Gateway and capability run the same implementation so both sides attribute
/// a request to the same owner.
#[async_trait]
pub trait RequestAuthorizer: Send + Sync {
    /// Returns the owner the request is attributed to.
    async fn authorize_request(&self, request: &Request) -> Result<String, AuthorizationError>;
}

/// SHA-256 over the method and the canonical params, ignoring `request_id`.
///
/// Params of a known method are passed through its typed body first, so raw
/// caller JSON and a re-encoded body with defaulted fields hash the same. The
/// gateway rewrites `request_id`, so it must not change the digest.
pub fn request_digest(request: &Request) -> Result<String, AuthorizationError> {
    let mut params = canonical_params(request);
    if let Value::Object(map) = &mut params {
        map.remove("request_id");
    }
    let encoded =
        serde_json::to_vec(&params).map_err(|err| AuthorizationError::Encoding(err.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(request.method.as_bytes());
    hasher.update([0u8]);
    hasher.update(&encoded);
    Ok(hex::encode(hasher.finalize()))
}

fn canonical_params(request: &Request) -> Value {
    let raw = request.params.clone().unwrap_or(Value::Null);
    let typed = match request.method.as_str() {
        METHOD_SECRETS_CREATE => reencode::<CreateSecretsRequest>(&raw),
        METHOD_SECRETS_UPDATE => reencode::<UpdateSecretsRequest>(&raw),
        METHOD_SECRETS_DELETE => reencode::<DeleteSecretsRequest>(&raw),
        METHOD_SECRETS_LIST => reencode::<ListSecretIdentifiersRequest>(&raw),
        METHOD_SECRETS_GET => reencode::<GetSecretsRequest>(&raw),
        _ => None,
    };
    // Undecodable params keep their raw form; the handler rejects them later.
    typed.unwrap_or(raw)
}

fn reencode<T: DeserializeOwned + Serialize>(raw: &Value) -> Option<Value> {
    let body = T::deserialize(raw).ok()?;
    serde_json::to_value(body).ok()
}

#[derive(Debug, Clone)]
struct AllowEntry {
    owner: String,
    expires_at: Instant,
}

/// Authorizes requests whose digest an owner allow-listed ahead of time.
///
/// Each allow-listed digest authorizes exactly one request; presenting it again
/// before the entry expires is treated as a replay.
#[derive(Debug, Default)]
pub struct AllowlistAuthorizer {
    allowed: RwLock<HashMap<String, AllowEntry>>,
    consumed: Mutex<HashMap<String, Instant>>,
}

impl AllowlistAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, owner: impl Into<String>, digest: impl Into<String>, expires_at: Instant) {
        self.allowed.write().insert(
            digest.into(),
            AllowEntry {
                owner: owner.into(),
                expires_at,
            },
        );
    }

    /// Allow-lists the digest of `request` for `owner`.
    pub fn allow_request(
        &self,
        owner: impl Into<String>,
        request: &Request,
        expires_at: Instant,
    ) -> Result<String, AuthorizationError> {
        let digest = request_digest(request)?;
        self.allow(owner, digest.clone(), expires_at);
        Ok(digest)
    }

    /// Drops expired allow-list entries and their replay records.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut allowed = self.allowed.write();
        let before = allowed.len();
        allowed.retain(|_, entry| entry.expires_at > now);
        self.consumed.lock().retain(|_, expires_at| *expires_at > now);
        before - allowed.len()
    }

    pub(crate) fn authorize_at(
        &self,
        request: &Request,
        now: Instant,
    ) -> Result<String, AuthorizationError> {
        let digest = request_digest(request)?;
        let entry = self
            .allowed
            .read()
            .get(&digest)
            .cloned()
            .ok_or_else(|| AuthorizationError::NotAllowlisted(digest.clone()))?;
        if entry.expires_at <= now {
            return Err(AuthorizationError::Expired(digest));
        }

        let mut consumed = self.consumed.lock();
        if consumed.contains_key(&digest) {
            return Err(AuthorizationError::Replayed(digest));
        }
        consumed.insert(digest.clone(), entry.expires_at);
        debug!(owner = %entry.owner, %digest, method = %request.method, "request authorized");
        Ok(entry.owner)
    }
}

#[async_trait]
impl RequestAuthorizer for AllowlistAuthorizer {
    async fn authorize_request(&self, request: &Request) -> Result<String, AuthorizationError> {
        self.authorize_at(request, Instant::now())
    }
}
