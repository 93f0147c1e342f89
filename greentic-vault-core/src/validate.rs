//! Structural validation shared by the gateway and the capability.
//!
//! Both sides run the same checks so a batch rejected at the gateway would be
//! rejected identically by every node, and vice versa.

use std::collections::HashSet;

use crate::errors::{Result, ValidationError};
use crate::methods::MAX_BATCH_SIZE;
use crate::types::{
    CreateSecretsRequest, DeleteSecretsRequest, EncryptedSecret, GetSecretsRequest,
    ListSecretIdentifiersRequest, SecretIdentifier, UpdateSecretsRequest,
};

pub fn request_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ValidationError::EmptyRequestId);
    }
    Ok(())
}

/// Rejects empty batches and batches of `MAX_BATCH_SIZE` or more entries.
pub fn batch_len(len: usize) -> Result<()> {
    if len == 0 {
        return Err(ValidationError::EmptyBatch);
    }
    if len >= MAX_BATCH_SIZE {
        return Err(ValidationError::BatchTooLarge {
            max: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

/// Checks that every identifier is complete and that no two collide.
///
/// Duplicates are reported at the index of the later occurrence.
pub fn identifiers<'a, I>(ids: I) -> Result<()>
where
    I: IntoIterator<Item = Option<&'a SecretIdentifier>>,
{
    let mut seen = HashSet::new();
    for (index, id) in ids.into_iter().enumerate() {
        let id = id.ok_or(ValidationError::MissingSecretId { index })?;
        if !id.is_complete() {
            return Err(ValidationError::IncompleteSecretId { index });
        }
        if !seen.insert(id.equality_key()) {
            return Err(ValidationError::DuplicateSecretId {
                index,
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

fn encrypted_secrets(secrets: &[EncryptedSecret]) -> Result<()> {
    batch_len(secrets.len())?;
    identifiers(secrets.iter().map(|secret| secret.id.as_ref()))?;
    if let Some(index) = secrets
        .iter()
        .position(|secret| secret.encrypted_value.is_empty())
    {
        return Err(ValidationError::EmptyEncryptedValue { index });
    }
    Ok(())
}

pub fn create(request: &CreateSecretsRequest) -> Result<()> {
    request_id(&request.request_id)?;
    encrypted_secrets(&request.encrypted_secrets)
}

pub fn update(request: &UpdateSecretsRequest) -> Result<()> {
    request_id(&request.request_id)?;
    encrypted_secrets(&request.encrypted_secrets)
}

pub fn delete(request: &DeleteSecretsRequest) -> Result<()> {
    request_id(&request.request_id)?;
    batch_len(request.ids.len())?;
    identifiers(request.ids.iter().map(Some))
}

/// Get batches carry no request ID of their own; the caller supplies it separately.
pub fn get(request: &GetSecretsRequest) -> Result<()> {
    batch_len(request.requests.len())?;
    identifiers(request.requests.iter().map(|entry| entry.id.as_ref()))
}

pub fn list(request: &ListSecretIdentifiersRequest) -> Result<()> {
    request_id(&request.request_id)?;
    if request.owner.is_empty() {
        return Err(ValidationError::EmptyOwner);
    }
    Ok(())
}
