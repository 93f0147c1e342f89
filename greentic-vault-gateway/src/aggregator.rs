//! Quorum decision over node responses.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use vault_core::jsonrpc::Response;

use crate::don::{CapabilitiesRegistry, RegistryError, VAULT_CAPABILITY_ID};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    /// Not enough matching responses yet; keep waiting.
    #[error("quorum not reached yet")]
    Undecided,
    #[error("quorum unobtainable: largest group {largest} with {outstanding} nodes outstanding cannot reach {required}")]
    QuorumUnobtainable {
        largest: usize,
        outstanding: usize,
        required: usize,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to digest node response: {0}")]
    Digest(String),
}

/// Turns the responses collected for one request into a single answer.
///
/// Implementations must not depend on arrival order: the same set of
/// responses always yields the same decision.
#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn aggregate(
        &self,
        latest: &Response,
        responses: &BTreeMap<String, Response>,
    ) -> Result<Response, AggregationError>;
}

/// Decides once `F + 1` nodes returned an identical `{result, error}` pair.
pub struct QuorumAggregator {
    registry: Arc<dyn CapabilitiesRegistry>,
    capability_id: String,
}

impl QuorumAggregator {
    pub fn new(registry: Arc<dyn CapabilitiesRegistry>) -> Self {
        Self::for_capability(registry, VAULT_CAPABILITY_ID)
    }

    pub fn for_capability(
        registry: Arc<dyn CapabilitiesRegistry>,
        capability_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            capability_id: capability_id.into(),
        }
    }
}

#[async_trait]
impl Aggregator for QuorumAggregator {
    async fn aggregate(
        &self,
        _latest: &Response,
        responses: &BTreeMap<String, Response>,
    ) -> Result<Response, AggregationError> {
        let don = self
            .registry
            .don_for_capability(&self.capability_id)
            .await?;
        let required = don.quorum();

        // digest -> (votes, first response seen in node order)
        let mut groups: HashMap<String, (usize, &Response)> = HashMap::new();
        for response in responses.values() {
            let digest = response_digest(response)?;
            groups.entry(digest).or_insert((0, response)).0 += 1;
        }

        let winner = groups
            .iter()
            .max_by(|(left_digest, left), (right_digest, right)| {
                left.0
                    .cmp(&right.0)
                    .then_with(|| right_digest.cmp(left_digest))
            })
            .map(|(_, (votes, response))| (*votes, *response));

        let largest = winner.map(|(votes, _)| votes).unwrap_or(0);
        if let Some((_, response)) = winner.filter(|(votes, _)| *votes >= required) {
            return Ok(response.clone());
        }

        let outstanding = don.members.saturating_sub(responses.len());
        if largest + outstanding < required {
            return Err(AggregationError::QuorumUnobtainable {
                largest,
                outstanding,
                required,
            });
        }
        Err(AggregationError::Undecided)
    }
}

/// Hex SHA-256 over the canonical JSON of a response's `{result, error}`.
pub fn response_digest(response: &Response) -> Result<String, AggregationError> {
    let body = json!({
        "result": response.result,
        "error": response.error,
    });
    let bytes =
        serde_json::to_vec(&body).map_err(|err| AggregationError::Digest(err.to_string()))?;
    Ok(hex::encode(Sha256::digest(bytes)))
}
