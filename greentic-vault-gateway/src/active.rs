//! In-flight request table.
//!
//! Lock discipline: the table lock guards insert, lookup and removal only; each
//! entry's responses sit behind their own lock so accumulating node responses
//! never blocks unrelated requests. Neither lock is held across an `.await`.
//!
//! Removal is the delivery gate: whoever removes an entry owns its reply slot,
//! so every request is answered exactly once.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use vault_core::ReplySlot;
use vault_core::jsonrpc::{Request, Response};

/// Reply delivered to a caller: the encoded JSON-RPC response and its outcome code.
#[derive(Debug, Clone, PartialEq)]
pub struct UserCallbackPayload {
    pub raw_response: Vec<u8>,
    pub error_code: crate::error::ErrorCode,
}

pub type UserReplySlot = ReplySlot<UserCallbackPayload>;

#[derive(Debug)]
pub struct ActiveRequest {
    request: Request,
    responses: Mutex<BTreeMap<String, Response>>,
    created_at: Instant,
    reply: UserReplySlot,
}

/// Result of recording one node's response.
#[derive(Debug)]
pub enum Recorded {
    /// First response from this node; carries the full set collected so far.
    New(BTreeMap<String, Response>),
    Duplicate,
}

impl ActiveRequest {
    pub fn new(request: Request, reply: UserReplySlot) -> Self {
        Self {
            request,
            responses: Mutex::new(BTreeMap::new()),
            created_at: Instant::now(),
            reply,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn id(&self) -> &str {
        &self.request.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > timeout
    }

    /// Stores `response` unless `node` already answered. A duplicate never replaces the original.
    pub fn record(&self, node: &str, response: Response) -> Recorded {
        let mut responses = self.responses.lock();
        if responses.contains_key(node) {
            return Recorded::Duplicate;
        }
        responses.insert(node.to_string(), response);
        Recorded::New(responses.clone())
    }

    pub fn responses(&self) -> BTreeMap<String, Response> {
        self.responses.lock().clone()
    }

    pub(crate) fn reply(&self) -> &UserReplySlot {
        &self.reply
    }
}

#[derive(Debug, Default)]
pub struct ActiveRequestTable {
    entries: RwLock<HashMap<String, Arc<ActiveRequest>>>,
}

impl ActiveRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `request`; hands it back if its ID is already in flight.
    pub fn insert(&self, request: ActiveRequest) -> Result<Arc<ActiveRequest>, ActiveRequest> {
        let mut entries = self.entries.write();
        if entries.contains_key(request.id()) {
            return Err(request);
        }
        let entry = Arc::new(request);
        entries.insert(entry.id().to_string(), entry.clone());
        Ok(entry)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ActiveRequest>> {
        self.entries.read().get(id).cloned()
    }

    /// Removes `entry` if it is still the one registered under its ID.
    pub fn remove_entry(&self, entry: &Arc<ActiveRequest>) -> bool {
        let mut entries = self.entries.write();
        match entries.get(entry.id()) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                entries.remove(entry.id());
                true
            }
            _ => false,
        }
    }

    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<Arc<ActiveRequest>> {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.is_expired(now, timeout))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<ActiveRequest>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }
}
