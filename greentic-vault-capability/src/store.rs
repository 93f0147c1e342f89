//! Correlates consensus responses with the callers waiting on them.
//!
//! Each pending request owns a single-use reply slot. A slot is taken out of the
//! map before it is fulfilled, so a request is answered at most once whether
//! the answer comes from consensus, the expiry sweep or shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vault_core::{LifecycleError, ReplySlot, ReplyWaiter, StateMachine, reply};

use crate::config::CapabilityConfig;
use crate::pipeline::VaultResponse;

const STORE_NAME: &str = "VaultResponseStore";

pub const EXPIRED_MESSAGE: &str = "timeout exceeded: could not process request before expiry";
pub const CLOSED_MESSAGE: &str = "response store closed before a response arrived";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("request {0} is already pending")]
    AlreadyPending(String),
    #[error("no pending request with ID {0}")]
    UnknownRequest(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

struct Pending {
    slot: ReplySlot<VaultResponse>,
    expires_at: Instant,
}

#[derive(Default)]
struct PendingMap {
    entries: Mutex<HashMap<String, Pending>>,
}

impl PendingMap {
    fn take(&self, id: &str) -> Option<Pending> {
        self.entries.lock().remove(id)
    }

    fn take_expired(&self, now: Instant) -> Vec<(String, Pending)> {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, pending)| pending.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| entries.remove(&id).map(|pending| (id, pending)))
            .collect()
    }

    fn take_all(&self) -> Vec<(String, Pending)> {
        self.entries.lock().drain().collect()
    }

    fn expire(&self, now: Instant) -> usize {
        let expired = self.take_expired(now);
        let count = expired.len();
        for (id, pending) in expired {
            debug!(request_id = %id, "request expired");
            answer(pending, VaultResponse::failed(id, EXPIRED_MESSAGE));
        }
        count
    }
}

fn answer(pending: Pending, response: VaultResponse) {
    let id = response.id.clone();
    if let Err(err) = pending.slot.fulfill(response) {
        debug!(request_id = %id, error = %err, "requester no longer waiting");
    }
}

pub struct ResponseStore {
    pending: Arc<PendingMap>,
    sweep_interval: Duration,
    lifecycle: StateMachine,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseStore {
    pub fn new(config: &CapabilityConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            pending: Arc::new(PendingMap::default()),
            sweep_interval: config.sweep_interval(),
            lifecycle: StateMachine::new(),
            shutdown,
            sweeper: Mutex::new(None),
        }
    }

    /// Starts the expiry sweep. Must run inside a tokio runtime.
    pub fn start(&self) -> Result<(), LifecycleError> {
        self.lifecycle.start_once(STORE_NAME, || {
            info!("starting vault response store");
            let pending = self.pending.clone();
            let interval = self.sweep_interval;
            let shutdown = self.shutdown.subscribe();
            *self.sweeper.lock() = Some(tokio::spawn(sweep(pending, interval, shutdown)));
            Ok(())
        })
    }

    /// Stops the sweep, waits for it and fails every request still pending.
    pub async fn close(&self) -> Result<(), LifecycleError> {
        self.lifecycle.begin_stop(STORE_NAME)?;
        info!("closing vault response store");
        self.shutdown.send_replace(true);
        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            if let Err(err) = handle.await {
                warn!(error = %err, "response store sweep ended abnormally");
            }
        }
        for (id, pending) in self.pending.take_all() {
            answer(pending, VaultResponse::failed(id, CLOSED_MESSAGE));
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Opens a reply slot for `id`, answered by `fulfill` or by expiry at `expires_at`.
    pub fn register(
        &self,
        id: &str,
        expires_at: Instant,
    ) -> Result<ReplyWaiter<VaultResponse>, StoreError> {
        self.lifecycle.ensure_running(STORE_NAME)?;
        let mut entries = self.pending.entries.lock();
        if entries.contains_key(id) {
            return Err(StoreError::AlreadyPending(id.to_string()));
        }
        let (slot, waiter) = reply::channel();
        entries.insert(id.to_string(), Pending { slot, expires_at });
        Ok(waiter)
    }

    /// Delivers the consensus response for a pending request.
    pub fn fulfill(&self, response: VaultResponse) -> Result<(), StoreError> {
        let pending = self
            .pending
            .take(&response.id)
            .ok_or_else(|| StoreError::UnknownRequest(response.id.clone()))?;
        answer(pending, response);
        Ok(())
    }

    /// Forgets a pending request whose caller stopped waiting.
    pub fn abandon(&self, id: &str) -> bool {
        self.pending.take(id).is_some()
    }

    /// Answers every request whose deadline has passed.
    pub fn expire(&self, now: Instant) -> usize {
        self.pending.expire(now)
    }

    pub fn len(&self) -> usize {
        self.pending.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.entries.lock().contains_key(id)
    }
}

async fn sweep(pending: Arc<PendingMap>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                pending.expire(Instant::now());
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("response store sweep stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vault_core::CancelToken;

    fn running_store() -> ResponseStore {
        let store = ResponseStore::new(&CapabilityConfig::default());
        store.start().expect("start");
        store
    }

    #[tokio::test]
    async fn fulfilled_once() {
        let store = running_store();
        let waiter = store
            .register("wf::exec::1", Instant::now() + Duration::from_secs(30))
            .expect("register");

        store
            .fulfill(VaultResponse::ok("wf::exec::1", json!({"ok": true})))
            .expect("fulfill");
        assert_eq!(
            store.fulfill(VaultResponse::ok("wf::exec::1", json!({}))),
            Err(StoreError::UnknownRequest("wf::exec::1".into()))
        );

        let response = waiter.wait(&CancelToken::new()).await.expect("reply");
        assert_eq!(response.payload, json!({"ok": true}));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn pending_id_cannot_be_registered_twice() {
        let store = running_store();
        let deadline = Instant::now() + Duration::from_secs(30);
        let _waiter = store.register("id", deadline).expect("register");
        assert!(matches!(
            store.register("id", deadline),
            Err(StoreError::AlreadyPending(_))
        ));
    }

    #[tokio::test]
    async fn registration_requires_running_store() {
        let store = ResponseStore::new(&CapabilityConfig::default());
        assert!(matches!(
            store.register("id", Instant::now()),
            Err(StoreError::Lifecycle(LifecycleError::NotRunning(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_answers_expired_requests() {
        let store = running_store();
        let waiter = store
            .register("id", Instant::now() + Duration::from_secs(2))
            .expect("register");

        let response = waiter.wait(&CancelToken::new()).await.expect("reply");
        assert_eq!(response.error_message(), Some(EXPIRED_MESSAGE));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn close_fails_pending_requests() {
        let store = running_store();
        let waiter = store
            .register("id", Instant::now() + Duration::from_secs(30))
            .expect("register");

        store.close().await.expect("close");

        let response = waiter.wait(&CancelToken::new()).await.expect("reply");
        assert_eq!(response.error_message(), Some(CLOSED_MESSAGE));
        assert!(matches!(
            store.close().await,
            Err(LifecycleError::AlreadyStopped(_))
        ));
    }

    #[tokio::test]
    async fn abandon_drops_slot() {
        let store = running_store();
        let _waiter = store
            .register("id", Instant::now() + Duration::from_secs(30))
            .expect("register");
        assert!(store.abandon("id"));
        assert!(!store.abandon("id"));
        assert!(!store.contains("id"));
    }
}
