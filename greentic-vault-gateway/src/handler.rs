//! Gateway side of the vault protocol.
//!
//! A caller request is authorized, re-keyed under its owner, validated and fanned
//! out to every DON member. Node responses accumulate per request until the
//! aggregator reaches a decision, and a background sweep answers requests that
//! outlive the configured timeout. Every accepted request is answered exactly
//! once through its reply slot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use vault_core::jsonrpc::{Request, Response, encode_response};
use vault_core::{
    CancelToken, CreateSecretsRequest, DeleteSecretsRequest, GetSecretsRequest, LifecycleError,
    ListSecretIdentifiersRequest, METHOD_SECRETS_CREATE, METHOD_SECRETS_DELETE, METHOD_SECRETS_GET,
    METHOD_SECRETS_LIST, METHOD_SECRETS_UPDATE, METHODS, ReplyError, RequestAuthorizer,
    StateMachine, UpdateSecretsRequest, is_valid_owner, prefix_with_owner, reply,
    strip_owner_prefix, validate,
};

use crate::active::{ActiveRequest, ActiveRequestTable, Recorded, UserCallbackPayload, UserReplySlot};
use crate::aggregator::{AggregationError, Aggregator};
use crate::config::HandlerConfig;
use crate::don::{Don, DonConfig};
use crate::error::{ErrorCode, GatewayError};
use crate::rate_limit::NodeRateLimiter;
use crate::telemetry::{HandlerMetrics, MetricsSnapshot};

/// How often the expiry sweep scans for overdue requests.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

pub struct VaultHandler {
    inner: Arc<HandlerInner>,
    lifecycle: StateMachine,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

struct HandlerInner {
    name: String,
    don_config: DonConfig,
    don: Arc<dyn Don>,
    aggregator: Arc<dyn Aggregator>,
    authorizer: Arc<dyn RequestAuthorizer>,
    limiter: NodeRateLimiter,
    active: ActiveRequestTable,
    metrics: HandlerMetrics,
    request_timeout: Duration,
}

impl VaultHandler {
    pub fn new(
        config: HandlerConfig,
        don_config: DonConfig,
        don: Arc<dyn Don>,
        aggregator: Arc<dyn Aggregator>,
        authorizer: Arc<dyn RequestAuthorizer>,
    ) -> Result<Self> {
        let limiter = NodeRateLimiter::new(config.node_rate_limiter)
            .context("failed to create node rate limiter")?;
        let (shutdown, _) = watch::channel(false);
        let inner = HandlerInner {
            name: format!("VaultHandler:{}", don_config.don_id),
            metrics: HandlerMetrics::new(don_config.don_id.clone()),
            request_timeout: config.request_timeout(),
            don_config,
            don,
            aggregator,
            authorizer,
            limiter,
            active: ActiveRequestTable::new(),
        };
        Ok(Self {
            inner: Arc::new(inner),
            lifecycle: StateMachine::new(),
            shutdown,
            sweeper: Mutex::new(None),
        })
    }

    /// Parses the raw method config before building the handler.
    pub fn from_method_config(
        method_config: &[u8],
        don_config: DonConfig,
        don: Arc<dyn Don>,
        aggregator: Arc<dyn Aggregator>,
        authorizer: Arc<dyn RequestAuthorizer>,
    ) -> Result<Self> {
        let config = HandlerConfig::from_json(method_config)?;
        Self::new(config, don_config, don, aggregator, authorizer)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn methods(&self) -> &'static [&'static str] {
        &METHODS
    }

    pub fn health_report(&self) -> BTreeMap<String, Result<(), LifecycleError>> {
        BTreeMap::from([(
            self.inner.name.clone(),
            self.lifecycle.ensure_running(&self.inner.name),
        )])
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn active_requests(&self) -> usize {
        self.inner.active.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Starts the expiry sweep. Must run inside a tokio runtime.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        self.lifecycle.start_once(&self.inner.name, || {
            info!(handler = %self.inner.name, "starting vault handler");
            let inner = self.inner.clone();
            let shutdown = self.shutdown.subscribe();
            *self.sweeper.lock() = Some(tokio::spawn(run_sweeper(inner, shutdown)));
            Ok(())
        })
    }

    /// Stops the sweep and waits for it to exit. Requests still in flight are
    /// answered with a handler error.
    pub async fn close(&self) -> Result<(), LifecycleError> {
        self.lifecycle.begin_stop(&self.inner.name)?;
        info!(handler = %self.inner.name, "closing vault handler");
        self.shutdown.send_replace(true);

        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            if let Err(err) = handle.await {
                warn!(handler = %self.inner.name, error = %err, "expiry sweep ended abnormally");
            }
        }

        for entry in self.inner.active.all() {
            self.inner
                .fail(&entry, GatewayError::Handler("vault handler closed".into()));
        }
        Ok(())
    }

    /// Accepts a caller request. The outcome, success or failure, is always
    /// delivered on `reply`.
    pub async fn handle_user_message(&self, request: Request, reply: UserReplySlot) {
        self.dispatch(request, reply).await;
    }

    /// Registers a reply slot, dispatches `request` and waits for the outcome.
    ///
    /// On cancellation the in-flight entry is removed before returning.
    pub async fn call(
        &self,
        request: Request,
        cancel: &CancelToken,
    ) -> Result<UserCallbackPayload, GatewayError> {
        let (slot, waiter) = reply::channel();
        let entry = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            entry = self.dispatch(request, slot) => entry,
        };

        match waiter.wait(cancel).await {
            Ok(payload) => Ok(payload),
            Err(ReplyError::Cancelled) => {
                if let Some(entry) = entry {
                    if self.inner.active.remove_entry(&entry) {
                        debug!(request_id = %entry.id(), "caller cancelled, dropped in-flight request");
                    }
                }
                Err(GatewayError::Cancelled)
            }
            Err(err) => Err(GatewayError::Handler(err.to_string())),
        }
    }

    /// Accepts one node's response for an in-flight request.
    pub async fn handle_node_response(&self, response: Response, node_address: &str) {
        let inner = &self.inner;
        if !inner.don_config.is_member(node_address) {
            warn!(node = node_address, request_id = %response.id, "response from non-member node dropped");
            return;
        }
        if !inner.limiter.allow(node_address) {
            debug!(node = node_address, "node is rate limited");
            return;
        }

        let Some(entry) = inner.active.get(&response.id) else {
            warn!(node = node_address, request_id = %response.id, "no pending request found for ID");
            inner.metrics.record(ErrorCode::StaleNodeResponse);
            return;
        };

        let responses = match entry.record(node_address, response.clone()) {
            Recorded::New(responses) => responses,
            Recorded::Duplicate => {
                warn!(node = node_address, request_id = %entry.id(), "duplicate response from node, ignoring");
                return;
            }
        };

        match inner.aggregator.aggregate(&response, &responses).await {
            Ok(aggregated) => inner.deliver_aggregate(&entry, aggregated),
            Err(err @ AggregationError::QuorumUnobtainable { .. }) => {
                error!(
                    request_id = %entry.id(),
                    responses = responses.len(),
                    error = %err,
                    "quorum unobtainable, returning response to user"
                );
                inner.fail(&entry, GatewayError::QuorumUnobtainable(err.to_string()));
            }
            Err(err) => {
                debug!(request_id = %entry.id(), error = %err, "waiting for other nodes");
            }
        }
    }

    async fn dispatch(&self, mut request: Request, reply: UserReplySlot) -> Option<Arc<ActiveRequest>> {
        let inner = &self.inner;
        if let Err(err) = self.lifecycle.ensure_running(&inner.name) {
            inner.reply_unregistered(&request.id, &reply, GatewayError::Handler(err.to_string()));
            return None;
        }
        if request.id.is_empty() {
            inner.reply_unregistered(&request.id, &reply, GatewayError::EmptyRequestId);
            return None;
        }

        let owner = match inner.authorizer.authorize_request(&request).await {
            Ok(owner) => owner,
            Err(err) => {
                warn!(request_id = %request.id, method = %request.method, reason = %err, "request not authorized");
                inner.reply_unregistered(&request.id, &reply, GatewayError::Unauthorized(err.to_string()));
                return None;
            }
        };

        if !is_valid_owner(&owner) {
            inner.reply_unregistered(&request.id, &reply, GatewayError::InvalidOwner(owner));
            return None;
        }

        request.id = prefix_with_owner(&owner, &request.id);
        debug!(request_id = %request.id, method = %request.method, owner = %owner, "handling authorized vault request");

        let entry = match inner.active.insert(ActiveRequest::new(request, reply)) {
            Ok(entry) => entry,
            Err(rejected) => {
                let id = rejected.id().to_string();
                let err = GatewayError::InvalidParams(format!(
                    "request ID {} is already in flight",
                    strip_owner_prefix(&id)
                ));
                inner.reply_unregistered(&id, rejected.reply(), err);
                return None;
            }
        };

        match inner.downstream_request(entry.request()) {
            Ok(forwarded) => inner.fan_out(&entry, &forwarded).await,
            Err(err) => {
                inner.fail(&entry, err);
            }
        }
        Some(entry)
    }
}

impl HandlerInner {
    /// Validates the caller's params and builds the request sent to the DON.
    fn downstream_request(&self, request: &Request) -> Result<Request, GatewayError> {
        match request.method.as_str() {
            METHOD_SECRETS_CREATE => {
                let mut body: CreateSecretsRequest = decode(request)?;
                body.request_id = request.id.clone();
                validate::create(&body)?;
                encode(request, &body)
            }
            METHOD_SECRETS_UPDATE => {
                let mut body: UpdateSecretsRequest = decode(request)?;
                body.request_id = request.id.clone();
                validate::update(&body)?;
                encode(request, &body)
            }
            METHOD_SECRETS_DELETE => {
                let mut body: DeleteSecretsRequest = decode(request)?;
                body.request_id = request.id.clone();
                validate::delete(&body)?;
                encode(request, &body)
            }
            METHOD_SECRETS_LIST => {
                let mut body: ListSecretIdentifiersRequest = decode(request)?;
                body.request_id = request.id.clone();
                validate::list(&body)?;
                encode(request, &body)
            }
            // Get params carry no request ID and go out untouched.
            METHOD_SECRETS_GET => {
                let body: GetSecretsRequest = decode(request)?;
                validate::get(&body)?;
                Ok(request.clone())
            }
            other => Err(GatewayError::UnsupportedMethod(other.to_string())),
        }
    }

    async fn fan_out(&self, entry: &Arc<ActiveRequest>, request: &Request) {
        let members = &self.don_config.members;
        let mut failures = 0usize;
        for node in members {
            if let Err(err) = self.don.send_to_node(&node.address, request).await {
                failures += 1;
                error!(request_id = %entry.id(), node = %node.address, error = %err, "error sending request to node");
            }
        }

        if failures > 0 && failures == members.len() {
            self.fail(entry, GatewayError::AllNodesUnreachable);
            return;
        }
        debug!(
            request_id = %entry.id(),
            reached = members.len() - failures,
            "forwarded request to vault nodes"
        );
    }

    fn deliver_aggregate(&self, entry: &Arc<ActiveRequest>, mut response: Response) {
        response.id = strip_owner_prefix(&response.id).to_string();
        let raw_response = match encode_response(&response) {
            Ok(raw) => raw,
            Err(err) => {
                self.fail(entry, GatewayError::Encoding(format!("failed to marshal response: {err}")));
                return;
            }
        };
        let error_code = response
            .error
            .as_ref()
            .map_or(ErrorCode::NoError, |err| ErrorCode::from_jsonrpc(err.code));

        debug!(request_id = %entry.id(), error_code = %error_code, "issued user callback");
        self.deliver(
            entry,
            UserCallbackPayload {
                raw_response,
                error_code,
            },
        );
    }

    fn fail(&self, entry: &Arc<ActiveRequest>, err: GatewayError) -> bool {
        let payload = self.error_payload(entry.id(), &entry.request().method, &err);
        self.deliver(entry, payload)
    }

    /// Removal from the table is what entitles a path to answer.
    fn deliver(&self, entry: &Arc<ActiveRequest>, payload: UserCallbackPayload) -> bool {
        if !self.active.remove_entry(entry) {
            debug!(request_id = %entry.id(), "request already answered");
            return false;
        }
        self.metrics.record(payload.error_code);
        if let Err(err) = entry.reply().fulfill(payload) {
            debug!(request_id = %entry.id(), error = %err, "caller no longer waiting");
        }
        true
    }

    fn reply_unregistered(&self, id: &str, reply: &UserReplySlot, err: GatewayError) {
        let payload = self.error_payload(id, "", &err);
        self.metrics.record(payload.error_code);
        if let Err(reply_err) = reply.fulfill(payload) {
            debug!(request_id = id, error = %reply_err, "caller no longer waiting");
        }
    }

    fn error_payload(&self, id: &str, method: &str, err: &GatewayError) -> UserCallbackPayload {
        let code = err.code();
        match err {
            GatewayError::Encoding(_) | GatewayError::AllNodesUnreachable => {
                error!(request_id = id, method, error = %err, "vault request failed");
            }
            _ => warn!(request_id = id, method, error_code = %code, error = %err, "vault request rejected"),
        }

        let response = Response::failure(strip_owner_prefix(id), code.to_jsonrpc(), err.user_message());
        let raw_response = encode_response(&response).unwrap_or_else(|encode_err| {
            error!(request_id = id, error = %encode_err, "failed to encode error response");
            Vec::new()
        });
        UserCallbackPayload {
            raw_response,
            error_code: code,
        }
    }

    fn expire(&self, now: Instant) -> usize {
        let mut expired = 0;
        for entry in self.active.expired(now, self.request_timeout) {
            if self.fail(&entry, GatewayError::Timeout) {
                expired += 1;
            }
        }
        expired
    }
}

async fn run_sweeper(inner: Arc<HandlerInner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = inner.expire(Instant::now());
                if expired > 0 {
                    debug!(handler = %inner.name, expired, "expired vault requests");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!(handler = %inner.name, "expiry sweep stopped");
}

fn decode<T: DeserializeOwned>(request: &Request) -> Result<T, GatewayError> {
    request
        .decode_params()
        .map_err(|err| GatewayError::Parse(err.to_string()))
}

fn encode<T: Serialize>(request: &Request, body: &T) -> Result<Request, GatewayError> {
    Request::with_params(request.id.clone(), request.method.clone(), body)
        .map_err(|err| GatewayError::Encoding(format!("failed to marshal request: {err}")))
}
