use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use vault_capability::{
    CAPABILITY_ID, CapabilityConfig, CapabilityError, CapabilityRequest, CapabilityType,
    ConsensusPipeline, ConsensusRequest, PipelineError, RequestMetadata, ResponseStore,
    StoreError, VaultCapability, VaultPayload, VaultResponse,
};
use vault_core::jsonrpc::Request;
use vault_core::{
    AllowlistAuthorizer, AuthorizationError, CancelToken, CreateSecretsRequest,
    DeleteSecretsRequest, EncryptedSecret, GetSecretsRequest, LifecycleError,
    ListSecretIdentifiersRequest, METHOD_SECRETS_CREATE, METHOD_SECRETS_DELETE, METHOD_SECRETS_GET,
    RequestAuthorizer,
    SecretIdentifier, SecretRequest, UpdateSecretsRequest,
};

enum Mode {
    Respond(Value),
    Fail(&'static str),
    Silent,
    Reject,
}

struct ScriptedPipeline {
    store: Arc<ResponseStore>,
    mode: Mode,
    submitted: Mutex<Vec<ConsensusRequest>>,
}

impl ScriptedPipeline {
    fn submitted(&self) -> Vec<ConsensusRequest> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl ConsensusPipeline for ScriptedPipeline {
    async fn submit(&self, request: ConsensusRequest) -> Result<(), PipelineError> {
        self.submitted.lock().push(request.clone());
        let delivered = match &self.mode {
            Mode::Respond(payload) => self
                .store
                .fulfill(VaultResponse::ok(request.id.clone(), payload.clone())),
            Mode::Fail(message) => self
                .store
                .fulfill(VaultResponse::failed(request.id.clone(), *message)),
            Mode::Silent => Ok(()),
            Mode::Reject => {
                return Err(PipelineError::Rejected {
                    id: request.id,
                    reason: "queue full".into(),
                });
            }
        };
        delivered.map_err(|err| PipelineError::Rejected {
            id: request.id,
            reason: err.to_string(),
        })
    }
}

struct FixedOwner(&'static str);

#[async_trait]
impl RequestAuthorizer for FixedOwner {
    async fn authorize_request(&self, _request: &Request) -> Result<String, AuthorizationError> {
        Ok(self.0.to_string())
    }
}

struct DenyAll;

#[async_trait]
impl RequestAuthorizer for DenyAll {
    async fn authorize_request(&self, _request: &Request) -> Result<String, AuthorizationError> {
        Err(AuthorizationError::Denied("unknown signer".into()))
    }
}

struct Fixture {
    capability: VaultCapability,
    pipeline: Arc<ScriptedPipeline>,
}

async fn fixture(mode: Mode, authorizer: Arc<dyn RequestAuthorizer>) -> Fixture {
    let config = CapabilityConfig::default();
    let store = Arc::new(ResponseStore::new(&config));
    let pipeline = Arc::new(ScriptedPipeline {
        store: store.clone(),
        mode,
        submitted: Mutex::new(Vec::new()),
    });
    let capability = VaultCapability::new(config, store, pipeline.clone(), authorizer);
    capability.start().await.expect("start");
    Fixture {
        capability,
        pipeline,
    }
}

async fn alice(mode: Mode) -> Fixture {
    fixture(mode, Arc::new(FixedOwner("alice"))).await
}

fn id(key: &str, owner: &str) -> SecretIdentifier {
    SecretIdentifier::new(key, "main", owner)
}

fn encrypted(key: &str, owner: &str) -> EncryptedSecret {
    EncryptedSecret {
        id: Some(id(key, owner)),
        encrypted_value: "c2VjcmV0".into(),
    }
}

fn get_payload() -> Value {
    json!({"requests": [{"id": {"key": "api-key", "namespace": "main", "owner": "alice"}, "encryption_keys": ["pk"]}]})
}

fn get_response() -> Value {
    json!({"responses": [{
        "id": {"key": "api-key", "namespace": "main", "owner": "alice"},
        "data": {"encrypted_value": "blob", "encrypted_decryption_key_shares": [{"encryption_key": "pk", "shares": ["s1", "s2"]}]},
    }]})
}

fn capability_request(execution_id: &str) -> CapabilityRequest {
    CapabilityRequest {
        method: METHOD_SECRETS_GET.into(),
        payload: Some(get_payload()),
        metadata: RequestMetadata {
            workflow_id: "wf-1".into(),
            workflow_execution_id: execution_id.into(),
            reference_id: "ref-1".into(),
        },
    }
}

#[tokio::test]
async fn execute_returns_consensus_response() {
    let fx = alice(Mode::Respond(get_response())).await;

    let response = fx
        .capability
        .execute(capability_request("exec-1"), &CancelToken::new())
        .await
        .expect("execute");

    assert_eq!(response.payload, get_response());
    let submitted = fx.pipeline.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].id, "wf-1::exec-1::ref-1");
    assert!(matches!(submitted[0].payload, VaultPayload::GetSecrets(_)));
}

#[tokio::test]
async fn execute_during_subscription_phase() {
    let fx = alice(Mode::Respond(get_response())).await;

    fx.capability
        .execute(capability_request(""), &CancelToken::new())
        .await
        .expect("execute");

    assert_eq!(fx.pipeline.submitted()[0].id, "wf-1::subscription::ref-1");
}

#[tokio::test]
async fn execute_rejects_response_of_wrong_shape() {
    let fx = alice(Mode::Respond(json!("not a get response"))).await;

    let err = fx
        .capability
        .execute(capability_request("exec-1"), &CancelToken::new())
        .await
        .expect_err("wrong shape");

    assert!(matches!(err, CapabilityError::InvalidResponse(_)));
    assert!(
        err.to_string()
            .starts_with("could not unmarshal response to GetSecretsResponse")
    );
}

#[tokio::test(start_paused = true)]
async fn execute_times_out_without_consensus() {
    let fx = alice(Mode::Silent).await;

    let err = fx
        .capability
        .execute(capability_request("exec-1"), &CancelToken::new())
        .await
        .expect_err("timeout");

    assert_eq!(
        err.to_string(),
        "error processing request wf-1::exec-1::ref-1: timeout exceeded: could not process request before expiry"
    );
    assert!(fx.capability.store().is_empty());
}

#[tokio::test]
async fn execute_requires_payload_and_get_method() {
    let fx = alice(Mode::Respond(get_response())).await;

    let mut legacy = capability_request("exec-1");
    legacy.payload = None;
    legacy.method = "vault.secrets.create".into();
    let err = fx
        .capability
        .execute(legacy, &CancelToken::new())
        .await
        .expect_err("legacy");
    assert_eq!(err.to_string(), "capability does not support v1 requests");

    let mut wrong_method = capability_request("exec-1");
    wrong_method.method = METHOD_SECRETS_CREATE.into();
    let err = fx
        .capability
        .execute(wrong_method, &CancelToken::new())
        .await
        .expect_err("method");
    assert_eq!(
        err.to_string(),
        "unsupported method: can only call GetSecrets via capability interface"
    );
    assert!(fx.pipeline.submitted().is_empty());
}

#[tokio::test]
async fn create_pins_identifiers_to_authorized_owner() {
    let fx = alice(Mode::Respond(json!({"responses": []}))).await;
    let request = CreateSecretsRequest {
        request_id: "alice::req-1".into(),
        encrypted_secrets: vec![encrypted("api-key", "mallory"), encrypted("db", "mallory")],
    };

    fx.capability
        .create_secrets(request, &CancelToken::new())
        .await
        .expect("create");

    let submitted = fx.pipeline.submitted();
    assert_eq!(submitted[0].id, "alice::req-1");
    let VaultPayload::CreateSecrets(body) = &submitted[0].payload else {
        panic!("unexpected payload {:?}", submitted[0].payload);
    };
    assert!(
        body.encrypted_secrets
            .iter()
            .all(|secret| secret.id.as_ref().map(|id| id.owner.as_str()) == Some("alice"))
    );
}

#[tokio::test]
async fn request_id_must_carry_owner_segment() {
    let fx = alice(Mode::Respond(json!({}))).await;

    for request_id in ["bob::req-1", "alice2::req-1", "alice"] {
        let request = DeleteSecretsRequest {
            request_id: request_id.into(),
            ids: vec![id("api-key", "alice")],
        };
        let err = fx
            .capability
            .delete_secrets(request, &CancelToken::new())
            .await
            .expect_err("owner mismatch");
        assert_eq!(
            err.to_string(),
            format!("request ID: {request_id} must start with owner address: alice")
        );
    }
    assert!(fx.pipeline.submitted().is_empty());
}

#[tokio::test]
async fn unauthorized_requests_never_reach_consensus() {
    let fx = fixture(Mode::Respond(json!({})), Arc::new(DenyAll)).await;
    let request = UpdateSecretsRequest {
        request_id: "alice::req-1".into(),
        encrypted_secrets: vec![encrypted("api-key", "alice")],
    };

    let err = fx
        .capability
        .update_secrets(request, &CancelToken::new())
        .await
        .expect_err("denied");

    assert_eq!(err.to_string(), "request not authorized: unknown signer");
    assert!(fx.pipeline.submitted().is_empty());
}

#[tokio::test]
async fn structural_validation_runs_before_authorization() {
    let fx = fixture(Mode::Respond(json!({})), Arc::new(DenyAll)).await;
    let cancel = CancelToken::new();

    let oversized = UpdateSecretsRequest {
        request_id: "alice::req-1".into(),
        encrypted_secrets: (0..10)
            .map(|index| encrypted(&format!("key-{index}"), "alice"))
            .collect(),
    };
    let err = fx
        .capability
        .update_secrets(oversized, &cancel)
        .await
        .expect_err("oversized");
    assert_eq!(err.to_string(), "request batch size exceeds maximum of 10");

    let duplicate = DeleteSecretsRequest {
        request_id: "alice::req-2".into(),
        ids: vec![id("api-key", "alice"), id("api-key", "alice")],
    };
    let err = fx
        .capability
        .delete_secrets(duplicate, &cancel)
        .await
        .expect_err("duplicate");
    assert!(
        err.to_string()
            .starts_with("duplicate secret ID found at index 1")
    );

    let missing = CreateSecretsRequest {
        request_id: "alice::req-3".into(),
        encrypted_secrets: vec![EncryptedSecret {
            id: None,
            encrypted_value: "blob".into(),
        }],
    };
    let err = fx
        .capability
        .create_secrets(missing, &cancel)
        .await
        .expect_err("missing id");
    assert_eq!(err.to_string(), "secret ID must not be nil at index 0");

    let empty_id = CreateSecretsRequest {
        request_id: String::new(),
        encrypted_secrets: vec![encrypted("api-key", "alice")],
    };
    let err = fx
        .capability
        .create_secrets(empty_id, &cancel)
        .await
        .expect_err("empty id");
    assert_eq!(err.to_string(), "request ID must not be empty");
    assert!(fx.pipeline.submitted().is_empty());
}

#[tokio::test]
async fn list_is_scoped_to_authorized_owner() {
    let fx = alice(Mode::Respond(json!({"identifiers": [], "success": true}))).await;
    let cancel = CancelToken::new();

    let err = fx
        .capability
        .list_secret_identifiers(
            ListSecretIdentifiersRequest {
                request_id: "alice::req-1".into(),
                owner: String::new(),
                namespace: "main".into(),
            },
            &cancel,
        )
        .await
        .expect_err("owner required");
    assert_eq!(err.to_string(), "owner must not be empty");

    fx.capability
        .list_secret_identifiers(
            ListSecretIdentifiersRequest {
                request_id: "alice::req-2".into(),
                owner: "mallory".into(),
                namespace: "main".into(),
            },
            &cancel,
        )
        .await
        .expect("list");

    let submitted = fx.pipeline.submitted();
    let VaultPayload::ListSecretIdentifiers(body) = &submitted[0].payload else {
        panic!("unexpected payload {:?}", submitted[0].payload);
    };
    assert_eq!(body.owner, "alice");
}

#[tokio::test]
async fn get_secrets_skips_authorization_but_bounds_batch() {
    let fx = fixture(Mode::Respond(get_response()), Arc::new(DenyAll)).await;
    let cancel = CancelToken::new();
    let entry = SecretRequest {
        id: Some(id("api-key", "alice")),
        encryption_keys: vec!["pk".into()],
    };

    let response = fx
        .capability
        .get_secrets(
            "wf::exec::1",
            GetSecretsRequest {
                requests: vec![entry.clone()],
            },
            &cancel,
        )
        .await
        .expect("get");
    assert_eq!(response.payload, get_response());

    let err = fx
        .capability
        .get_secrets(
            "wf::exec::2",
            GetSecretsRequest {
                requests: vec![entry; 10],
            },
            &cancel,
        )
        .await
        .expect_err("oversized");
    assert_eq!(err.to_string(), "request batch size exceeds maximum of 10");

    let err = fx
        .capability
        .get_secrets("wf::exec::3", GetSecretsRequest::default(), &cancel)
        .await
        .expect_err("empty");
    assert_eq!(err.to_string(), "must have at least 1 request");
}

#[tokio::test]
async fn consensus_error_is_wrapped() {
    let fx = alice(Mode::Fail("secret already exists")).await;
    let request = CreateSecretsRequest {
        request_id: "alice::req-1".into(),
        encrypted_secrets: vec![encrypted("api-key", "alice")],
    };

    let err = fx
        .capability
        .create_secrets(request, &CancelToken::new())
        .await
        .expect_err("consensus error");

    assert_eq!(
        err.to_string(),
        "error processing request alice::req-1: secret already exists"
    );
}

#[tokio::test]
async fn rejected_submission_releases_slot() {
    let fx = alice(Mode::Reject).await;
    let request = CreateSecretsRequest {
        request_id: "alice::req-1".into(),
        encrypted_secrets: vec![encrypted("api-key", "alice")],
    };

    let err = fx
        .capability
        .create_secrets(request, &CancelToken::new())
        .await
        .expect_err("rejected");

    assert!(matches!(err, CapabilityError::Pipeline(_)));
    assert!(fx.capability.store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_releases_slot() {
    let fx = alice(Mode::Silent).await;
    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let err = fx
        .capability
        .get_secrets(
            "wf::exec::1",
            serde_json::from_value(get_payload()).expect("payload"),
            &cancel,
        )
        .await
        .expect_err("cancelled");

    assert!(matches!(err, CapabilityError::Cancelled));
    assert!(fx.capability.store().is_empty());
}

#[tokio::test]
async fn concurrent_requests_are_correlated_independently() {
    let fx = alice(Mode::Respond(json!({"responses": []}))).await;
    let cancel = CancelToken::new();
    let first = CreateSecretsRequest {
        request_id: "alice::req-1".into(),
        encrypted_secrets: vec![encrypted("a", "alice")],
    };
    let second = CreateSecretsRequest {
        request_id: "alice::req-2".into(),
        encrypted_secrets: vec![encrypted("b", "alice")],
    };

    let (left, right) = tokio::join!(
        fx.capability.create_secrets(first, &cancel),
        fx.capability.create_secrets(second, &cancel),
    );

    assert_eq!(left.expect("first").id, "alice::req-1");
    assert_eq!(right.expect("second").id, "alice::req-2");
}

#[tokio::test]
async fn allowlisted_digest_authorizes_once() {
    let authorizer = Arc::new(AllowlistAuthorizer::new());
    let request = CreateSecretsRequest {
        request_id: "alice::req-1".into(),
        encrypted_secrets: vec![encrypted("api-key", "alice")],
    };
    let envelope = Request::with_params("", METHOD_SECRETS_CREATE, &request).expect("envelope");
    authorizer
        .allow_request(
            "alice",
            &envelope,
            std::time::Instant::now() + Duration::from_secs(60),
        )
        .expect("allow");
    let fx = fixture(Mode::Respond(json!({"responses": []})), authorizer).await;

    fx.capability
        .create_secrets(request.clone(), &CancelToken::new())
        .await
        .expect("first");

    let mut replay = request;
    replay.request_id = "alice::req-2".into();
    let err = fx
        .capability
        .create_secrets(replay, &CancelToken::new())
        .await
        .expect_err("replay");
    assert!(matches!(err, CapabilityError::Unauthorized(_)));
}

#[tokio::test]
async fn caller_params_allowlist_authorizes_decoded_body() {
    let authorizer = Arc::new(AllowlistAuthorizer::new());
    let caller = Request::new(
        "req-1",
        METHOD_SECRETS_DELETE,
        Some(json!({"ids": [{"key": "api-key", "owner": "alice"}]})),
    );
    authorizer
        .allow_request(
            "alice",
            &caller,
            std::time::Instant::now() + Duration::from_secs(60),
        )
        .expect("allow");
    let fx = fixture(Mode::Respond(json!({"responses": []})), authorizer).await;

    let body: DeleteSecretsRequest = caller.decode_params().expect("decode");
    let forwarded = DeleteSecretsRequest {
        request_id: "alice::req-1".into(),
        ..body
    };
    let response = fx
        .capability
        .delete_secrets(forwarded, &CancelToken::new())
        .await
        .expect("authorized on the node");
    assert_eq!(response.id, "alice::req-1");
}

#[tokio::test]
async fn owner_containing_separator_is_rejected() {
    let fx = fixture(
        Mode::Respond(json!({"responses": []})),
        Arc::new(FixedOwner("alice::admin")),
    )
    .await;
    let request = DeleteSecretsRequest {
        request_id: "alice::admin::req-1".into(),
        ids: vec![id("api-key", "alice")],
    };

    let err = fx
        .capability
        .delete_secrets(request, &CancelToken::new())
        .await
        .expect_err("invalid owner");

    assert!(matches!(err, CapabilityError::InvalidOwner(owner) if owner == "alice::admin"));
    assert!(fx.pipeline.submitted().is_empty());
}

#[tokio::test]
async fn closed_capability_refuses_requests() {
    let fx = alice(Mode::Respond(json!({"responses": []}))).await;
    fx.capability.close().await.expect("close");

    let request = DeleteSecretsRequest {
        request_id: "alice::req-1".into(),
        ids: vec![id("api-key", "alice")],
    };
    let err = fx
        .capability
        .delete_secrets(request, &CancelToken::new())
        .await
        .expect_err("closed");

    assert!(matches!(
        err,
        CapabilityError::Store(StoreError::Lifecycle(LifecycleError::NotRunning(_)))
    ));
    assert!(fx.pipeline.submitted().is_empty());
}

#[tokio::test]
async fn info_and_lifecycle() {
    let fx = alice(Mode::Silent).await;
    let info = fx.capability.info();
    assert_eq!(info.id, CAPABILITY_ID);
    assert_eq!(info.capability_type, CapabilityType::Action);

    assert!(matches!(
        fx.capability.start().await,
        Err(LifecycleError::AlreadyStarted(_))
    ));
    fx.capability.close().await.expect("close");
    assert!(!fx.capability.store().is_running());
}
