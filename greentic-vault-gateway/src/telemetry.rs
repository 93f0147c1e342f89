use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::ErrorCode;

pub const METRIC_INTERNAL_ERROR: &str = "gateway_vault_request_internal_error";
pub const METRIC_USER_ERROR: &str = "gateway_vault_request_user_error";
pub const METRIC_SUCCESS: &str = "gateway_vault_request_success";

/// Installs the JSON log subscriber. Safe to call more than once.
pub fn init() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(false),
        )
        .try_init()
        .ok();

    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub internal_errors: u64,
    pub user_errors: u64,
    pub successes: u64,
}

/// Request outcome counters, tagged with the DON ID.
pub struct HandlerMetrics {
    don_id: String,
    internal_error: Counter<u64>,
    user_error: Counter<u64>,
    success: Counter<u64>,
    internal_total: AtomicU64,
    user_total: AtomicU64,
    success_total: AtomicU64,
}

impl HandlerMetrics {
    pub fn new(don_id: impl Into<String>) -> Self {
        let meter = global::meter("greentic::vault::gateway");
        Self {
            don_id: don_id.into(),
            internal_error: meter
                .u64_counter(METRIC_INTERNAL_ERROR)
                .with_description("Vault requests that failed inside the gateway")
                .build(),
            user_error: meter
                .u64_counter(METRIC_USER_ERROR)
                .with_description("Vault requests rejected because of caller input")
                .build(),
            success: meter
                .u64_counter(METRIC_SUCCESS)
                .with_description("Vault requests answered successfully")
                .build(),
            internal_total: AtomicU64::new(0),
            user_total: AtomicU64::new(0),
            success_total: AtomicU64::new(0),
        }
    }

    pub fn record(&self, code: ErrorCode) {
        if code == ErrorCode::NoError {
            self.success
                .add(1, &[KeyValue::new("don_id", self.don_id.clone())]);
            self.success_total.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let attributes = [
            KeyValue::new("don_id", self.don_id.clone()),
            KeyValue::new("error", code.as_str()),
        ];
        if code.is_user_error() {
            self.user_error.add(1, &attributes);
            self.user_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.internal_error.add(1, &attributes);
            self.internal_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            internal_errors: self.internal_total.load(Ordering::Relaxed),
            user_errors: self.user_total.load(Ordering::Relaxed),
            successes: self.success_total.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for HandlerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerMetrics")
            .field("don_id", &self.don_id)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
