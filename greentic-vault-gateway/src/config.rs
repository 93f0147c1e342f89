use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const TIMEOUT_ENV: &str = "VAULT_GATEWAY_REQUEST_TIMEOUT_SECS";
const GLOBAL_RPS_ENV: &str = "VAULT_GATEWAY_NODE_GLOBAL_RPS";
const GLOBAL_BURST_ENV: &str = "VAULT_GATEWAY_NODE_GLOBAL_BURST";
const SENDER_RPS_ENV: &str = "VAULT_GATEWAY_NODE_PER_SENDER_RPS";
const SENDER_BURST_ENV: &str = "VAULT_GATEWAY_NODE_PER_SENDER_BURST";

/// Budget for messages arriving from DON nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(rename = "globalRPS")]
    pub global_rps: f64,
    #[serde(rename = "globalBurst")]
    pub global_burst: u32,
    #[serde(rename = "perSenderRPS")]
    pub per_sender_rps: f64,
    #[serde(rename = "perSenderBurst")]
    pub per_sender_burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            global_rps: 100.0,
            global_burst: 100,
            per_sender_rps: 10.0,
            per_sender_burst: 10,
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<()> {
        if !positive(self.global_rps) || self.global_burst == 0 {
            bail!("global rate limit must have positive rps and burst");
        }
        if !positive(self.per_sender_rps) || self.per_sender_burst == 0 {
            bail!("per-sender rate limit must have positive rps and burst");
        }
        Ok(())
    }
}

/// Method configuration of the vault handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    #[serde(rename = "nodeRateLimiter", default)]
    pub node_rate_limiter: RateLimiterConfig,
    /// Zero means "use the default".
    #[serde(rename = "requestTimeoutSec", default)]
    pub request_timeout_sec: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            node_rate_limiter: RateLimiterConfig::default(),
            request_timeout_sec: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl HandlerConfig {
    /// Parses the raw JSON method config handed to the handler.
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let config: HandlerConfig =
            serde_json::from_slice(raw).context("failed to unmarshal method config")?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `VAULT_GATEWAY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = HandlerConfig::default();
        if let Some(value) = env_parse::<u64>(TIMEOUT_ENV)? {
            config.request_timeout_sec = value;
        }
        let limiter = &mut config.node_rate_limiter;
        if let Some(value) = env_parse(GLOBAL_RPS_ENV)? {
            limiter.global_rps = value;
        }
        if let Some(value) = env_parse(GLOBAL_BURST_ENV)? {
            limiter.global_burst = value;
        }
        if let Some(value) = env_parse(SENDER_RPS_ENV)? {
            limiter.per_sender_rps = value;
        }
        if let Some(value) = env_parse(SENDER_BURST_ENV)? {
            limiter.per_sender_burst = value;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.node_rate_limiter
            .validate()
            .context("invalid nodeRateLimiter")
    }

    pub fn request_timeout(&self) -> Duration {
        let secs = if self.request_timeout_sec == 0 {
            DEFAULT_REQUEST_TIMEOUT_SECS
        } else {
            self.request_timeout_sec
        };
        Duration::from_secs(secs)
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} is not valid")),
        _ => Ok(None),
    }
}
