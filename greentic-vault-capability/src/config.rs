use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

const EXPIRY_ENV: &str = "VAULT_CAPABILITY_REQUEST_EXPIRY_SECS";
const SWEEP_ENV: &str = "VAULT_CAPABILITY_SWEEP_INTERVAL_MS";

fn default_request_expiry_sec() -> u64 {
    30
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// How long a submitted request may wait for its consensus response.
    #[serde(rename = "requestExpirySec", default = "default_request_expiry_sec")]
    pub request_expiry_sec: u64,
    #[serde(rename = "sweepIntervalMs", default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            request_expiry_sec: default_request_expiry_sec(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl CapabilityConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let config: CapabilityConfig =
            serde_json::from_slice(raw).context("failed to parse vault capability config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let mut config = CapabilityConfig::default();
        if let Some(value) = env_u64(EXPIRY_ENV)? {
            config.request_expiry_sec = value;
        }
        if let Some(value) = env_u64(SWEEP_ENV)? {
            config.sweep_interval_ms = value;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_expiry_sec == 0 {
            bail!("requestExpirySec must be positive");
        }
        if self.sweep_interval_ms == 0 {
            bail!("sweepIntervalMs must be positive");
        }
        Ok(())
    }

    pub fn request_expiry(&self) -> Duration {
        Duration::from_secs(self.request_expiry_sec)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} must be an integer")),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = CapabilityConfig::from_json(b"{}").expect("config");
        assert_eq!(config, CapabilityConfig::default());
        assert_eq!(config.request_expiry(), Duration::from_secs(30));
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn zero_expiry_rejected() {
        let err = CapabilityConfig::from_json(br#"{"requestExpirySec":0}"#).unwrap_err();
        assert!(err.to_string().contains("requestExpirySec"));
    }
}
