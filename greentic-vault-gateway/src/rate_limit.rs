//! Token-bucket limiter for traffic arriving from DON nodes.
//!
//! A message must fit both the global bucket and its sender's bucket. Each
//! sender's bucket has its own lock so busy senders do not contend with each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};

use crate::config::RateLimiterConfig;

#[derive(Debug)]
struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate: f64, burst: u32, now: Instant) -> Self {
        let capacity = f64::from(burst);
        Self {
            rate,
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refund(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }
}

#[derive(Debug)]
pub struct NodeRateLimiter {
    config: RateLimiterConfig,
    global: Mutex<TokenBucket>,
    senders: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl NodeRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            global: Mutex::new(TokenBucket::new(
                config.global_rps,
                config.global_burst,
                Instant::now(),
            )),
            config,
            senders: RwLock::new(HashMap::new()),
        })
    }

    /// Consumes one token for `sender`; false means the message must be dropped.
    pub fn allow(&self, sender: &str) -> bool {
        self.allow_at(sender, Instant::now())
    }

    pub(crate) fn allow_at(&self, sender: &str, now: Instant) -> bool {
        if !self.global.lock().try_take(now) {
            return false;
        }

        let bucket = self.sender_bucket(sender, now);
        if bucket.lock().try_take(now) {
            return true;
        }
        // The sender's own budget blocked it; the global token was never used.
        self.global.lock().refund();
        false
    }

    fn sender_bucket(&self, sender: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.senders.read().get(sender) {
            return bucket.clone();
        }
        self.senders
            .write()
            .entry(sender.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket::new(
                    self.config.per_sender_rps,
                    self.config.per_sender_burst,
                    now,
                )))
            })
            .clone()
    }
}
