//! Token-bucket rate limiting
//!
//! Every caller key owns an independent bucket that refills continuously
//! with elapsed time. Buckets live in a [`DashMap`]; the refill-then-consume
//! step runs while holding the entry's shard lock, so two concurrent requests
//! for the same key can never both spend the last token.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::request::SecurityRequest;
use crate::error::{PipelineError, Result};
use crate::shutdown::ShutdownNotifier;

/// Key used when no caller identity can be derived
pub const UNKNOWN_KEY: &str = "unknown";

/// Longest accepted window or sweep interval (one year)
pub const MAX_WINDOW_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Largest accepted `idle_eviction_factor`
pub const MAX_IDLE_EVICTION_FACTOR: u32 = 1_000;

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether to enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Length of the window in which `max_requests` may be spent
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Bucket capacity; also the number of tokens refilled per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// How the caller key is derived from the request
    #[serde(default)]
    pub key_strategy: KeyStrategy,

    /// Per actor-class quotas overriding the default one
    #[serde(default)]
    pub class_quotas: HashMap<String, WindowQuota>,

    /// Idle buckets are evicted after this many full-refill periods
    #[serde(default = "default_idle_eviction_factor")]
    pub idle_eviction_factor: u32,

    /// Interval of the background sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_enabled() -> bool { true }
fn default_window_seconds() -> u64 { 60 }
fn default_max_requests() -> u32 { 100 }
fn default_idle_eviction_factor() -> u32 { 2 }
fn default_sweep_interval() -> u64 { 60 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            window_seconds: default_window_seconds(),
            max_requests: default_max_requests(),
            key_strategy: KeyStrategy::default(),
            class_quotas: HashMap::new(),
            idle_eviction_factor: default_idle_eviction_factor(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Quota expressed the way operators configure it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowQuota {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl WindowQuota {
    pub fn to_quota(self) -> Result<Quota> {
        if self.max_requests == 0 {
            return Err(PipelineError::config(
                "Rate limit max_requests must be greater than 0",
            ));
        }
        if self.window_seconds == 0 {
            return Err(PipelineError::config(
                "Rate limit window_seconds must be greater than 0",
            ));
        }
        if self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(PipelineError::config(format!(
                "Rate limit window_seconds must be at most {}",
                MAX_WINDOW_SECONDS
            )));
        }
        Ok(Quota {
            capacity: self.max_requests,
            refill_per_second: self.max_requests as f64 / self.window_seconds as f64,
        })
    }
}

/// Bucket parameters: capacity and continuous refill rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl Quota {
    pub fn new(capacity: u32, refill_per_second: f64) -> Result<Self> {
        if capacity == 0 {
            return Err(PipelineError::config("Bucket capacity must be greater than 0"));
        }
        if !(refill_per_second.is_finite() && refill_per_second > 0.0) {
            return Err(PipelineError::config("Bucket refill rate must be positive"));
        }
        Ok(Self { capacity, refill_per_second })
    }

    /// Time for an empty bucket to become full again
    pub fn full_refill(&self) -> Duration {
        saturating_secs(self.capacity as f64 / self.refill_per_second)
    }
}

/// `Duration` from float seconds, clamped to `Duration::MAX` instead of
/// panicking on overflow
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 { Duration::MAX } else { Duration::ZERO })
}

/// How the limiter identifies a caller
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Client IP address
    #[default]
    Ip,
    /// Authenticated principal id (class = actor kind), falling back to IP
    Principal,
    /// Value of a request header such as an API key id, falling back to IP
    Header { name: String },
}

/// Caller identity plus the optional class used to pick a quota
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub id: String,
    pub class: Option<String>,
}

impl RateLimitKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), class: None }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// Empty or whitespace-only ids collapse onto the shared unknown bucket
    fn normalized_id(&self) -> &str {
        let id = self.id.trim();
        if id.is_empty() {
            UNKNOWN_KEY
        } else {
            id
        }
    }
}

impl KeyStrategy {
    pub fn derive(&self, req: &SecurityRequest) -> RateLimitKey {
        let ip_key = || {
            req.client_ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| UNKNOWN_KEY.to_string())
        };

        match self {
            KeyStrategy::Ip => RateLimitKey::new(ip_key()),
            KeyStrategy::Principal => match &req.principal {
                Some(principal) => RateLimitKey::new(format!("principal:{}", principal.id))
                    .with_class(principal.kind.as_str()),
                None => RateLimitKey::new(ip_key()).with_class("anonymous"),
            },
            KeyStrategy::Header { name } => req
                .headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.trim().is_empty())
                .map(|v| RateLimitKey::new(format!("header:{}", v.trim())))
                .unwrap_or_else(|| RateLimitKey::new(ip_key())),
        }
    }
}

/// A single token bucket
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: u32,
    refill_per_second: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Buckets start full
    pub fn new(quota: Quota, now: Instant) -> Self {
        Self {
            tokens: quota.capacity as f64,
            capacity: quota.capacity,
            refill_per_second: quota.refill_per_second,
            last_refill: now,
        }
    }

    /// Add `elapsed * rate` tokens, capped at capacity
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity as f64);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Refill, then spend `cost` tokens if available; tokens are left
    /// untouched on failure
    pub fn try_consume(&mut self, cost: u32, now: Instant) -> bool {
        self.refill(now);
        let cost = cost as f64;
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Time until `cost` tokens will be available
    pub fn retry_after(&self, cost: u32) -> Duration {
        let missing = (cost as f64 - self.tokens).max(0.0);
        saturating_secs(missing / self.refill_per_second)
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }

    fn reshape(&mut self, quota: Quota) {
        if self.capacity != quota.capacity || self.refill_per_second != quota.refill_per_second {
            self.capacity = quota.capacity;
            self.refill_per_second = quota.refill_per_second;
            self.tokens = self.tokens.min(quota.capacity as f64);
        }
    }
}

/// Outcome of an admitted request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
}

/// Rate limiter keyed by caller identity
pub struct RateLimiter {
    config: RateLimitConfig,
    default_quota: Quota,
    class_quotas: HashMap<String, Quota>,
    buckets: Arc<DashMap<String, TokenBucket>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new rate limiter; rejects non-positive quotas
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a rate limiter reading time from `clock`
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.idle_eviction_factor == 0 || config.idle_eviction_factor > MAX_IDLE_EVICTION_FACTOR {
            return Err(PipelineError::config(format!(
                "Rate limit idle_eviction_factor must be between 1 and {}",
                MAX_IDLE_EVICTION_FACTOR
            )));
        }
        if config.sweep_interval_secs > MAX_WINDOW_SECONDS {
            return Err(PipelineError::config(format!(
                "Rate limit sweep_interval_secs must be at most {}",
                MAX_WINDOW_SECONDS
            )));
        }

        let default_quota = WindowQuota {
            max_requests: config.max_requests,
            window_seconds: config.window_seconds,
        }
        .to_quota()?;

        let class_quotas = config
            .class_quotas
            .iter()
            .map(|(class, quota)| {
                quota.to_quota().map(|q| (class.clone(), q)).map_err(|e| {
                    PipelineError::config(format!("Invalid quota for class '{}': {}", class, e))
                })
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            config,
            default_quota,
            class_quotas,
            buckets: Arc::new(DashMap::new()),
            clock,
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Quota applying to an actor class
    pub fn quota_for(&self, class: Option<&str>) -> Quota {
        class
            .and_then(|c| self.class_quotas.get(c))
            .copied()
            .unwrap_or(self.default_quota)
    }

    /// Spend `cost` tokens from `key`'s default-quota bucket
    pub fn try_consume(&self, key: &str, cost: u32) -> bool {
        self.check(&RateLimitKey::new(key), cost).is_ok()
    }

    /// Check and consume for a derived key
    pub fn check(&self, key: &RateLimitKey, cost: u32) -> std::result::Result<RateLimitStatus, RateLimitError> {
        let quota = self.quota_for(key.class.as_deref());
        if !self.config.enabled {
            return Ok(RateLimitStatus {
                limit: quota.capacity,
                remaining: quota.capacity,
            });
        }

        let now = self.clock.now();
        let id = key.normalized_id();

        let mut entry = self
            .buckets
            .entry(id.to_string())
            .or_insert_with(|| TokenBucket::new(quota, now));
        let bucket = entry.value_mut();
        bucket.reshape(quota);

        if bucket.try_consume(cost, now) {
            let remaining = bucket.tokens().floor() as u32;
            debug!(client = %id, remaining, limit = quota.capacity, "Request allowed");
            Ok(RateLimitStatus {
                limit: quota.capacity,
                remaining,
            })
        } else {
            let retry_after = if cost > quota.capacity {
                quota.full_refill()
            } else {
                bucket.retry_after(cost)
            };
            warn!(
                client = %id,
                limit = quota.capacity,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            Err(RateLimitError::LimitExceeded {
                retry_after,
                limit: quota.capacity,
            })
        }
    }

    /// Tokens currently available to a key, refilled to now
    pub fn remaining(&self, key: &str) -> Option<f64> {
        let now = self.clock.now();
        self.buckets.get_mut(key).map(|mut bucket| {
            bucket.refill(now);
            bucket.tokens()
        })
    }

    /// Reset rate limit for a client
    pub fn reset(&self, key: &str) {
        self.buckets.remove(key);
        debug!("Rate limit reset for client: {}", key);
    }

    /// Evict buckets idle for longer than `idle_eviction_factor` full-refill
    /// periods. Such a bucket is full again, so dropping it loses nothing.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let factor = self.config.idle_eviction_factor.max(1);
        let before = self.buckets.len();

        self.buckets.retain(|_, bucket| {
            let full_refill = saturating_secs(bucket.capacity as f64 / bucket.refill_per_second);
            let idle_limit = full_refill.checked_mul(factor).unwrap_or(Duration::MAX);
            now.saturating_duration_since(bucket.last_refill) < idle_limit
        });

        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            debug!("Evicted {} idle rate limit buckets", evicted);
        }
        evicted
    }

    /// Start the background sweep; stops when `shutdown` fires
    pub fn start_sweep_task(self: Arc<Self>, mut shutdown: ShutdownNotifier) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep_idle();
                    }
                    _ = shutdown.wait() => {
                        info!("Rate limit sweep task stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Get statistics
    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            tracked_keys: self.buckets.len(),
            default_capacity: self.default_quota.capacity,
            refill_per_second: self.default_quota.refill_per_second,
        }
    }
}

/// Rate limit error
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded. Retry after {retry_after:?}. Limit: {limit} requests")]
    LimitExceeded {
        retry_after: Duration,
        limit: u32,
    },
}

/// Rate limit statistics
#[derive(Debug, Clone)]
pub struct RateLimitStats {
    pub tracked_keys: usize,
    pub default_capacity: u32,
    pub refill_per_second: f64,
}
