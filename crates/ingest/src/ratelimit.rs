//! Sliding-window rate limiting backed by the cache store
//!
//! Each client IP gets a sorted-set window in the cache store; the request
//! count inside the window decides acceptance. When the cache store is
//! unreachable the limiter fails open with a structured warning - losing
//! rate limiting is preferable to dropping webhooks.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use langhook_config::RateLimitSpec;
use thiserror::Error;

/// Cache store failure; the limiter treats these as fail-open
#[derive(Debug, Error)]
#[error("cache unavailable: {0}")]
pub struct RateStoreError(String);

impl From<redis::RedisError> for RateStoreError {
    fn from(err: redis::RedisError) -> Self {
        Self(err.to_string())
    }
}

/// Outcome of one rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// How long until the oldest window entry expires, when blocked
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    pub const ALLOW: Self = Self {
        allowed: true,
        retry_after: None,
    };
}

/// Sliding-window counter backend
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Record a hit for `key` and decide whether it fits the window
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, RateStoreError>;
}

/// Redis-backed sliding window
///
/// The connection is established lazily and re-established per hit after a
/// failure, so a cache outage degrades to fail-open instead of pinning the
/// process to a dead connection.
pub struct RedisRateStore {
    client: redis::Client,
    manager: tokio::sync::Mutex<Option<redis::aio::ConnectionManager>>,
    seq: AtomicU64,
}

impl RedisRateStore {
    pub fn connect(url: &str) -> Result<Self, RateStoreError> {
        let client = redis::Client::open(url).map_err(RateStoreError::from)?;
        Ok(Self {
            client,
            manager: tokio::sync::Mutex::new(None),
            seq: AtomicU64::new(0),
        })
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, RateStoreError> {
        let mut guard = self.manager.lock().await;
        if let Some(manager) = guard.as_ref() {
            return Ok(manager.clone());
        }
        let manager = self.client.get_connection_manager().await?;
        *guard = Some(manager.clone());
        Ok(manager)
    }

    /// Cheap reachability probe
    pub async fn ping(&self) -> Result<(), RateStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RateStore for RedisRateStore {
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, RateStoreError> {
        let mut conn = self.connection().await?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_ms = window.as_millis() as i64;
        let cutoff = now_ms - window_ms;
        let member = format!(
            "{}-{}",
            now_ms,
            self.seq.fetch_add(1, Ordering::Relaxed)
        );

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrembyscore(key, 0, cutoff)
            .ignore()
            .zadd(key, &member, now_ms)
            .ignore()
            .zcard(key)
            .expire(key, window.as_secs() as i64 + 1)
            .ignore();

        let (count,): (u64,) = pipe.query_async(&mut conn).await?;

        if count <= u64::from(limit) {
            return Ok(RateDecision::ALLOW);
        }

        // over the limit: drop our own entry and report when a slot frees
        let _: () = redis::cmd("ZREM")
            .arg(key)
            .arg(&member)
            .query_async(&mut conn)
            .await?;

        let oldest: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        let retry_after = oldest
            .first()
            .map(|(_, score)| {
                let expires_at = *score as i64 + window_ms;
                Duration::from_millis(expires_at.saturating_sub(now_ms).max(0) as u64)
            })
            .unwrap_or(window);

        Ok(RateDecision {
            allowed: false,
            retry_after: Some(retry_after),
        })
    }
}

/// In-process sliding window, used by tests and single-node setups
pub struct MemoryRateStore {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, RateStoreError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();
        let entries = windows.entry(key.to_string()).or_default();

        while let Some(front) = entries.front() {
            if *front + window <= now {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= limit as usize {
            let retry_after = entries
                .front()
                .map(|front| (*front + window).saturating_duration_since(now));
            return Ok(RateDecision {
                allowed: false,
                retry_after,
            });
        }

        entries.push_back(now);
        Ok(RateDecision::ALLOW)
    }
}

/// A store that always fails, for exercising the fail-open path
#[cfg(test)]
pub struct BrokenRateStore;

#[cfg(test)]
#[async_trait]
impl RateStore for BrokenRateStore {
    async fn hit(
        &self,
        _key: &str,
        _limit: u32,
        _window: Duration,
    ) -> Result<RateDecision, RateStoreError> {
        Err(RateStoreError("connection refused".into()))
    }
}

/// Per-source-IP rate limiter
pub struct RateLimiter {
    store: std::sync::Arc<dyn RateStore>,
    spec: RateLimitSpec,
}

impl RateLimiter {
    pub fn new(store: std::sync::Arc<dyn RateStore>, spec: RateLimitSpec) -> Self {
        Self { store, spec }
    }

    /// Check one request from `ip`; cache outages fail open
    pub async fn check(&self, ip: IpAddr) -> RateDecision {
        let key = format!("ratelimit:{}", ip);
        match self
            .store
            .hit(&key, self.spec.limit, self.spec.window)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "cache store unavailable, rate limiting fails open");
                RateDecision::ALLOW
            }
        }
    }
}
