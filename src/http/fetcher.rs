//! Retrying, caching JSON fetcher shared by every external call.
use super::cache::TtlCache;
use super::rate_limit::RateLimiter;
use super::transport::{HttpTransport, TransportError};
use rand::Rng;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2_000);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound of the random jitter, as a fraction of the exponential delay.
const JITTER_RATIO: f64 = 0.3;
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub retries: u32,
    pub retry_delay: Duration,
    /// Zero disables caching for this call.
    pub cache_ttl: Duration,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            cache_ttl: DEFAULT_CACHE_TTL,
            timeout: DEFAULT_TIMEOUT,
            headers: Vec::new(),
        }
    }
}

impl FetchOptions {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn no_cache(self) -> Self {
        self.with_cache_ttl(Duration::ZERO)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Cache key: URL plus the serialized request-shaping options.
    fn fingerprint(&self, url: &str) -> String {
        let headers = serde_json::to_string(&self.headers).unwrap_or_default();
        format!("{url}-{headers}")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("http status {status}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("response body is not valid json: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct FetchCounters {
    attempts: AtomicU64,
    backoff_sleeps: AtomicU64,
    cache_hits: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub attempts: u64,
    pub backoff_sleeps: u64,
    pub cache_hits: u64,
    pub failures: u64,
}

/// `base * 2^attempt` plus up to 30% jitter; a larger `Retry-After` hint wins.
pub fn backoff_delay(base: Duration, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.min(MAX_BACKOFF_EXPONENT)));
    let jitter = exp.mul_f64(rand::thread_rng().gen_range(0.0..JITTER_RATIO));
    let delay = exp.saturating_add(jitter);
    match retry_after {
        Some(hint) if hint > delay => hint.min(MAX_RETRY_AFTER).max(delay),
        _ => delay,
    }
}

fn decode_body(body: &[u8]) -> Result<Value, FetchError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))
}

pub struct ResilientFetcher {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<TtlCache<Value>>,
    counters: FetchCounters,
}

impl ResilientFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, cache: Arc<TtlCache<Value>>) -> Self {
        Self {
            transport,
            cache,
            counters: FetchCounters::default(),
        }
    }

    pub fn cache(&self) -> &Arc<TtlCache<Value>> {
        &self.cache
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            backoff_sleeps: self.counters.backoff_sleeps.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// GET `url` and decode the body as JSON.
    ///
    /// Timeouts, non-2xx statuses, transport failures and undecodable bodies all
    /// share one backoff ladder; `options.retries + 1` attempts are made before
    /// the last error is returned.
    pub async fn fetch_json(&self, url: &str, options: &FetchOptions) -> Result<Value, FetchError> {
        self.fetch_json_limited(url, options, &[]).await
    }

    /// Like [`fetch_json`](Self::fetch_json), but every request that goes out,
    /// retries included, first takes a token from each of `limiters`.
    /// Cache hits take none.
    pub async fn fetch_json_limited(
        &self,
        url: &str,
        options: &FetchOptions,
        limiters: &[&RateLimiter],
    ) -> Result<Value, FetchError> {
        let caching = !options.cache_ttl.is_zero();
        let key = options.fingerprint(url);
        if caching {
            if let Some(hit) = self.cache.get(&key) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(url, "cache hit");
                return Ok(hit);
            }
        }

        let total = options.retries.saturating_add(1);
        let mut attempt: u32 = 0;
        loop {
            for limiter in limiters {
                limiter.acquire().await;
            }
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            debug!(url, attempt = attempt + 1, total, "fetching");
            let err = match self.attempt(url, options).await {
                Ok(value) => {
                    if caching {
                        self.cache.set(key, value.clone(), options.cache_ttl);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt >= options.retries {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(url, attempts = total, error = %err, "fetch failed after retries");
                return Err(err);
            }

            let delay = backoff_delay(options.retry_delay, attempt, err.retry_after());
            warn!(
                url,
                attempt = attempt + 1,
                total,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "retryable fetch failure; backing off"
            );
            self.counters.backoff_sleeps.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &str, options: &FetchOptions) -> Result<Value, FetchError> {
        let call = self.transport.get(url, &options.headers);
        let response = match tokio::time::timeout(options.timeout, call).await {
            Err(_) | Ok(Err(TransportError::Timeout)) => {
                return Err(FetchError::Timeout(options.timeout))
            }
            Ok(Err(e)) => return Err(FetchError::Transport(e.to_string())),
            Ok(Ok(resp)) => resp,
        };
        if !response.is_success() {
            return Err(FetchError::Status {
                status: response.status,
                retry_after: response.retry_after,
            });
        }
        decode_body(&response.body)
    }
}
