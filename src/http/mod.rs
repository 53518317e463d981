//! Resilient fetch primitives: TTL cache, token-bucket limiter, retrying fetcher.
pub mod cache;
pub mod fetcher;
pub mod rate_limit;
pub mod transport;

pub use cache::TtlCache;
pub use fetcher::{FetchError, FetchOptions, FetchStats, ResilientFetcher};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use transport::{HttpTransport, ReqwestTransport, TransportError, TransportResponse};
