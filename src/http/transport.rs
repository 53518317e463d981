//! HTTP port used by the fetcher, plus the reqwest-backed implementation.
use reqwest::{header, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str = "steam-seeder/0.1 (+https://steamspy.com/api.php)";

/// Raw response: status code, body bytes and a parsed `Retry-After` hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub retry_after: Option<Duration>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Other(String),
}

#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<TransportResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self { client })
    }

    fn classify(err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }

    fn retry_after(status: StatusCode, headers: &header::HeaderMap) -> Option<Duration> {
        if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
            return None;
        }
        headers
            .get(header::RETRY_AFTER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        let mut req = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json");
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req.send().await.map_err(|e| Self::classify(&e))?;
        let status = resp.status();
        let retry_after = Self::retry_after(status, resp.headers());
        let body = resp.bytes().await.map_err(|e| Self::classify(&e))?;
        debug!(url, status = status.as_u16(), bytes = body.len(), "http get");
        Ok(TransportResponse {
            status: status.as_u16(),
            body: body.to_vec(),
            retry_after,
        })
    }
}
