use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::database_ops::ProviderError;
use crate::http::{FetchOptions, RateLimiter, ResilientFetcher};
use crate::models::{AppId, DecodeError, ReleaseStatus};

pub const DEFAULT_STEAM_STORE_BASE: &str = "https://store.steampowered.com/api";

/// Release status rarely changes within a run.
const RELEASE_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Deserialize)]
struct AppDetailsWrapper {
    #[serde(default)]
    success: bool,
    data: Option<AppData>,
}

#[derive(Debug, Deserialize)]
struct AppData {
    release_date: Option<ReleaseDate>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDate {
    #[serde(default)]
    coming_soon: bool,
    #[serde(default)]
    date: String,
}

/// `{"<appid>": {success, data: {release_date: {coming_soon, date}}}}`.
/// Unknown apps (`success: false`, missing entry or no release block) yield `None`.
pub fn parse_release_status(appid: AppId, body: &Value) -> Result<Option<ReleaseStatus>, DecodeError> {
    let Some(entry) = body.get(appid.to_string()) else {
        return Ok(None);
    };
    let wrapper = AppDetailsWrapper::deserialize(entry)
        .map_err(|e| DecodeError::new("steam store appdetails", e.to_string()))?;
    if !wrapper.success {
        return Ok(None);
    }
    Ok(wrapper
        .data
        .and_then(|d| d.release_date)
        .map(|r| ReleaseStatus {
            coming_soon: r.coming_soon,
            date: r.date,
        }))
}

pub struct SteamStoreClient {
    base: String,
    fetcher: Arc<ResilientFetcher>,
    limiter: Arc<RateLimiter>,
    options: FetchOptions,
    country: String,
    language: String,
}

impl SteamStoreClient {
    pub fn new(base: impl Into<String>, fetcher: Arc<ResilientFetcher>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            fetcher,
            limiter,
            options: FetchOptions::default().with_cache_ttl(RELEASE_CACHE_TTL),
            country: "us".into(),
            language: "english".into(),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options.with_cache_ttl(RELEASE_CACHE_TTL);
        self
    }

    pub async fn release_status(&self, appid: AppId) -> Result<Option<ReleaseStatus>, ProviderError> {
        let url = format!(
            "{}/appdetails?appids={}&cc={}&l={}",
            self.base, appid, self.country, self.language
        );
        let body = self
            .fetcher
            .fetch_json_limited(&url, &self.options, &[self.limiter.as_ref()])
            .await?;
        Ok(parse_release_status(appid, &body)?)
    }
}
