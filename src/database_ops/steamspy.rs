use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::lenient::{opt_i64, opt_string, tag_map};
use super::ProviderError;
use crate::http::{FetchOptions, RateLimiter, ResilientFetcher};
use crate::models::{AppId, DecodeError, DetailRecord};
use crate::normalization::owners::owners_midpoint;

pub const DEFAULT_STEAMSPY_BASE: &str = "https://steamspy.com/api.php";

pub const TOP_LISTS: [&str; 3] = ["top100owned", "top100in2weeks", "top100forever"];

pub const DEFAULT_GENRES: [&str; 9] = [
    "Action",
    "Adventure",
    "Casual",
    "Indie",
    "RPG",
    "Simulation",
    "Sports",
    "Strategy",
    "Early Access",
];

/// `request=all` is heavy; keep it around for a while once fetched.
const ALL_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Ids from a list endpoint (`{"570": {...}, "730": {...}}`), ascending.
pub fn parse_app_list(body: &Value) -> Result<Vec<AppId>, DecodeError> {
    match body {
        Value::Object(map) => {
            let ids: BTreeSet<AppId> = map.keys().filter_map(|k| AppId::parse(k)).collect();
            Ok(ids.into_iter().collect())
        }
        // SteamSpy answers `[]` for an empty genre
        Value::Array(items) if items.is_empty() => Ok(Vec::new()),
        other => Err(DecodeError::new(
            "steamspy list",
            format!("expected an object keyed by appid, got {}", json_kind(other)),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct AppDetails {
    #[serde(default, deserialize_with = "opt_i64")]
    appid: Option<i64>,
    #[serde(default, deserialize_with = "opt_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    developer: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    publisher: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    owners: Option<String>,
    #[serde(default, deserialize_with = "opt_i64")]
    average_forever: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    average_2weeks: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    median_forever: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    median_2weeks: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    ccu: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    price: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    initialprice: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    discount: Option<i64>,
    #[serde(default, deserialize_with = "opt_string")]
    languages: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    genre: Option<String>,
    #[serde(default, deserialize_with = "tag_map")]
    tags: BTreeMap<String, i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    positive: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    negative: Option<i64>,
    #[serde(default, deserialize_with = "opt_string")]
    score_rank: Option<String>,
    #[serde(default, deserialize_with = "opt_i64")]
    userscore: Option<i64>,
}

/// Decode an `appdetails` payload. `Ok(None)` is the "no such app" sentinel
/// SteamSpy returns as a record with a missing or zero appid.
pub fn parse_app_details(
    requested: AppId,
    body: Value,
    fetched_at: DateTime<Utc>,
) -> Result<Option<DetailRecord>, DecodeError> {
    if !body.is_object() {
        return Err(DecodeError::new(
            "steamspy appdetails",
            format!("expected an object, got {}", json_kind(&body)),
        ));
    }
    let raw: AppDetails = serde_json::from_value(body)
        .map_err(|e| DecodeError::new("steamspy appdetails", e.to_string()))?;
    let Some(appid) = raw.appid.and_then(AppId::new) else {
        return Ok(None);
    };
    if appid != requested {
        debug!(%requested, returned = %appid, "steamspy returned a different appid");
    }
    let owners_mid = raw.owners.as_deref().and_then(owners_midpoint);
    Ok(Some(DetailRecord {
        appid,
        name: raw.name.unwrap_or_else(|| format!("Unknown ({appid})")),
        developer: raw.developer,
        publisher: raw.publisher,
        owners: raw.owners,
        owners_midpoint: owners_mid,
        average_forever: raw.average_forever.unwrap_or(0),
        average_2weeks: raw.average_2weeks.unwrap_or(0),
        median_forever: raw.median_forever.unwrap_or(0),
        median_2weeks: raw.median_2weeks.unwrap_or(0),
        ccu: raw.ccu.unwrap_or(0),
        price: raw.price,
        initial_price: raw.initialprice,
        discount: raw.discount,
        languages: raw.languages,
        genre: raw.genre,
        tags: raw.tags,
        positive: raw.positive.unwrap_or(0),
        negative: raw.negative.unwrap_or(0),
        score_rank: raw.score_rank,
        userscore: raw.userscore,
        release: None,
        updated_at: fetched_at,
    }))
}

pub(crate) fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// SteamSpy API client. `request=all` goes through its own, much slower limiter.
pub struct SteamSpyClient {
    base: String,
    fetcher: Arc<ResilientFetcher>,
    limiter: Arc<RateLimiter>,
    all_limiter: Arc<RateLimiter>,
    list_options: FetchOptions,
    detail_options: FetchOptions,
}

impl SteamSpyClient {
    pub fn new(
        base: impl Into<String>,
        fetcher: Arc<ResilientFetcher>,
        limiter: Arc<RateLimiter>,
        all_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            fetcher,
            limiter,
            all_limiter,
            list_options: FetchOptions::default(),
            detail_options: FetchOptions::default().with_retry_delay(Duration::from_millis(500)),
        }
    }

    pub fn with_list_options(mut self, options: FetchOptions) -> Self {
        self.list_options = options;
        self
    }

    pub fn with_detail_options(mut self, options: FetchOptions) -> Self {
        self.detail_options = options;
        self
    }

    async fn get(&self, url: &str, options: &FetchOptions) -> Result<Value, ProviderError> {
        debug!(url, "steamspy request");
        Ok(self.fetcher.fetch_json_limited(url, options, &[self.limiter.as_ref()]).await?)
    }

    /// One of the curated lists, e.g. `top100owned`.
    pub async fn top_list(&self, list: &str) -> Result<Vec<AppId>, ProviderError> {
        let url = format!("{}?request={}", self.base, urlencoding::encode(list));
        let body = self.get(&url, &self.list_options).await?;
        Ok(parse_app_list(&body)?)
    }

    pub async fn genre(&self, genre: &str) -> Result<Vec<AppId>, ProviderError> {
        let url = format!("{}?request=genre&genre={}", self.base, urlencoding::encode(genre));
        let body = self.get(&url, &self.list_options).await?;
        Ok(parse_app_list(&body)?)
    }

    /// Every app SteamSpy knows about (first page).
    pub async fn all(&self) -> Result<Vec<AppId>, ProviderError> {
        let url = format!("{}?request=all", self.base);
        let options = self.list_options.clone().with_cache_ttl(ALL_CACHE_TTL);
        debug!(url, "steamspy request");
        let body = self
            .fetcher
            .fetch_json_limited(&url, &options, &[self.all_limiter.as_ref(), self.limiter.as_ref()])
            .await?;
        Ok(parse_app_list(&body)?)
    }

    pub async fn app_details(&self, appid: AppId) -> Result<Option<DetailRecord>, ProviderError> {
        let url = format!("{}?request=appdetails&appid={}", self.base, appid);
        let body = self.get(&url, &self.detail_options).await?;
        Ok(parse_app_details(appid, body, Utc::now())?)
    }
}
