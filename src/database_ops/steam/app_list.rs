use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::database_ops::ProviderError;
use crate::http::{FetchOptions, RateLimiter, ResilientFetcher};
use crate::models::{AppId, DecodeError};

pub const DEFAULT_STEAM_WEB_API_BASE: &str = "https://api.steampowered.com";

#[derive(Debug, Deserialize)]
struct AppListResp {
    applist: AppList,
}
#[derive(Debug, Deserialize)]
struct AppList {
    #[serde(default)]
    apps: Vec<AppEntry>,
}
#[derive(Debug, Deserialize)]
struct AppEntry {
    appid: i64,
}

/// Ids from `ISteamApps/GetAppList/v2`, positive only, ascending and unique.
pub fn parse_steam_app_list(body: Value) -> Result<Vec<AppId>, DecodeError> {
    let resp: AppListResp = serde_json::from_value(body)
        .map_err(|e| DecodeError::new("steam app list", e.to_string()))?;
    let ids: BTreeSet<AppId> = resp
        .applist
        .apps
        .into_iter()
        .filter_map(|a| AppId::new(a.appid))
        .collect();
    Ok(ids.into_iter().collect())
}

pub struct SteamWebClient {
    base: String,
    fetcher: Arc<ResilientFetcher>,
    limiter: Arc<RateLimiter>,
    options: FetchOptions,
}

impl SteamWebClient {
    pub fn new(base: impl Into<String>, fetcher: Arc<ResilientFetcher>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            fetcher,
            limiter,
            // the full catalog is tens of MB; not worth holding in the cache
            options: FetchOptions::default().no_cache(),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options.no_cache();
        self
    }

    pub async fn app_list(&self) -> Result<Vec<AppId>, ProviderError> {
        let url = format!("{}/ISteamApps/GetAppList/v2/", self.base);
        let body = self
            .fetcher
            .fetch_json_limited(&url, &self.options, &[self.limiter.as_ref()])
            .await?;
        Ok(parse_steam_app_list(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalog_ids_sorted_unique_positive() {
        let body = json!({"applist": {"apps": [
            {"appid": 730, "name": "Counter-Strike 2"},
            {"appid": 0, "name": ""},
            {"appid": 10, "name": "Counter-Strike"},
            {"appid": 730, "name": "dup"}
        ]}});
        let ids: Vec<u32> = parse_steam_app_list(body).unwrap().into_iter().map(AppId::get).collect();
        assert_eq!(ids, vec![10, 730]);
    }

    #[test]
    fn missing_applist_is_decode_error() {
        assert!(parse_steam_app_list(json!({"response": {}})).is_err());
        assert!(parse_steam_app_list(json!({"applist": {}})).unwrap().is_empty());
    }
}
