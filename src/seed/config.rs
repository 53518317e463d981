use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::database_ops::steam::{app_list::DEFAULT_STEAM_WEB_API_BASE, store::DEFAULT_STEAM_STORE_BASE};
use crate::database_ops::steamspy::{DEFAULT_GENRES, DEFAULT_STEAMSPY_BASE, TOP_LISTS};
use super::checkpoint::explicit_checkpoint_path;
use crate::http::cache::DEFAULT_CAPACITY;
use crate::models::AppId;
use crate::util::env::{env_flag, env_list, env_opt, env_parse, split_list};

pub const DEFAULT_CHECKPOINT_FILE: &str = ".seed-checkpoint.json";

/// Everything one seeding run needs, read from the environment and then
/// overridden by CLI flags.
#[derive(Debug, Clone)]
pub struct SeedConfig {
    pub target: usize,
    pub concurrency: usize,
    pub request_interval: Duration,
    pub checkpoint_file: PathBuf,
    pub batch_size: usize,
    pub steamspy_base: String,
    pub steam_web_api_base: String,
    pub steam_store_base: String,
    pub genres: Vec<String>,
    pub top_lists: Vec<String>,
    pub include_web_app_list: bool,
    pub include_steamspy_all: bool,
    pub fetch_release_status: bool,
    pub fetch_retries: u32,
    pub list_retry_delay: Duration,
    pub detail_retry_delay: Duration,
    pub cache_capacity: usize,
    /// Pause between collection sources.
    pub source_delay: Duration,
    /// Explicit ids; collection is skipped when set.
    pub appids: Option<Vec<AppId>>,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            target: 10_000,
            concurrency: 1,
            request_interval: Duration::from_millis(1_200),
            checkpoint_file: PathBuf::from(DEFAULT_CHECKPOINT_FILE),
            batch_size: 250,
            steamspy_base: DEFAULT_STEAMSPY_BASE.to_string(),
            steam_web_api_base: DEFAULT_STEAM_WEB_API_BASE.to_string(),
            steam_store_base: DEFAULT_STEAM_STORE_BASE.to_string(),
            genres: DEFAULT_GENRES.iter().map(|s| s.to_string()).collect(),
            top_lists: TOP_LISTS.iter().map(|s| s.to_string()).collect(),
            include_web_app_list: true,
            include_steamspy_all: true,
            fetch_release_status: false,
            fetch_retries: 3,
            list_retry_delay: Duration::from_millis(1_000),
            detail_retry_delay: Duration::from_millis(500),
            cache_capacity: DEFAULT_CAPACITY,
            source_delay: Duration::from_millis(1_200),
            appids: None,
        }
    }
}

impl SeedConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let request_interval =
            Duration::from_millis(env_parse("REQUEST_INTERVAL_MS", d.request_interval.as_millis() as u64));
        let appids = match env_opt("STEAM_APP_IDS") {
            Some(raw) => Some(parse_appids(&raw)?),
            None => None,
        };
        let cfg = Self {
            target: env_parse("SEED_LIMIT", d.target),
            concurrency: env_parse("CONCURRENCY", d.concurrency),
            request_interval,
            checkpoint_file: env_opt("CHECKPOINT_FILE")
                .map(PathBuf::from)
                .unwrap_or(d.checkpoint_file),
            batch_size: env_parse("BATCH_SIZE", d.batch_size),
            steamspy_base: env_opt("STEAMSPY_BASE").unwrap_or(d.steamspy_base),
            steam_web_api_base: env_opt("STEAM_WEB_API_BASE").unwrap_or(d.steam_web_api_base),
            steam_store_base: env_opt("STEAM_STORE_BASE").unwrap_or(d.steam_store_base),
            genres: env_list("SEED_GENRES").unwrap_or(d.genres),
            top_lists: env_list("SEED_TOP_LISTS").unwrap_or(d.top_lists),
            include_web_app_list: env_flag("SEED_INCLUDE_WEB_APP_LIST", d.include_web_app_list),
            include_steamspy_all: env_flag("SEED_INCLUDE_STEAMSPY_ALL", d.include_steamspy_all),
            fetch_release_status: env_flag("SEED_FETCH_RELEASE_STATUS", d.fetch_release_status),
            fetch_retries: env_parse("FETCH_RETRIES", d.fetch_retries),
            list_retry_delay: Duration::from_millis(env_parse("FETCH_RETRY_DELAY_MS", 1_000u64)),
            detail_retry_delay: Duration::from_millis(env_parse("DETAIL_RETRY_DELAY_MS", 500u64)),
            cache_capacity: env_parse("CACHE_CAPACITY", d.cache_capacity),
            source_delay: request_interval,
            appids,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Where this run keeps its resume state.
    pub fn active_checkpoint_file(&self) -> PathBuf {
        match self.appids {
            Some(_) => explicit_checkpoint_path(&self.checkpoint_file),
            None => self.checkpoint_file.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.target == 0 {
            bail!("SEED_LIMIT must be at least 1");
        }
        if self.batch_size == 0 {
            bail!("BATCH_SIZE must be at least 1");
        }
        if self.concurrency == 0 {
            bail!("CONCURRENCY must be at least 1");
        }
        if self.cache_capacity == 0 {
            bail!("CACHE_CAPACITY must be at least 1");
        }
        Ok(())
    }
}

/// Comma separated app ids; any token that is not a positive id is an error.
pub fn parse_appids(raw: &str) -> Result<Vec<AppId>> {
    let mut out = Vec::new();
    for token in split_list(raw) {
        match AppId::parse(&token) {
            Some(id) => out.push(id),
            None => bail!("invalid app id {token:?}"),
        }
    }
    Ok(out)
}
