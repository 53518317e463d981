//! Two-phase seeding: collect app ids from the catalog sources, then fetch
//! details and upsert them in checkpointed batches.
pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod details;
pub mod pipeline;
pub mod upsert;

pub use checkpoint::{explicit_checkpoint_path, Checkpoint, CheckpointStore, Stage};
pub use collector::{IdCollector, IdSource, SteamAppListSource, SteamSpyIdSource, SteamSpyQuery};
pub use config::SeedConfig;
pub use details::{DetailError, DetailFetcher, DetailSource};
pub use pipeline::{PipelineSettings, SeedSummary, SeedingPipeline};
pub use upsert::{BatchUpserter, UpsertOutcome};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::database_ops::games_store::GameStore;
use crate::database_ops::steam::{SteamStoreClient, SteamWebClient};
use crate::database_ops::steamspy::SteamSpyClient;
use crate::http::transport::DEFAULT_USER_AGENT;
use crate::http::{FetchOptions, HttpTransport, RateLimiter, ReqwestTransport, ResilientFetcher, TtlCache};

/// Per-API token buckets: (capacity, refill per second).
const STEAMSPY_RATE: (u32, f64) = (1, 1.0);
const STEAMSPY_ALL_RATE: (u32, f64) = (1, 1.0 / 60.0);
const STEAM_WEB_RATE: (u32, f64) = (1, 1.0);
const STEAM_STORE_RATE: (u32, f64) = (200, 0.66);

fn limiter((capacity, refill): (u32, f64)) -> Result<Arc<RateLimiter>> {
    Ok(Arc::new(RateLimiter::new(capacity, refill)?))
}

/// Clients shared by the pipeline and the standalone CLI lookups.
pub struct Clients {
    pub fetcher: Arc<ResilientFetcher>,
    pub steamspy: Arc<SteamSpyClient>,
    pub steam_web: Arc<SteamWebClient>,
    pub steam_store: Arc<SteamStoreClient>,
}

impl Clients {
    pub fn from_config(config: &SeedConfig) -> Result<Self> {
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(DEFAULT_USER_AGENT).context("build http client")?);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: &SeedConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let cache = Arc::new(TtlCache::new(config.cache_capacity));
        let fetcher = Arc::new(ResilientFetcher::new(transport, cache));

        let list_options = FetchOptions::default()
            .with_retries(config.fetch_retries)
            .with_retry_delay(config.list_retry_delay);
        let detail_options = FetchOptions::default()
            .with_retries(config.fetch_retries)
            .with_retry_delay(config.detail_retry_delay);

        let steamspy = SteamSpyClient::new(
            &config.steamspy_base,
            fetcher.clone(),
            limiter(STEAMSPY_RATE)?,
            limiter(STEAMSPY_ALL_RATE)?,
        )
        .with_list_options(list_options.clone())
        .with_detail_options(detail_options.clone());
        let steam_web = SteamWebClient::new(&config.steam_web_api_base, fetcher.clone(), limiter(STEAM_WEB_RATE)?)
            .with_options(list_options);
        let steam_store =
            SteamStoreClient::new(&config.steam_store_base, fetcher.clone(), limiter(STEAM_STORE_RATE)?)
                .with_options(detail_options);

        Ok(Self {
            fetcher,
            steamspy: Arc::new(steamspy),
            steam_web: Arc::new(steam_web),
            steam_store: Arc::new(steam_store),
        })
    }

    /// Catalog sources in query order; `request=all` always goes last.
    pub fn sources(&self, config: &SeedConfig) -> Vec<Arc<dyn IdSource>> {
        let mut sources: Vec<Arc<dyn IdSource>> = Vec::new();
        for list in &config.top_lists {
            sources.push(Arc::new(SteamSpyIdSource::new(
                self.steamspy.clone(),
                SteamSpyQuery::TopList(list.clone()),
            )));
        }
        for genre in &config.genres {
            sources.push(Arc::new(SteamSpyIdSource::new(
                self.steamspy.clone(),
                SteamSpyQuery::Genre(genre.clone()),
            )));
        }
        if config.include_web_app_list {
            sources.push(Arc::new(SteamAppListSource::new(self.steam_web.clone())));
        }
        if config.include_steamspy_all {
            sources.push(Arc::new(SteamSpyIdSource::new(self.steamspy.clone(), SteamSpyQuery::All)));
        }
        sources
    }

    pub fn detail_source(&self, config: &SeedConfig) -> Arc<dyn DetailSource> {
        let fetcher = DetailFetcher::new(self.steamspy.clone());
        if config.fetch_release_status {
            Arc::new(fetcher.with_release_status(self.steam_store.clone()))
        } else {
            Arc::new(fetcher)
        }
    }
}

/// Build the whole pipeline for `config`, writing into `store`.
pub fn assemble(config: &SeedConfig, store: Arc<dyn GameStore>) -> Result<SeedingPipeline> {
    config.validate()?;
    let clients = Clients::from_config(config)?;
    Ok(assemble_with(config, &clients, store))
}

pub fn assemble_with(config: &SeedConfig, clients: &Clients, store: Arc<dyn GameStore>) -> SeedingPipeline {
    let sources = clients.sources(config);
    info!(
        sources = sources.len(),
        limit = config.target,
        release_status = config.fetch_release_status,
        "pipeline assembled"
    );
    SeedingPipeline::new(
        IdCollector::new(sources, config.source_delay, config.target),
        clients.detail_source(config),
        BatchUpserter::new(store),
        CheckpointStore::new(config.active_checkpoint_file()),
        PipelineSettings::from(config),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{TransportError, TransportResponse};
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl HttpTransport for Offline {
        async fn get(&self, _url: &str, _headers: &[(String, String)]) -> Result<TransportResponse, TransportError> {
            Err(TransportError::Connect("offline".into()))
        }
    }

    #[test]
    fn source_order_follows_config() {
        let config = SeedConfig {
            genres: vec!["RPG".into()],
            top_lists: vec!["top100owned".into()],
            ..SeedConfig::default()
        };
        let clients = Clients::with_transport(&config, Arc::new(Offline)).unwrap();
        let names: Vec<String> = clients.sources(&config).iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["steamspy:top100owned", "steamspy:genre:RPG", "steam:GetAppList", "steamspy:all"]
        );

        let trimmed = SeedConfig {
            include_web_app_list: false,
            include_steamspy_all: false,
            ..config
        };
        assert_eq!(clients.sources(&trimmed).len(), 2);
    }
}
