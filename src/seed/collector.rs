use async_trait::async_trait;
use indexmap::IndexSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::database_ops::steam::SteamWebClient;
use crate::database_ops::steamspy::SteamSpyClient;
use crate::database_ops::ProviderError;
use crate::models::AppId;

/// One list-style catalog endpoint.
#[async_trait]
pub trait IdSource: Send + Sync {
    fn name(&self) -> String;
    async fn fetch_ids(&self) -> Result<Vec<AppId>, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SteamSpyQuery {
    TopList(String),
    Genre(String),
    All,
}

pub struct SteamSpyIdSource {
    client: Arc<SteamSpyClient>,
    query: SteamSpyQuery,
}

impl SteamSpyIdSource {
    pub fn new(client: Arc<SteamSpyClient>, query: SteamSpyQuery) -> Self {
        Self { client, query }
    }
}

#[async_trait]
impl IdSource for SteamSpyIdSource {
    fn name(&self) -> String {
        match &self.query {
            SteamSpyQuery::TopList(list) => format!("steamspy:{list}"),
            SteamSpyQuery::Genre(genre) => format!("steamspy:genre:{genre}"),
            SteamSpyQuery::All => "steamspy:all".to_string(),
        }
    }

    async fn fetch_ids(&self) -> Result<Vec<AppId>, ProviderError> {
        match &self.query {
            SteamSpyQuery::TopList(list) => self.client.top_list(list).await,
            SteamSpyQuery::Genre(genre) => self.client.genre(genre).await,
            SteamSpyQuery::All => self.client.all().await,
        }
    }
}

pub struct SteamAppListSource {
    client: Arc<SteamWebClient>,
}

impl SteamAppListSource {
    pub fn new(client: Arc<SteamWebClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdSource for SteamAppListSource {
    fn name(&self) -> String {
        "steam:GetAppList".to_string()
    }

    async fn fetch_ids(&self) -> Result<Vec<AppId>, ProviderError> {
        self.client.app_list().await
    }
}

/// Queries every source in order and merges their ids, first seen first.
pub struct IdCollector {
    sources: Vec<Arc<dyn IdSource>>,
    politeness_delay: Duration,
    target: usize,
}

impl IdCollector {
    pub fn new(sources: Vec<Arc<dyn IdSource>>, politeness_delay: Duration, target: usize) -> Self {
        Self {
            sources,
            politeness_delay,
            target,
        }
    }

    /// Untruncated merge of all sources. A failing source contributes nothing.
    pub async fn collect_unique(&self) -> Vec<AppId> {
        let mut seen: IndexSet<AppId> = IndexSet::new();
        let last = self.sources.len().saturating_sub(1);
        for (i, source) in self.sources.iter().enumerate() {
            let name = source.name();
            match source.fetch_ids().await {
                Ok(ids) => {
                    let before = seen.len();
                    let fetched = ids.len();
                    seen.extend(ids);
                    info!(
                        source = %name,
                        fetched,
                        new = seen.len() - before,
                        total = seen.len(),
                        "collected ids"
                    );
                }
                Err(e) => warn!(source = %name, error = %e, "id source failed; skipping"),
            }
            if i < last && !self.politeness_delay.is_zero() {
                tokio::time::sleep(self.politeness_delay).await;
            }
        }
        seen.into_iter().collect()
    }

    pub async fn collect(&self) -> Vec<AppId> {
        let all = self.collect_unique().await;
        select_target(all, self.target)
    }
}

/// Keep the first `target` ids, warning when fewer were found.
pub fn select_target(mut ids: Vec<AppId>, target: usize) -> Vec<AppId> {
    if ids.len() < target {
        warn!(found = ids.len(), wanted = target, "collected fewer ids than requested");
    }
    ids.truncate(target);
    ids
}
