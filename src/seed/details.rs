use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::database_ops::steam::SteamStoreClient;
use crate::database_ops::steamspy::SteamSpyClient;
use crate::database_ops::ProviderError;
use crate::models::{AppId, DetailRecord};

#[derive(Debug, Error)]
pub enum DetailError {
    #[error("no details for app {0}")]
    NotFound(AppId),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn fetch_detail(&self, appid: AppId) -> Result<DetailRecord, DetailError>;
}

/// SteamSpy details, optionally enriched with the store's release status.
pub struct DetailFetcher {
    steamspy: Arc<SteamSpyClient>,
    store: Option<Arc<SteamStoreClient>>,
}

impl DetailFetcher {
    pub fn new(steamspy: Arc<SteamSpyClient>) -> Self {
        Self { steamspy, store: None }
    }

    pub fn with_release_status(mut self, store: Arc<SteamStoreClient>) -> Self {
        self.store = Some(store);
        self
    }
}

#[async_trait]
impl DetailSource for DetailFetcher {
    async fn fetch_detail(&self, appid: AppId) -> Result<DetailRecord, DetailError> {
        let record = self
            .steamspy
            .app_details(appid)
            .await?
            .ok_or(DetailError::NotFound(appid))?;
        let Some(store) = &self.store else {
            return Ok(record);
        };
        // release status is a nice-to-have; the SteamSpy row is kept either way
        match store.release_status(appid).await {
            Ok(release) => Ok(record.with_release(release)),
            Err(e) => {
                warn!(%appid, error = %e, "release status unavailable");
                Ok(record)
            }
        }
    }
}
