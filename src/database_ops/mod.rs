//! Source API clients and the `steam_games` persistence boundary.
pub mod games_store;
pub mod lenient;
pub mod steam;
pub mod steamspy;

use crate::http::FetchError;
use crate::models::DecodeError;
use thiserror::Error;

/// Failure of a single provider call after the fetcher gave up.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
