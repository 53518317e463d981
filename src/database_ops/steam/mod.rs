//! Valve-hosted endpoints: the Web API app catalog and the Store release status.
pub mod app_list;
pub mod store;

pub use app_list::SteamWebClient;
pub use store::SteamStoreClient;
