pub mod database_ops;
pub mod http;
pub mod logging;
pub mod models;
pub mod normalization;
pub mod seed;

pub mod util {
    pub mod db;
    pub mod env;
}

pub use models::{AppId, DetailRecord, ReleaseStatus};
