use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Steam app id. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct AppId(u32);

impl AppId {
    pub fn new(raw: i64) -> Option<Self> {
        u32::try_from(raw).ok().filter(|v| *v > 0).map(Self)
    }

    /// Parse a map key such as `"570"`; anything non-numeric or non-positive is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<i64>().ok().and_then(Self::new)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<i64> for AppId {
    type Error = String;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| format!("app id must be a positive 32-bit integer, got {raw}"))
    }
}

impl From<AppId> for i64 {
    fn from(id: AppId) -> Self {
        i64::from(id.0)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStatus {
    pub coming_soon: bool,
    pub date: String,
}

/// One `steam_games` row as fetched from SteamSpy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub appid: AppId,
    pub name: String,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub owners: Option<String>,
    pub owners_midpoint: Option<i64>,
    pub average_forever: i64,
    pub average_2weeks: i64,
    pub median_forever: i64,
    pub median_2weeks: i64,
    pub ccu: i64,
    /// Cents.
    pub price: Option<i64>,
    /// Cents.
    pub initial_price: Option<i64>,
    /// Percent.
    pub discount: Option<i64>,
    pub languages: Option<String>,
    pub genre: Option<String>,
    pub tags: BTreeMap<String, i64>,
    pub positive: i64,
    pub negative: i64,
    pub score_rank: Option<String>,
    pub userscore: Option<i64>,
    pub release: Option<ReleaseStatus>,
    pub updated_at: DateTime<Utc>,
}

impl DetailRecord {
    pub fn with_release(self, release: Option<ReleaseStatus>) -> Self {
        Self { release, ..self }
    }
}

/// A payload that did not match the shape we expect from a provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unexpected {context} payload: {reason}")]
pub struct DecodeError {
    pub context: &'static str,
    pub reason: String,
}

impl DecodeError {
    pub fn new(context: &'static str, reason: impl Into<String>) -> Self {
        Self {
            context,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_id_rejects_non_positive_and_garbage() {
        assert_eq!(AppId::new(570).map(AppId::get), Some(570));
        assert_eq!(AppId::new(0), None);
        assert_eq!(AppId::new(-3), None);
        assert_eq!(AppId::new(i64::from(u32::MAX) + 1), None);
        assert_eq!(AppId::parse(" 730 ").map(AppId::get), Some(730));
        assert_eq!(AppId::parse("abc"), None);
    }

    #[test]
    fn app_id_serde_is_a_plain_integer() {
        let ids: Vec<AppId> = serde_json::from_str("[10, 20]").unwrap();
        assert_eq!(serde_json::to_string(&ids).unwrap(), "[10,20]");
        assert!(serde_json::from_str::<AppId>("0").is_err());
    }
}
