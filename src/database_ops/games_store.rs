use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, instrument};

use crate::models::{AppId, DetailRecord};
use crate::util::db::Db;

/// Persistent `steam_games` table keyed by appid, last write wins.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Insert or update every row; returns the number of rows written.
    async fn upsert_games(&self, rows: &[DetailRecord]) -> Result<u64>;
    async fn count_games(&self) -> Result<i64>;
}

/// Collapse repeated appids within one statement; Postgres refuses to touch
/// the same row twice in a single `ON CONFLICT DO UPDATE`.
fn latest_per_appid(rows: &[DetailRecord]) -> Vec<&DetailRecord> {
    let mut by_id: BTreeMap<AppId, &DetailRecord> = BTreeMap::new();
    for r in rows {
        by_id.insert(r.appid, r);
    }
    by_id.into_values().collect()
}

pub struct PgGameStore {
    db: Db,
}

impl PgGameStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

/// Postgres caps one statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;
const UPSERT_COLUMNS: usize = 24;
/// Rows per `INSERT`; larger batches are split across several statements.
pub const MAX_ROWS_PER_STATEMENT: usize = MAX_BIND_PARAMS / UPSERT_COLUMNS;

fn upsert_statement<'a>(rows: &[&'a DetailRecord]) -> QueryBuilder<'a, Postgres> {
    let mut qb: QueryBuilder<'a, Postgres> = QueryBuilder::new(
        "INSERT INTO steam_games (appid, name, developer, publisher, owners, owners_midpoint, \
         average_forever, average_2weeks, median_forever, median_2weeks, ccu, price, initialprice, \
         discount, languages, genre, tags, positive, negative, score_rank, userscore, coming_soon, \
         release_date, updated_at) ",
    );
    qb.push_values(rows.iter().copied(), |mut b, r| {
        b.push_bind(i64::from(r.appid))
            .push_bind(r.name.clone())
            .push_bind(r.developer.clone())
            .push_bind(r.publisher.clone())
            .push_bind(r.owners.clone())
            .push_bind(r.owners_midpoint)
            .push_bind(r.average_forever)
            .push_bind(r.average_2weeks)
            .push_bind(r.median_forever)
            .push_bind(r.median_2weeks)
            .push_bind(r.ccu)
            .push_bind(r.price)
            .push_bind(r.initial_price)
            .push_bind(r.discount)
            .push_bind(r.languages.clone())
            .push_bind(r.genre.clone())
            .push_bind(Json(r.tags.clone()))
            .push_bind(r.positive)
            .push_bind(r.negative)
            .push_bind(r.score_rank.clone())
            .push_bind(r.userscore)
            .push_bind(r.release.as_ref().map(|s| s.coming_soon))
            .push_bind(r.release.as_ref().map(|s| s.date.clone()))
            .push_bind(r.updated_at);
    });
    qb.push(
        " ON CONFLICT (appid) DO UPDATE SET name = EXCLUDED.name, developer = EXCLUDED.developer, \
         publisher = EXCLUDED.publisher, owners = EXCLUDED.owners, owners_midpoint = EXCLUDED.owners_midpoint, \
         average_forever = EXCLUDED.average_forever, average_2weeks = EXCLUDED.average_2weeks, \
         median_forever = EXCLUDED.median_forever, median_2weeks = EXCLUDED.median_2weeks, ccu = EXCLUDED.ccu, \
         price = EXCLUDED.price, initialprice = EXCLUDED.initialprice, discount = EXCLUDED.discount, \
         languages = EXCLUDED.languages, genre = EXCLUDED.genre, tags = EXCLUDED.tags, \
         positive = EXCLUDED.positive, negative = EXCLUDED.negative, score_rank = EXCLUDED.score_rank, \
         userscore = EXCLUDED.userscore, \
         coming_soon = COALESCE(EXCLUDED.coming_soon, steam_games.coming_soon), \
         release_date = COALESCE(EXCLUDED.release_date, steam_games.release_date), \
         updated_at = EXCLUDED.updated_at",
    );
    qb
}

#[async_trait]
impl GameStore for PgGameStore {
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert_games(&self, rows: &[DetailRecord]) -> Result<u64> {
        let rows = latest_per_appid(rows);
        if rows.is_empty() {
            return Ok(0);
        }
        let mut tx = self.db.pool.begin().await.context("begin upsert tx")?;
        let mut affected = 0;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let res = upsert_statement(chunk)
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("upsert steam_games")?;
            affected += res.rows_affected();
        }
        tx.commit().await.context("commit upsert tx")?;
        debug!(affected, "steam_games upserted");
        Ok(affected)
    }

    #[instrument(skip(self))]
    async fn count_games(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM steam_games")
            .persistent(false)
            .fetch_one(&self.db.pool)
            .await
            .context("count steam_games")?;
        Ok(n)
    }
}

/// In-process store keyed by appid; backs `--dry-run` and tests.
#[derive(Default)]
pub struct MemoryGameStore {
    rows: Mutex<BTreeMap<AppId, DetailRecord>>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<AppId, DetailRecord> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn upsert_games(&self, rows: &[DetailRecord]) -> Result<u64> {
        let mut guard = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        for r in rows {
            guard.insert(r.appid, r.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn count_games(&self) -> Result<i64> {
        let guard = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.len() as i64)
    }
}
