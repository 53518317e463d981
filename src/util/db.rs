use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Row,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::util::env::env_flag;

pub const MIGRATIONS_DIR: &str = "./migrations";

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options =
            PgConnectOptions::from_str(database_url).context("parse database url")?;

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connect to postgres")?;
        info!("connected to db");

        // Default off: the table is usually provisioned by the hosted project.
        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on)");
            run_migrations(&pool, Path::new(MIGRATIONS_DIR)).await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(Self { pool })
    }
}

/// `NNNN_description.sql` files in `dir`, sorted by version.
pub fn migration_candidates(dir: &Path) -> Result<Vec<(i64, String, PathBuf)>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(stem) = fname.strip_suffix(".sql") else {
            continue;
        };
        let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
        let Some(desc) = stem[digits.len()..].strip_prefix('_') else {
            continue;
        };
        if let Ok(version) = digits.parse::<i64>() {
            out.push((version, desc.to_string(), path));
        }
    }
    out.sort_by_key(|(v, _, _)| *v);
    Ok(out)
}

async fn run_migrations(pool: &PgPool, dir: &Path) -> Result<()> {
    // raw_sql throughout: no prepared statements under PgBouncer
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS _sqlx_migrations (
            version BIGINT PRIMARY KEY,
            description TEXT,
            installed_at TIMESTAMPTZ DEFAULT now()
         )",
    )
    .execute(pool)
    .await?;
    let mut applied: HashSet<i64> = HashSet::new();
    for r in sqlx::raw_sql("SELECT version FROM _sqlx_migrations")
        .fetch_all(pool)
        .await?
    {
        applied.insert(r.try_get::<i64, _>(0)?);
    }
    for (version, desc, path) in migration_candidates(dir)? {
        if !applied.insert(version) {
            continue;
        }
        let sql = std::fs::read_to_string(&path)
            .with_context(|| format!("read migration {}", path.display()))?;
        info!(version, file = ?path, "applying migration");
        sqlx::raw_sql(sql.trim()).execute(pool).await?;
        let stmt = format!(
            "INSERT INTO _sqlx_migrations(version, description) VALUES ({}, '{}')",
            version,
            desc.replace('\'', "''")
        );
        sqlx::raw_sql(&stmt).execute(pool).await?;
    }
    info!("migrations up-to-date");
    Ok(())
}
