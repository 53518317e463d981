use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use steam_seeder::database_ops::games_store::{GameStore, MemoryGameStore, PgGameStore};
use steam_seeder::models::AppId;
use steam_seeder::seed::config::parse_appids;
use steam_seeder::seed::{self, explicit_checkpoint_path, CheckpointStore, Clients, SeedConfig};
use steam_seeder::util::{db::Db, env as env_util};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "seed_steam_games",
    version,
    about = "Seed the steam_games table from SteamSpy and the Steam Web API",
    rename_all = "kebab-case"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    // `seed_steam_games --limit 50` works without the explicit `run` subcommand.
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Collect ids and seed details (default when no command supplied)
    Run(RunArgs),
    /// Show checkpoint progress and the current table size
    Status {
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Delete the checkpoint so the next run starts from scratch
    Reset {
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
    /// Look up the store release status of one app
    ReleaseStatus { appid: u32 },
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// Number of apps to seed
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Detail requests in flight at once
    #[arg(long)]
    concurrency: Option<usize>,
    /// Pause after every detail request, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Seed exactly these apps (comma-separated), skipping collection
    #[arg(long)]
    appids: Option<String>,
    #[arg(long)]
    db_url: Option<String>,
    /// Write to an in-memory store instead of Postgres
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    dry_run: bool,
}

impl RunArgs {
    fn apply(&self, cfg: &mut SeedConfig) -> Result<()> {
        if let Some(v) = self.limit {
            cfg.target = v;
        }
        if let Some(v) = self.batch_size {
            cfg.batch_size = v;
        }
        if let Some(v) = self.concurrency {
            cfg.concurrency = v;
        }
        if let Some(ms) = self.interval_ms {
            cfg.request_interval = std::time::Duration::from_millis(ms);
            cfg.source_delay = cfg.request_interval;
        }
        if let Some(p) = &self.checkpoint {
            cfg.checkpoint_file = p.clone();
        }
        if let Some(raw) = &self.appids {
            cfg.appids = Some(parse_appids(raw)?);
        }
        cfg.validate()
    }
}

const PREFLIGHT_KEYS: [&str; 12] = [
    "SEED_LIMIT",
    "BATCH_SIZE",
    "CONCURRENCY",
    "REQUEST_INTERVAL_MS",
    "CHECKPOINT_FILE",
    "STEAMSPY_BASE",
    "SEED_FETCH_RELEASE_STATUS",
    "FETCH_RETRIES",
    "SUPABASE_DB_SESSION_URL",
    "SUPABASE_DB_URL",
    "DATABASE_URL",
    "DB_URL",
];

async fn connect_store(db_url: Option<&str>) -> Result<PgGameStore> {
    let url = match db_url {
        Some(u) => env_util::prefer_session_mode(u),
        None => env_util::db_url_prefer_session()
            .context("no database URL configured; set SUPABASE_DB_URL or DATABASE_URL, or pass --dry-run")?,
    };
    let max_conns: u32 = env_util::env_parse("DB_MAX_CONNS", 4);
    let db = Db::connect(&url, max_conns).await?;
    Ok(PgGameStore::new(db))
}

async fn run(args: RunArgs) -> Result<()> {
    let mut cfg = SeedConfig::from_env()?;
    args.apply(&mut cfg)?;
    env_util::preflight_check("seed_steam_games", &[], &PREFLIGHT_KEYS)?;

    let memory = Arc::new(MemoryGameStore::new());
    let store: Arc<dyn GameStore> = if args.dry_run {
        warn!("dry run: rows are kept in memory and discarded at exit");
        memory.clone()
    } else {
        Arc::new(connect_store(args.db_url.as_deref()).await?)
    };

    let pipeline = seed::assemble(&cfg, store.clone())?;
    let result = match cfg.appids.clone() {
        Some(ids) => pipeline.run_explicit(ids).await,
        None => pipeline.run().await,
    };

    match result {
        Ok(summary) => {
            info!(
                identifiers = summary.identifiers,
                seeded = summary.seeded,
                failed = summary.failed,
                skipped = summary.skipped,
                batches = summary.batches,
                "done"
            );
            if args.dry_run {
                info!(rows = memory.snapshot().len(), "dry run finished");
            } else if let Ok(n) = store.count_games().await {
                info!(rows = n, "steam_games row count");
            }
            Ok(())
        }
        Err(e) => {
            error!(error = ?e, checkpoint = %pipeline.checkpoints().path().display(), "seeding aborted; checkpoint kept, rerun to resume");
            Err(e)
        }
    }
}

fn checkpoint_paths(checkpoint: Option<PathBuf>) -> Result<[PathBuf; 2]> {
    let main = match checkpoint {
        Some(p) => p,
        None => SeedConfig::from_env()?.checkpoint_file,
    };
    let explicit = explicit_checkpoint_path(&main);
    Ok([main, explicit])
}

async fn status(checkpoint: Option<PathBuf>, db_url: Option<String>) -> Result<()> {
    for path in checkpoint_paths(checkpoint)? {
        let store = CheckpointStore::new(path);
        match store.load()? {
            Some(cp) => println!(
                "checkpoint {}: stage={:?} identifiers={} processed={} batches={} saved={}",
                store.path().display(),
                cp.stage,
                cp.identifiers.len(),
                cp.last_processed_index,
                cp.batches_completed,
                cp.timestamp.to_rfc3339()
            ),
            None => println!("no checkpoint at {}", store.path().display()),
        }
    }
    match connect_store(db_url.as_deref()).await {
        Ok(games) => println!("steam_games rows: {}", games.count_games().await?),
        Err(e) => warn!(error = %e, "database unavailable; row count skipped"),
    }
    Ok(())
}

async fn release_status(appid: u32) -> Result<()> {
    let appid = AppId::new(i64::from(appid)).context("app id must be positive")?;
    let cfg = SeedConfig::from_env()?;
    let clients = Clients::from_config(&cfg)?;
    match clients.steam_store.release_status(appid).await? {
        Some(r) => println!("{appid}: coming_soon={} date={:?}", r.coming_soon, r.date),
        None => println!("{appid}: not found in the store"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    steam_seeder::logging::init_tracing("info,sqlx=warn")?;

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Run(args)) => run(args).await,
        Some(Command::Status { checkpoint, db_url }) => status(checkpoint, db_url).await,
        Some(Command::Reset { checkpoint }) => {
            for path in checkpoint_paths(checkpoint)? {
                CheckpointStore::new(&path).clear()?;
                info!(path = %path.display(), "checkpoint removed");
            }
            Ok(())
        }
        Some(Command::ReleaseStatus { appid }) => release_status(appid).await,
        None => run(cli.run).await,
    }
}
