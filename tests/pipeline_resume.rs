use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use steam_seeder::database_ops::games_store::{GameStore, MemoryGameStore};
use steam_seeder::database_ops::ProviderError;
use steam_seeder::http::FetchError;
use steam_seeder::models::{AppId, DetailRecord};
use steam_seeder::seed::{
    explicit_checkpoint_path, BatchUpserter, Checkpoint, CheckpointStore, DetailError, DetailSource, IdCollector,
    IdSource, PipelineSettings, SeedingPipeline, Stage,
};

fn id(v: i64) -> AppId {
    AppId::new(v).unwrap()
}

fn ids(raw: &[i64]) -> Vec<AppId> {
    raw.iter().map(|v| id(*v)).collect()
}

fn record(appid: AppId) -> DetailRecord {
    DetailRecord {
        appid,
        name: format!("Game {appid}"),
        developer: Some("Dev".into()),
        publisher: None,
        owners: Some("0 .. 20,000".into()),
        owners_midpoint: Some(10_000),
        average_forever: 10,
        average_2weeks: 1,
        median_forever: 5,
        median_2weeks: 1,
        ccu: 3,
        price: Some(999),
        initial_price: Some(999),
        discount: Some(0),
        languages: None,
        genre: Some("Indie".into()),
        tags: BTreeMap::from([("Indie".to_string(), 10)]),
        positive: 4,
        negative: 1,
        score_rank: None,
        userscore: None,
        release: None,
        updated_at: Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap(),
    }
}

struct FixedSource {
    ids: Vec<AppId>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl IdSource for FixedSource {
    fn name(&self) -> String {
        "fixed".into()
    }

    async fn fetch_ids(&self) -> Result<Vec<AppId>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.ids.clone())
    }
}

fn sources(lists: &[&[i64]], calls: &Arc<AtomicUsize>) -> Vec<Arc<dyn IdSource>> {
    lists
        .iter()
        .map(|l| {
            Arc::new(FixedSource {
                ids: ids(l),
                calls: calls.clone(),
            }) as Arc<dyn IdSource>
        })
        .collect()
}

/// Details for every id except `missing`; `failing` ids exhaust their retries.
/// With `hang_after`, every call past that count never completes.
#[derive(Default)]
struct ScriptedDetails {
    missing: HashSet<AppId>,
    failing: HashSet<AppId>,
    hang_after: Option<usize>,
    /// Per-id latency, to shake up completion order under concurrency.
    latency: BTreeMap<AppId, Duration>,
    calls: AtomicUsize,
}

#[async_trait]
impl DetailSource for ScriptedDetails {
    async fn fetch_detail(&self, appid: AppId) -> Result<DetailRecord, DetailError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_after.is_some_and(|limit| n >= limit) {
            std::future::pending::<()>().await;
        }
        if let Some(d) = self.latency.get(&appid) {
            tokio::time::sleep(*d).await;
        }
        if self.missing.contains(&appid) {
            return Err(DetailError::NotFound(appid));
        }
        if self.failing.contains(&appid) {
            return Err(ProviderError::from(FetchError::Status {
                status: 500,
                retry_after: None,
            })
            .into());
        }
        Ok(record(appid))
    }
}

/// Memory store that remembers each batch and the checkpoint on disk at write time.
struct RecordingStore {
    inner: MemoryGameStore,
    checkpoint: PathBuf,
    fail: bool,
    batches: Mutex<Vec<Vec<u32>>>,
    seen_checkpoints: Mutex<Vec<Option<(Stage, usize, usize)>>>,
}

impl RecordingStore {
    fn new(checkpoint: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryGameStore::new(),
            checkpoint: checkpoint.to_path_buf(),
            fail: false,
            batches: Mutex::new(Vec::new()),
            seen_checkpoints: Mutex::new(Vec::new()),
        })
    }

    fn failing(checkpoint: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryGameStore::new(),
            checkpoint: checkpoint.to_path_buf(),
            fail: true,
            batches: Mutex::new(Vec::new()),
            seen_checkpoints: Mutex::new(Vec::new()),
        })
    }

    fn batches(&self) -> Vec<Vec<u32>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl GameStore for RecordingStore {
    async fn upsert_games(&self, rows: &[DetailRecord]) -> anyhow::Result<u64> {
        let cp = CheckpointStore::new(&self.checkpoint)
            .load()?
            .map(|c| (c.stage, c.last_processed_index, c.identifiers.len()));
        self.seen_checkpoints.lock().unwrap().push(cp);
        self.batches
            .lock()
            .unwrap()
            .push(rows.iter().map(|r| r.appid.get()).collect());
        if self.fail {
            anyhow::bail!("relation \"steam_games\" does not exist");
        }
        self.inner.upsert_games(rows).await
    }

    async fn count_games(&self) -> anyhow::Result<i64> {
        self.inner.count_games().await
    }
}

fn settings(target: usize, batch_size: usize, concurrency: usize) -> PipelineSettings {
    PipelineSettings {
        target,
        batch_size,
        concurrency,
        request_interval: Duration::ZERO,
    }
}

fn pipeline(
    sources: Vec<Arc<dyn IdSource>>,
    details: Arc<dyn DetailSource>,
    store: Arc<dyn GameStore>,
    checkpoint: &Path,
    settings: PipelineSettings,
) -> SeedingPipeline {
    SeedingPipeline::new(
        IdCollector::new(sources, Duration::ZERO, settings.target),
        details,
        BatchUpserter::new(store),
        CheckpointStore::new(checkpoint),
        settings,
    )
}

#[tokio::test(start_paused = true)]
async fn collects_then_upserts_in_batches() {
    let dir = tempfile::tempdir().unwrap();
    let cp = dir.path().join("seed.json");
    let calls = Arc::new(AtomicUsize::new(0));
    let store = RecordingStore::new(&cp);

    let summary = pipeline(
        sources(&[&[1, 2], &[2, 3], &[4, 5, 6]], &calls),
        Arc::new(ScriptedDetails::default()),
        store.clone(),
        &cp,
        settings(5, 2, 1),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(store.batches(), vec![vec![1, 2], vec![3, 4], vec![5]]);
    assert_eq!(summary.identifiers, 5);
    assert_eq!(summary.seeded, 5);
    assert_eq!(summary.batches, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // the collection checkpoint keeps every collected id, not just the target
    let seen = store.seen_checkpoints.lock().unwrap().clone();
    assert_eq!(seen[0], Some((Stage::Collection, 0, 6)));
    assert_eq!(seen[1], Some((Stage::Upserting, 2, 5)));
    assert_eq!(seen[2], Some((Stage::Upserting, 4, 5)));
    assert!(!cp.exists(), "checkpoint removed after success");
}

#[tokio::test(start_paused = true)]
async fn seed_checkpoints_each_flushed_batch() {
    let dir = tempfile::tempdir().unwrap();
    let cp = dir.path().join("seed.json");
    let store = RecordingStore::new(&cp);
    let p = pipeline(
        Vec::new(),
        Arc::new(ScriptedDetails::default()),
        store.clone(),
        &cp,
        settings(5, 2, 1),
    );

    let summary = p.seed(ids(&[10, 20, 30, 40, 50]), 0, 0).await.unwrap();
    assert_eq!(summary.batches, 3);

    let offsets: Vec<usize> = store
        .seen_checkpoints
        .lock()
        .unwrap()
        .iter()
        .flatten()
        .map(|(_, idx, _)| *idx)
        .collect();
    assert_eq!(offsets, vec![2, 4]);
    let last = CheckpointStore::new(&cp).load().unwrap().unwrap();
    assert_eq!(last.stage, Stage::Upserting);
    assert_eq!(last.last_processed_index, 5);
    assert_eq!(last.batches_completed, 3);
}

#[tokio::test(start_paused = true)]
async fn interrupted_run_resumes_to_the_same_result() {
    let dir = tempfile::tempdir().unwrap();
    let cp = dir.path().join("seed.json");
    let lists: &[&[i64]] = &[&[5, 1], &[2, 7], &[3, 9, 4]];

    let reference = Arc::new(MemoryGameStore::new());
    let ref_cp = dir.path().join("reference.json");
    pipeline(
        sources(lists, &Arc::new(AtomicUsize::new(0))),
        Arc::new(ScriptedDetails::default()),
        reference.clone(),
        &ref_cp,
        settings(6, 2, 1),
    )
    .run()
    .await
    .unwrap();

    let store = Arc::new(MemoryGameStore::new());
    let hanging = Arc::new(ScriptedDetails {
        hang_after: Some(3),
        ..ScriptedDetails::default()
    });
    let first = pipeline(
        sources(lists, &Arc::new(AtomicUsize::new(0))),
        hanging,
        store.clone(),
        &cp,
        settings(6, 2, 1),
    );
    let interrupted = tokio::time::timeout(Duration::from_secs(30), first.run()).await;
    assert!(interrupted.is_err(), "run should have been cut off");
    drop(first);

    let saved = CheckpointStore::new(&cp).load().unwrap().unwrap();
    assert_eq!(saved.stage, Stage::Upserting);
    assert_eq!(saved.last_processed_index, 2);
    assert_eq!(saved.batches_completed, 1);
    assert_eq!(store.snapshot().len(), 2);

    let resumed_calls = Arc::new(AtomicUsize::new(0));
    let summary = pipeline(
        sources(lists, &resumed_calls),
        Arc::new(ScriptedDetails::default()),
        store.clone(),
        &cp,
        settings(6, 2, 1),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(resumed_calls.load(Ordering::SeqCst), 0, "collection is not repeated");
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.batches, 3);
    assert_eq!(store.snapshot(), reference.snapshot());
    assert!(!cp.exists());
}

#[tokio::test(start_paused = true)]
async fn collection_checkpoint_is_reused_without_querying_sources() {
    let dir = tempfile::tempdir().unwrap();
    let cp = dir.path().join("seed.json");
    CheckpointStore::new(&cp)
        .save(&steam_seeder::seed::Checkpoint::collected(ids(&[8, 6, 4, 2])))
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let store = RecordingStore::new(&cp);
    let summary = pipeline(
        sources(&[&[100, 200]], &calls),
        Arc::new(ScriptedDetails::default()),
        store.clone(),
        &cp,
        settings(3, 10, 1),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.batches(), vec![vec![8, 6, 4]]);
    assert_eq!(summary.identifiers, 3);
}

#[tokio::test(start_paused = true)]
async fn missing_and_failing_details_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let cp = dir.path().join("seed.json");
    let store = RecordingStore::new(&cp);
    let details = ScriptedDetails {
        missing: HashSet::from([id(3)]),
        failing: HashSet::from([id(4)]),
        ..ScriptedDetails::default()
    };
    let summary = pipeline(
        sources(&[&[1, 2, 3, 4, 5]], &Arc::new(AtomicUsize::new(0))),
        Arc::new(details),
        store.clone(),
        &cp,
        settings(5, 2, 1),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(store.batches(), vec![vec![1, 2], vec![5]]);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.seeded, 3);
}

#[tokio::test(start_paused = true)]
async fn store_failure_counts_rows_failed_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let cp = dir.path().join("seed.json");
    let store = RecordingStore::failing(&cp);
    let summary = pipeline(
        sources(&[&[1, 2, 3]], &Arc::new(AtomicUsize::new(0))),
        Arc::new(ScriptedDetails::default()),
        store.clone(),
        &cp,
        settings(3, 2, 1),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(store.batches().len(), 2);
    assert_eq!(summary.seeded, 0);
    assert_eq!(summary.failed, 3);
    assert!(!cp.exists());
}

#[tokio::test(start_paused = true)]
async fn concurrent_fetches_keep_identifier_order() {
    let dir = tempfile::tempdir().unwrap();
    let cp = dir.path().join("seed.json");
    let store = RecordingStore::new(&cp);
    let latency = BTreeMap::from([
        (id(1), Duration::from_millis(300)),
        (id(2), Duration::from_millis(10)),
        (id(3), Duration::from_millis(200)),
        (id(4), Duration::from_millis(5)),
        (id(5), Duration::from_millis(1)),
    ]);
    let details = ScriptedDetails {
        latency,
        ..ScriptedDetails::default()
    };
    pipeline(
        sources(&[&[1, 2, 3, 4, 5]], &Arc::new(AtomicUsize::new(0))),
        Arc::new(details),
        store.clone(),
        &cp,
        settings(5, 2, 3),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(store.batches(), vec![vec![1, 2], vec![3, 4], vec![5]]);
}

#[tokio::test(start_paused = true)]
async fn request_interval_paces_detail_fetches() {
    let dir = tempfile::tempdir().unwrap();
    let cp = dir.path().join("seed.json");
    let p = pipeline(
        Vec::new(),
        Arc::new(ScriptedDetails::default()),
        Arc::new(MemoryGameStore::new()),
        &cp,
        PipelineSettings {
            request_interval: Duration::from_millis(1_200),
            ..settings(3, 10, 1)
        },
    );
    let start = tokio::time::Instant::now();
    p.seed(ids(&[1, 2, 3]), 0, 0).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(3_600));
}

#[tokio::test(start_paused = true)]
async fn explicit_ids_leave_the_main_checkpoint_alone() {
    let dir = tempfile::tempdir().unwrap();
    let main = dir.path().join("seed.json");
    let all: Vec<i64> = (1..=1000).collect();
    CheckpointStore::new(&main)
        .save(&Checkpoint::upserting(ids(&all), 500, 2))
        .unwrap();

    let explicit = explicit_checkpoint_path(&main);
    let store = Arc::new(MemoryGameStore::new());
    let summary = pipeline(
        Vec::new(),
        Arc::new(ScriptedDetails::default()),
        store.clone(),
        &explicit,
        settings(10, 10, 1),
    )
    .run_explicit(ids(&[99]))
    .await
    .unwrap();

    assert_eq!(summary.seeded, 1);
    assert!(!explicit.exists());
    let kept = CheckpointStore::new(&main).load().unwrap().unwrap();
    assert_eq!(kept.identifiers.len(), 1000);
    assert_eq!(kept.last_processed_index, 500);
    assert_eq!(kept.batches_completed, 2);
}

#[tokio::test(start_paused = true)]
async fn explicit_ids_resume_their_own_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let cp = dir.path().join("seed.appids.json");
    CheckpointStore::new(&cp)
        .save(&Checkpoint::upserting(ids(&[5, 6, 7]), 2, 1))
        .unwrap();
    let store = RecordingStore::new(&cp);

    let summary = pipeline(
        Vec::new(),
        Arc::new(ScriptedDetails::default()),
        store.clone(),
        &cp,
        settings(10, 2, 1),
    )
    .run_explicit(ids(&[5, 6, 7]))
    .await
    .unwrap();

    assert_eq!(store.batches(), vec![vec![7]]);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.batches, 2);
    assert!(!cp.exists());

    // a different id list does not resume someone else's offset
    CheckpointStore::new(&cp)
        .save(&Checkpoint::upserting(ids(&[5, 6, 7]), 2, 1))
        .unwrap();
    let other = RecordingStore::new(&cp);
    pipeline(
        Vec::new(),
        Arc::new(ScriptedDetails::default()),
        other.clone(),
        &cp,
        settings(10, 2, 1),
    )
    .run_explicit(ids(&[8, 9]))
    .await
    .unwrap();
    assert_eq!(other.batches(), vec![vec![8, 9]]);
}
