use anyhow::{Context, Result};
use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::checkpoint::{Checkpoint, CheckpointStore, Stage};
use super::collector::{select_target, IdCollector};
use super::config::SeedConfig;
use super::details::{DetailError, DetailSource};
use super::upsert::BatchUpserter;
use crate::models::AppId;
use crate::normalization::owners::top_tags;

const THROUGHPUT_EVERY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub target: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    /// Pause after every detail request.
    pub request_interval: Duration,
}

impl From<&SeedConfig> for PipelineSettings {
    fn from(cfg: &SeedConfig) -> Self {
        Self {
            target: cfg.target,
            batch_size: cfg.batch_size,
            concurrency: cfg.concurrency,
            request_interval: cfg.request_interval,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Length of the id list being seeded.
    pub identifiers: usize,
    /// Ids consumed by this invocation.
    pub processed: usize,
    pub seeded: usize,
    pub failed: usize,
    /// Ids with no usable details.
    pub skipped: usize,
    /// Batches flushed so far, including those from a resumed run.
    pub batches: u64,
}

pub struct SeedingPipeline {
    collector: IdCollector,
    details: Arc<dyn DetailSource>,
    upserter: BatchUpserter,
    checkpoints: CheckpointStore,
    settings: PipelineSettings,
}

impl SeedingPipeline {
    pub fn new(
        collector: IdCollector,
        details: Arc<dyn DetailSource>,
        upserter: BatchUpserter,
        checkpoints: CheckpointStore,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            collector,
            details,
            upserter,
            checkpoints,
            settings: PipelineSettings {
                batch_size: settings.batch_size.max(1),
                concurrency: settings.concurrency.max(1),
                ..settings
            },
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Collect (or resume), seed, then delete the checkpoint. On error the
    /// last checkpoint stays on disk and a rerun continues from it.
    pub async fn run(&self) -> Result<SeedSummary> {
        let (identifiers, start, batches) = match self.checkpoints.load()? {
            Some(cp) if cp.stage == Stage::Upserting => {
                info!(
                    remaining = cp.remaining(),
                    batches = cp.batches_completed,
                    "skipping collection; resuming upserts"
                );
                (cp.identifiers, cp.last_processed_index, cp.batches_completed)
            }
            Some(cp) => {
                info!(identifiers = cp.identifiers.len(), "reusing collected ids from checkpoint");
                (self.finish_collection(cp.identifiers)?, 0, 0)
            }
            None => {
                info!(limit = self.settings.target, "collecting app ids");
                let collected = self.collector.collect_unique().await;
                (self.finish_collection(collected)?, 0, 0)
            }
        };

        let summary = self.seed(identifiers, start, batches).await?;
        self.checkpoints.clear()?;
        info!(
            identifiers = summary.identifiers,
            seeded = summary.seeded,
            failed = summary.failed,
            skipped = summary.skipped,
            batches = summary.batches,
            "seeding complete"
        );
        Ok(summary)
    }

    /// Seed exactly `identifiers`, skipping collection. Resumes when the
    /// checkpoint holds the same id list; any other checkpoint is replaced.
    pub async fn run_explicit(&self, identifiers: Vec<AppId>) -> Result<SeedSummary> {
        let (start, batches) = match self.checkpoints.load()? {
            Some(cp) if cp.stage == Stage::Upserting && cp.identifiers == identifiers => {
                (cp.last_processed_index, cp.batches_completed)
            }
            Some(_) => {
                warn!(path = %self.checkpoints.path().display(), "checkpoint is for a different id list; starting over");
                (0, 0)
            }
            None => (0, 0),
        };
        info!(count = identifiers.len(), start, "seeding explicit app ids");
        let summary = self.seed(identifiers, start, batches).await?;
        self.checkpoints.clear()?;
        Ok(summary)
    }

    fn finish_collection(&self, collected: Vec<AppId>) -> Result<Vec<AppId>> {
        self.checkpoints
            .save(&Checkpoint::collected(collected.clone()))
            .context("save collection checkpoint")?;
        Ok(select_target(collected, self.settings.target))
    }

    /// Fetch and upsert `identifiers[start..]`, checkpointing after every batch.
    pub async fn seed(&self, identifiers: Vec<AppId>, start: usize, batches_completed: u64) -> Result<SeedSummary> {
        let total = identifiers.len();
        let start = start.min(total);
        let mut summary = SeedSummary {
            identifiers: total,
            batches: batches_completed,
            ..SeedSummary::default()
        };
        if start == total {
            info!(total, "nothing left to seed");
            return Ok(summary);
        }

        let PipelineSettings {
            batch_size,
            concurrency,
            request_interval,
            ..
        } = self.settings;
        let remaining = total - start;
        let estimate_secs = request_interval.as_secs_f64() * remaining as f64 / concurrency as f64;
        info!(
            start,
            remaining,
            batch_size,
            concurrency,
            estimated_minutes = (estimate_secs / 60.0).ceil() as u64,
            "fetching details"
        );

        let started = Instant::now();
        let ids = &identifiers;
        let details = &self.details;
        let mut fetches = stream::iter(start..total)
            .map(|idx| {
                let appid = ids[idx];
                async move {
                    let result = details.fetch_detail(appid).await;
                    if !request_interval.is_zero() {
                        tokio::time::sleep(request_interval).await;
                    }
                    (idx, appid, result)
                }
            })
            .buffered(concurrency);

        let mut batch = Vec::with_capacity(batch_size);
        while let Some((idx, appid, result)) = fetches.next().await {
            summary.processed += 1;
            match result {
                Ok(record) => {
                    debug!(%appid, tags = ?top_tags(&record.tags, 3), "details fetched");
                    batch.push(record);
                }
                Err(DetailError::NotFound(_)) => {
                    summary.skipped += 1;
                    debug!(%appid, "no details returned");
                }
                Err(e) => {
                    summary.skipped += 1;
                    warn!(%appid, error = %e, "detail fetch failed; skipping");
                }
            }

            if batch.len() >= batch_size || idx + 1 == total {
                summary.batches += 1;
                let outcome = self.upserter.upsert(&batch, summary.batches).await;
                summary.seeded += outcome.succeeded;
                summary.failed += outcome.failed;
                batch.clear();
                self.checkpoints
                    .save(&Checkpoint::upserting(ids.clone(), idx + 1, summary.batches))
                    .context("save upsert checkpoint")?;
                info!(
                    processed = idx + 1,
                    total,
                    seeded = summary.seeded,
                    failed = summary.failed,
                    "progress"
                );
            }

            if summary.processed % THROUGHPUT_EVERY == 0 {
                let secs = started.elapsed().as_secs_f64();
                if secs > 0.0 {
                    debug!(
                        processed = summary.processed,
                        per_sec = summary.processed as f64 / secs,
                        "throughput"
                    );
                }
            }
        }

        info!(
            seeded = summary.seeded,
            failed = summary.failed,
            skipped = summary.skipped,
            elapsed_secs = started.elapsed().as_secs(),
            "upsert phase complete"
        );
        Ok(summary)
    }
}
