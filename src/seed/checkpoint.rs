//! Resume state on disk. Written after every flushed batch so an interrupted
//! run picks up where the last committed batch ended.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::AppId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Collection,
    Upserting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub stage: Stage,
    #[serde(alias = "appidsCollected")]
    pub identifiers: Vec<AppId>,
    #[serde(default)]
    pub last_processed_index: usize,
    #[serde(default, alias = "batchesUpserted")]
    pub batches_completed: u64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn collected(identifiers: Vec<AppId>) -> Self {
        Self {
            stage: Stage::Collection,
            identifiers,
            last_processed_index: 0,
            batches_completed: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn upserting(identifiers: Vec<AppId>, last_processed_index: usize, batches_completed: u64) -> Self {
        Self {
            stage: Stage::Upserting,
            identifiers,
            last_processed_index,
            batches_completed,
            timestamp: Utc::now(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.last_processed_index <= self.identifiers.len()
    }

    pub fn remaining(&self) -> usize {
        self.identifiers.len().saturating_sub(self.last_processed_index)
    }
}

/// Checkpoint used by `--appids` runs, kept next to the main one so the two
/// never overwrite each other: `.seed-checkpoint.json` becomes
/// `.seed-checkpoint.appids.json`.
pub fn explicit_checkpoint_path(main: &Path) -> PathBuf {
    main.with_extension("appids.json")
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when there is nothing usable to resume from. Unreadable or
    /// inconsistent files are reported and ignored; other I/O errors propagate.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read checkpoint {}", self.path.display()))
            }
        };
        let cp: Checkpoint = match serde_json::from_str(&raw) {
            Ok(cp) => cp,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "checkpoint unreadable; starting fresh");
                return Ok(None);
            }
        };
        if !cp.is_consistent() {
            warn!(
                path = %self.path.display(),
                index = cp.last_processed_index,
                identifiers = cp.identifiers.len(),
                "checkpoint offset out of range; starting fresh"
            );
            return Ok(None);
        }
        info!(
            stage = ?cp.stage,
            identifiers = cp.identifiers.len(),
            last_index = cp.last_processed_index,
            batches = cp.batches_completed,
            "resuming from checkpoint"
        );
        Ok(Some(cp))
    }

    /// Write to a sibling temp file, then rename over the target.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create checkpoint dir {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(checkpoint).context("serialize checkpoint")?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace checkpoint {}", self.path.display()))?;
        debug!(
            path = %self.path.display(),
            stage = ?checkpoint.stage,
            index = checkpoint.last_processed_index,
            "checkpoint saved"
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "checkpoint cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove checkpoint {}", self.path.display())),
        }
    }
}
