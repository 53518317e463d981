use std::sync::Arc;
use tracing::{debug, error, info};

use crate::database_ops::games_store::GameStore;
use crate::models::DetailRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct BatchUpserter {
    store: Arc<dyn GameStore>,
}

impl BatchUpserter {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self { store }
    }

    /// One bulk write. A store error fails the whole batch but never the run.
    pub async fn upsert(&self, records: &[DetailRecord], batch_number: u64) -> UpsertOutcome {
        if records.is_empty() {
            return UpsertOutcome::default();
        }
        debug!(batch = batch_number, rows = records.len(), "upserting batch");
        match self.store.upsert_games(records).await {
            Ok(_) => {
                info!(batch = batch_number, rows = records.len(), "batch upserted");
                UpsertOutcome {
                    succeeded: records.len(),
                    failed: 0,
                }
            }
            Err(e) => {
                error!(batch = batch_number, rows = records.len(), error = ?e, "batch upsert failed");
                UpsertOutcome {
                    succeeded: 0,
                    failed: records.len(),
                }
            }
        }
    }
}
