//! Background reconciler for partial writes
//!
//! A memory write whose vector upsert failed stays durable with
//! `needs_reindex = true`. This task sweeps those rows on an interval,
//! re-embeds them, and clears the flag. Failures back off per row by
//! leaving the flag set for the next sweep.

use std::sync::Arc;
use std::time::Duration;

use crate::memory::MemoryStore;

/// Rows processed per sweep.
const BATCH_SIZE: usize = 32;

/// Interval-driven reindex reconciler.
pub struct Reconciler {
    memories: Arc<MemoryStore>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(memories: Arc<MemoryStore>, interval: Duration) -> Self {
        Self { memories, interval }
    }

    /// Run forever; intended to be spawned as a background task and aborted
    /// on shutdown.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                tracing::warn!(error = %e, "reconciler sweep failed");
            }
        }
    }

    /// One sweep over flagged rows. Public so tests and admin triggers can
    /// drive reconciliation synchronously.
    pub async fn sweep_once(&self) -> mnema_core::MnemaResult<u64> {
        let batch = self.memories.needs_reindex_batch(BATCH_SIZE).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut repaired = 0;
        for record in &batch {
            match self.memories.reconcile_one(record).await {
                Ok(()) => repaired += 1,
                Err(e) => {
                    // Leave the flag set; the next sweep retries.
                    tracing::debug!(
                        memory_id = %record.memory_id,
                        error = %e,
                        "reindex attempt failed"
                    );
                }
            }
        }

        tracing::info!(
            flagged = batch.len(),
            repaired,
            "reconciler sweep complete"
        );
        Ok(repaired)
    }
}
