//! Run counters and the serializable snapshot derived from them.
//!
//! The tracker lives inside the accumulator's state and is only touched while
//! that state is locked, so counters are plain integers.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::executor::UpsertOutcome;

/// Flush latencies kept for the rolling average
const LATENCY_WINDOW: usize = 32;

#[derive(Debug)]
pub struct StatsTracker {
    started_at: Instant,
    added: u64,
    saved: u64,
    errors: u64,
    batches_processed: u64,
    inserted: u64,
    updated: u64,
    skipped: u64,
    unchanged: u64,
    rejected: u64,
    retried: u64,
    dropped: u64,
    latencies: VecDeque<Duration>,
}

impl StatsTracker {
    pub fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            added: 0,
            saved: 0,
            errors: 0,
            batches_processed: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            unchanged: 0,
            rejected: 0,
            retried: 0,
            dropped: 0,
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    /// Entity accepted into the queue
    pub fn record_added(&mut self) {
        self.added += 1;
    }

    /// Entity refused by validation: counts as added and as an error.
    pub fn record_rejected(&mut self) {
        self.added += 1;
        self.rejected += 1;
        self.errors += 1;
    }

    pub fn record_saved(&mut self, outcome: UpsertOutcome) {
        self.saved += 1;
        match outcome {
            UpsertOutcome::Inserted(_) => self.inserted += 1,
            UpsertOutcome::Updated(_) => self.updated += 1,
            UpsertOutcome::Skipped(_) => self.skipped += 1,
            UpsertOutcome::Unchanged(_) => self.unchanged += 1,
        }
    }

    pub fn record_retry(&mut self) {
        self.retried += 1;
    }

    /// Queued item given up on permanently
    pub fn record_dropped(&mut self) {
        self.dropped += 1;
        self.errors += 1;
    }

    pub fn record_batch(&mut self, latency: Duration) {
        self.batches_processed += 1;
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    /// Queued items that reached a terminal state (saved or dropped)
    pub fn resolved(&self) -> u64 {
        self.saved + self.dropped
    }

    /// Items accepted but not yet saved or dropped
    pub fn pending(&self) -> u64 {
        self.added - self.saved - self.errors
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.started_at.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();
        let save_rate = if elapsed_secs > 0.0 {
            self.saved as f64 / elapsed_secs
        } else {
            0.0
        };
        let resolved = self.saved + self.errors;
        let error_rate = if resolved > 0 {
            self.errors as f64 / resolved as f64
        } else {
            0.0
        };
        let avg_flush_latency_ms = if self.latencies.is_empty() {
            0.0
        } else {
            let total: Duration = self.latencies.iter().sum();
            total.as_secs_f64() * 1000.0 / self.latencies.len() as f64
        };
        StatsSnapshot {
            added: self.added,
            saved: self.saved,
            errors: self.errors,
            pending: self.pending(),
            batches_processed: self.batches_processed,
            elapsed_ms: elapsed.as_millis() as u64,
            save_rate,
            error_rate,
            avg_flush_latency_ms,
            inserted: self.inserted,
            updated: self.updated,
            skipped: self.skipped,
            unchanged: self.unchanged,
            rejected: self.rejected,
            retried: self.retried,
            dropped: self.dropped,
        }
    }
}

/// Point-in-time view of the run counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub added: u64,
    pub saved: u64,
    pub errors: u64,
    pub pending: u64,
    pub batches_processed: u64,
    pub elapsed_ms: u64,
    /// Saved items per second of run time
    pub save_rate: f64,
    /// errors / (saved + errors)
    pub error_rate: f64,
    /// Mean of the most recent flush latencies
    pub avg_flush_latency_ms: f64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub unchanged: u64,
    /// Validation failures (included in `errors`)
    pub rejected: u64,
    /// Requeues after a failed persist
    pub retried: u64,
    /// Queued items given up on (included in `errors`)
    pub dropped: u64,
}

impl StatsSnapshot {
    /// Log a one-line summary.
    pub fn log(&self) {
        log::info!(
            "saved {} / errors {} / pending {} in {} batches [{:.1}s, {:.1}/s, avg flush {:.1}ms]",
            self.saved,
            self.errors,
            self.pending,
            self.batches_processed,
            self.elapsed_ms as f64 / 1000.0,
            self.save_rate,
            self.avg_flush_latency_ms
        );
    }
}
