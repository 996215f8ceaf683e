//! Batch accumulator: pending queue, flush triggers, retry requeue, drain.
//!
//! Flushes are triggered by queue size (inside [`BatchAccumulator::add`]), by a
//! background timer, and by [`BatchAccumulator::close`]. At most one batch is
//! in flight at any instant; a request that arrives while a batch is being
//! persisted is recorded and served by the in-flight flusher once its batch
//! resolves.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::entity::ScrapedEntity;
use crate::error::ValidationError;
use crate::executor::{FlushExecutor, FlushReport};
use crate::identity::IdentityKey;
use crate::queue::{DropReason, ErrorRecord, QueueItem};
use crate::retry::retry_deadline;
use crate::stats::{StatsSnapshot, StatsTracker};
use crate::store::PersistenceStore;

/// What a call to [`BatchAccumulator::flush`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Queue was empty
    Empty,
    /// Only backoff-delayed retries are queued
    NotReady,
    /// Another flush is in flight; it will run one more batch when done
    Coalesced,
    /// This call persisted `batches` batches (1 + served follow-ups)
    Flushed { batches: u32 },
}

struct QueueState {
    queue: VecDeque<QueueItem>,
    in_flight: bool,
    follow_up: bool,
    next_seq: u64,
    stats: StatsTracker,
    error_records: Vec<ErrorRecord>,
    closed: bool,
}

impl QueueState {
    /// Remove up to `limit` ready items from the head, leaving delayed
    /// retries in place.
    fn take_ready(&mut self, limit: usize, now: Instant) -> Vec<QueueItem> {
        if self.queue.iter().take(limit).all(|item| item.is_ready(now)) {
            let n = limit.min(self.queue.len());
            return self.queue.drain(..n).collect();
        }
        let mut batch = Vec::with_capacity(limit);
        let mut rest = VecDeque::with_capacity(self.queue.len());
        for item in self.queue.drain(..) {
            if batch.len() < limit && item.is_ready(now) {
                batch.push(item);
            } else {
                rest.push_back(item);
            }
        }
        self.queue = rest;
        batch
    }

    /// Put a retried item back at the head, after earlier retries.
    fn requeue(&mut self, item: QueueItem) {
        let pos = self
            .queue
            .iter()
            .take_while(|q| q.retry_count > 0 && q.seq < item.seq)
            .count();
        self.queue.insert(pos, item);
    }

    fn earliest_ready(&self) -> Option<Instant> {
        self.queue.iter().map(|item| item.not_before).min()
    }
}

struct Shared<S> {
    state: Mutex<QueueState>,
    executor: FlushExecutor<S>,
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
    /// Signalled whenever the in-flight guard is released
    idle: Notify,
}

impl<S> Shared<S> {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the in-flight guard if a flush future is dropped mid-batch, putting
/// the unresolved batch back at the head of the queue.
struct InFlight<'a, S> {
    shared: &'a Shared<S>,
    batch: Vec<QueueItem>,
    armed: bool,
}

impl<S> Drop for InFlight<'_, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut st = self.shared.state();
        for item in self.batch.drain(..).rev() {
            st.queue.push_front(item);
        }
        st.in_flight = false;
        st.follow_up = false;
        drop(st);
        self.shared.idle.notify_waiters();
        log::warn!("flush cancelled mid-batch; items returned to queue");
    }
}

impl<S: PersistenceStore> Shared<S> {
    async fn flush(&self) -> FlushOutcome {
        let batch = {
            let mut st = self.state();
            if st.queue.is_empty() {
                return FlushOutcome::Empty;
            }
            if st.in_flight {
                st.follow_up = true;
                return FlushOutcome::Coalesced;
            }
            let batch = st.take_ready(self.batch_size, Instant::now());
            if batch.is_empty() {
                return FlushOutcome::NotReady;
            }
            st.in_flight = true;
            batch
        };

        let mut guard = InFlight {
            shared: self,
            batch,
            armed: true,
        };
        let mut batches = 0u32;
        loop {
            let started = Instant::now();
            let report = self.executor.persist(&guard.batch).await;
            batches += 1;

            let mut st = self.state();
            let batch = std::mem::take(&mut guard.batch);
            self.fold(&mut st, batch, report, started.elapsed());

            // serve a coalesced request, and keep going while a full batch
            // is waiting so producers cannot outrun the flusher
            let more = std::mem::take(&mut st.follow_up) || st.queue.len() >= self.batch_size;
            if more {
                let next = st.take_ready(self.batch_size, Instant::now());
                if !next.is_empty() {
                    guard.batch = next;
                    continue;
                }
            }
            st.in_flight = false;
            guard.armed = false;
            break;
        }
        self.idle.notify_waiters();
        FlushOutcome::Flushed { batches }
    }

    /// Apply per-item results: saved items leave, failures requeue or drop.
    fn fold(
        &self,
        st: &mut QueueState,
        batch: Vec<QueueItem>,
        report: FlushReport,
        latency: Duration,
    ) {
        let size = batch.len();
        let mut saved = 0usize;
        let mut retried = Vec::new();
        let now = Instant::now();

        for (mut item, (seq, result)) in batch.into_iter().zip(report.outcomes) {
            debug_assert_eq!(item.seq, seq);
            match result {
                Ok(outcome) => {
                    st.stats.record_saved(outcome);
                    saved += 1;
                }
                Err(e) if e.is_retryable() && item.retry_count < self.max_retries => {
                    item.retry_count += 1;
                    item.not_before = retry_deadline(now, self.retry_delay, item.retry_count);
                    item.last_error = Some(e.to_string());
                    st.stats.record_retry();
                    retried.push(item);
                }
                Err(e) => {
                    let attempts = item.retry_count + 1;
                    let reason = if e.is_retryable() {
                        DropReason::RetriesExhausted
                    } else {
                        DropReason::NonRetryable
                    };
                    log::error!(
                        "{} (seq {}): giving up after {attempts} attempt(s) over {:.1}s: {e}",
                        item.key,
                        item.seq,
                        now.duration_since(item.enqueued_at).as_secs_f64()
                    );
                    item.last_error = Some(e.to_string());
                    st.stats.record_dropped();
                    st.error_records
                        .push(ErrorRecord::from_item(item, attempts, reason));
                }
            }
        }

        let requeued = retried.len();
        for item in retried {
            st.requeue(item);
        }
        st.stats.record_batch(latency);
        log::debug!(
            "flushed {size} items: {saved} saved, {requeued} requeued, {} dropped [{}ms]",
            size - saved - requeued,
            latency.as_millis()
        );
    }
}

struct Timer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the pending queue, the in-flight guard, the stats and the error
/// records of one pipeline instance.
pub struct BatchAccumulator<S> {
    shared: Arc<Shared<S>>,
    flush_interval: Option<Duration>,
    max_drain_attempts: u32,
    timer: Mutex<Option<Timer>>,
}

impl<S: PersistenceStore> BatchAccumulator<S> {
    /// Build an accumulator without starting its timer.
    pub fn new(store: S, config: &PipelineConfig) -> Self {
        let state = QueueState {
            queue: VecDeque::new(),
            in_flight: false,
            follow_up: false,
            next_seq: 0,
            stats: StatsTracker::new(Instant::now()),
            error_records: Vec::new(),
            closed: false,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                executor: FlushExecutor::new(store, config.duplicate_policy),
                batch_size: config.batch_size.max(1),
                max_retries: config.max_retries,
                retry_delay: config.retry_delay(),
                idle: Notify::new(),
            }),
            flush_interval: config.flush_interval(),
            max_drain_attempts: config.max_drain_attempts.max(1),
            timer: Mutex::new(None),
        }
    }

    /// Spawn the periodic flush timer. No-op when the interval is 0 or the
    /// timer is already running. Must be called inside a tokio runtime.
    pub fn start_timer(&self) {
        let Some(period) = self.flush_interval else {
            return;
        };
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let FlushOutcome::Flushed { batches } = shared.flush().await {
                            log::debug!("timer flush: {batches} batch(es)");
                        }
                    }
                }
            }
        });
        *timer = Some(Timer { cancel, task });
        log::debug!("flush timer started ({}ms)", period.as_millis());
    }

    /// Validate and enqueue an entity, flushing when the queue reaches the
    /// batch size. Returns the item's sequence number.
    ///
    /// A rejected entity is counted in `errors` and never queued.
    pub async fn add(&self, entity: ScrapedEntity) -> Result<u64, ValidationError> {
        let key = match IdentityKey::parse(entity.identity()) {
            Ok(key) => key,
            Err(e) => {
                self.shared.state().stats.record_rejected();
                log::warn!("page {}: rejected entity: {e}", entity.meta().page);
                return Err(e);
            }
        };

        let (seq, full) = {
            let mut st = self.shared.state();
            let seq = st.next_seq;
            st.next_seq += 1;
            st.queue
                .push_back(QueueItem::new(seq, key, entity, Instant::now()));
            st.stats.record_added();
            (seq, st.queue.len() >= self.shared.batch_size)
        };

        if full {
            self.shared.flush().await;
        }
        Ok(seq)
    }

    /// Persist up to one batch from the head of the queue (plus any follow-up
    /// requested meanwhile).
    pub async fn flush(&self) -> FlushOutcome {
        self.shared.flush().await
    }

    /// Stop the timer, drain the queue and return the final stats.
    ///
    /// Draining gives up after `max_drain_attempts` consecutive flushes that
    /// resolved no item (neither saved nor dropped); a store that is making
    /// progress is drained completely. Items still queued afterwards become
    /// error records. Calling it again just returns the stats.
    pub async fn close(&self) -> StatsSnapshot {
        self.stop_timer().await;
        if self.shared.state().closed {
            return self.stats();
        }

        let mut attempts = 0u32;
        let mut stalled = 0u32;
        loop {
            self.wait_idle().await;
            let (next_ready, resolved_before) = {
                let st = self.shared.state();
                if st.queue.is_empty() {
                    break;
                }
                (st.earliest_ready(), st.stats.resolved())
            };
            if stalled >= self.max_drain_attempts {
                break;
            }
            if let Some(at) = next_ready {
                tokio::time::sleep_until(at).await;
            }
            attempts += 1;
            self.shared.flush().await;
            if self.shared.state().stats.resolved() > resolved_before {
                stalled = 0;
            } else {
                stalled += 1;
            }
        }

        let snapshot = {
            let mut st = self.shared.state();
            let leftover: Vec<QueueItem> = st.queue.drain(..).collect();
            if !leftover.is_empty() {
                log::error!(
                    "{} items still queued after {stalled} drain attempts without progress",
                    leftover.len()
                );
            }
            for item in leftover {
                // every failed attempt bumped retry_count
                let attempts = item.retry_count;
                st.stats.record_dropped();
                st.error_records.push(ErrorRecord::from_item(
                    item,
                    attempts,
                    DropReason::DrainExhausted,
                ));
            }
            st.closed = true;
            st.stats.snapshot()
        };
        log::debug!("accumulator closed after {attempts} drain attempt(s)");
        snapshot
    }

    async fn stop_timer(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.cancel.cancel();
            if let Err(e) = timer.task.await {
                log::warn!("flush timer task ended abnormally: {e}");
            }
        }
    }

    /// Wait until no batch is in flight.
    async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.shared.state().in_flight {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.state().stats.snapshot()
    }

    /// Items currently queued (including delayed retries)
    pub fn queue_len(&self) -> usize {
        self.shared.state().queue.len()
    }

    pub fn is_flushing(&self) -> bool {
        self.shared.state().in_flight
    }

    /// Payloads of permanently failed items
    pub fn error_records(&self) -> Vec<ErrorRecord> {
        self.shared.state().error_records.clone()
    }

    pub fn store(&self) -> &S {
        self.shared.executor.store()
    }
}

impl<S> Drop for BatchAccumulator<S> {
    fn drop(&mut self) {
        let timer = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.cancel.cancel();
        }
    }
}
