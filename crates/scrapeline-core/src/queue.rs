//! Queue items and error records owned by the accumulator

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::entity::ScrapedEntity;
use crate::identity::IdentityKey;

/// Entity awaiting persistence plus its retry bookkeeping.
#[derive(Clone, Debug)]
pub struct QueueItem {
    /// Per-accumulator sequence number in `add()` order
    pub seq: u64,
    pub key: IdentityKey,
    pub entity: ScrapedEntity,
    pub enqueued_at: Instant,
    pub retry_count: u32,
    /// Earliest instant the item may be flushed again
    pub not_before: Instant,
    pub last_error: Option<String>,
}

impl QueueItem {
    pub fn new(seq: u64, key: IdentityKey, entity: ScrapedEntity, now: Instant) -> Self {
        Self {
            seq,
            key,
            entity,
            enqueued_at: now,
            retry_count: 0,
            not_before: now,
            last_error: None,
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.not_before <= now
    }
}

/// Why an item was given up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    /// Failed on every attempt of its retry budget
    RetriesExhausted,
    /// Store reported an error that retrying cannot fix
    NonRetryable,
    /// Still queued when `close()` ran out of drain attempts
    DrainExhausted,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RetriesExhausted => "retries exhausted",
            Self::NonRetryable => "non-retryable",
            Self::DrainExhausted => "drain exhausted",
        })
    }
}

/// Preserved payload of a permanently failed item, for manual recovery.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorRecord {
    pub seq: u64,
    pub identity_key: IdentityKey,
    pub entity: ScrapedEntity,
    /// Persist attempts made, including the first
    pub attempts: u32,
    pub reason: DropReason,
    pub last_error: Option<String>,
    pub failed_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn from_item(item: QueueItem, attempts: u32, reason: DropReason) -> Self {
        Self {
            seq: item.seq,
            identity_key: item.key,
            entity: item.entity,
            attempts,
            reason,
            last_error: item.last_error,
            failed_at: Utc::now(),
        }
    }
}
