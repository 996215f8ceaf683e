//! Flush executor: serialized upserts of one batch into the persistence store

use crate::config::DuplicatePolicy;
use crate::entity::{ScrapedEntity, merge_attributes};
use crate::error::StoreError;
use crate::hash::content_hash;
use crate::identity::IdentityKey;
use crate::queue::QueueItem;
use crate::store::{EntityId, PersistenceStore};

/// Terminal success of one item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row had the key; a new one was created
    Inserted(EntityId),
    /// Existing row rewritten (overwrite or merge)
    Updated(EntityId),
    /// Existing row left alone under [`DuplicatePolicy::SkipIfExists`]
    Skipped(EntityId),
    /// Write would not change the stored content hash; no call was made
    Unchanged(EntityId),
}

impl UpsertOutcome {
    pub fn id(self) -> EntityId {
        match self {
            Self::Inserted(id) | Self::Updated(id) | Self::Skipped(id) | Self::Unchanged(id) => id,
        }
    }
}

/// Per-item results of one flush, in batch order.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub outcomes: Vec<(u64, Result<UpsertOutcome, StoreError>)>,
}

impl FlushReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (u64, UpsertOutcome)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|(seq, r)| r.as_ref().ok().map(|o| (*seq, *o)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (u64, &StoreError)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|(seq, r)| r.as_ref().err().map(|e| (*seq, e)))
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }
}

/// Applies one [`DuplicatePolicy`] to every item it persists.
pub struct FlushExecutor<S> {
    store: S,
    policy: DuplicatePolicy,
}

impl<S: PersistenceStore> FlushExecutor<S> {
    pub fn new(store: S, policy: DuplicatePolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Persist every item of `batch` in order, one store call at a time.
    ///
    /// A failing item never prevents the following ones from being attempted.
    pub async fn persist(&self, batch: &[QueueItem]) -> FlushReport {
        let mut outcomes = Vec::with_capacity(batch.len());
        for item in batch {
            let result = self.upsert(&item.key, &item.entity).await;
            match &result {
                Ok(outcome) => log::trace!("{} (seq {}): row {}", item.key, item.seq, outcome.id()),
                Err(e) => log::debug!("{} (seq {}): {e}", item.key, item.seq),
            }
            outcomes.push((item.seq, result));
        }
        FlushReport { outcomes }
    }

    /// Insert-or-update one entity keyed by `key`.
    pub async fn upsert(
        &self,
        key: &IdentityKey,
        entity: &ScrapedEntity,
    ) -> Result<UpsertOutcome, StoreError> {
        let Some(existing) = self.store.find_by_identity(key).await? else {
            let id = self.store.insert(key, entity).await?;
            return Ok(UpsertOutcome::Inserted(id));
        };

        match self.policy {
            DuplicatePolicy::SkipIfExists => Ok(UpsertOutcome::Skipped(existing.id)),
            DuplicatePolicy::OverwriteExisting => {
                if content_hash(entity.attributes()) == existing.content_hash {
                    return Ok(UpsertOutcome::Unchanged(existing.id));
                }
                self.store.update(existing.id, entity).await?;
                Ok(UpsertOutcome::Updated(existing.id))
            }
            DuplicatePolicy::MergeFields => {
                let merged = merge_attributes(&existing.attributes, entity.attributes());
                if content_hash(&merged) == existing.content_hash {
                    return Ok(UpsertOutcome::Unchanged(existing.id));
                }
                let merged_entity =
                    ScrapedEntity::new(entity.identity(), merged, entity.meta().clone());
                self.store.update(existing.id, &merged_entity).await?;
                Ok(UpsertOutcome::Updated(existing.id))
            }
        }
    }
}
