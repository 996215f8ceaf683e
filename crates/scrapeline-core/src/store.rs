//! Persistence store contract
//!
//! The store is an external collaborator: the pipeline only ever looks rows up
//! by [`IdentityKey`], inserts new ones and updates existing ones by id.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{Attributes, ScrapeMeta, ScrapedEntity};
use crate::error::StoreError;
use crate::hash::content_hash;
use crate::identity::IdentityKey;

/// Store-generated row id
pub type EntityId = u64;

/// Row as held by a persistence store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub id: EntityId,
    pub key: IdentityKey,
    /// Raw identity of the last write
    pub identity: String,
    pub attributes: Attributes,
    /// Blake3 hex digest of `attributes`
    pub content_hash: String,
    pub meta: ScrapeMeta,
}

impl StoredEntity {
    /// Build the row a store keeps for `entity`.
    pub fn from_entity(id: EntityId, key: IdentityKey, entity: &ScrapedEntity) -> Self {
        Self {
            id,
            key,
            identity: entity.identity().to_string(),
            attributes: entity.attributes().clone(),
            content_hash: content_hash(entity.attributes()),
            meta: entity.meta().clone(),
        }
    }
}

/// Identity-keyed lookup / insert / update.
///
/// Implementations must be safe to share with the background flush timer.
pub trait PersistenceStore: Send + Sync + 'static {
    /// Connectivity check run once at pipeline start.
    fn check(&self) -> impl Future<Output = Result<(), StoreError>> + Send {
        async { Ok(()) }
    }

    fn find_by_identity(
        &self,
        key: &IdentityKey,
    ) -> impl Future<Output = Result<Option<StoredEntity>, StoreError>> + Send;

    /// Insert a new row, returning its generated id.
    fn insert(
        &self,
        key: &IdentityKey,
        entity: &ScrapedEntity,
    ) -> impl Future<Output = Result<EntityId, StoreError>> + Send;

    /// Replace the attributes of row `id`.
    fn update(
        &self,
        id: EntityId,
        entity: &ScrapedEntity,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<S: PersistenceStore> PersistenceStore for Arc<S> {
    fn check(&self) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).check()
    }

    fn find_by_identity(
        &self,
        key: &IdentityKey,
    ) -> impl Future<Output = Result<Option<StoredEntity>, StoreError>> + Send {
        (**self).find_by_identity(key)
    }

    fn insert(
        &self,
        key: &IdentityKey,
        entity: &ScrapedEntity,
    ) -> impl Future<Output = Result<EntityId, StoreError>> + Send {
        (**self).insert(key, entity)
    }

    fn update(
        &self,
        id: EntityId,
        entity: &ScrapedEntity,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).update(id, entity)
    }
}
