//! In-process store

use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use scrapeline_core::{
    EntityId, IdentityKey, PersistenceStore, ScrapedEntity, StoreError, StoredEntity,
};

#[derive(Default)]
struct Rows {
    by_key: FxHashMap<IdentityKey, StoredEntity>,
    keys_by_id: FxHashMap<EntityId, IdentityKey>,
    next_id: EntityId,
}

/// Rows kept in memory only; used by `--dry-run`.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Rows>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &IdentityKey) -> Option<StoredEntity> {
        self.lock().by_key.get(key).cloned()
    }
}

impl PersistenceStore for MemoryStore {
    async fn find_by_identity(
        &self,
        key: &IdentityKey,
    ) -> Result<Option<StoredEntity>, StoreError> {
        Ok(self.get(key))
    }

    async fn insert(
        &self,
        key: &IdentityKey,
        entity: &ScrapedEntity,
    ) -> Result<EntityId, StoreError> {
        let mut rows = self.lock();
        if rows.by_key.contains_key(key) {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }
        rows.next_id += 1;
        let id = rows.next_id;
        rows.keys_by_id.insert(id, key.clone());
        rows.by_key
            .insert(key.clone(), StoredEntity::from_entity(id, key.clone(), entity));
        Ok(id)
    }

    async fn update(&self, id: EntityId, entity: &ScrapedEntity) -> Result<(), StoreError> {
        let mut rows = self.lock();
        let key = rows
            .keys_by_id
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })?;
        rows.by_key
            .insert(key.clone(), StoredEntity::from_entity(id, key, entity));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapeline_core::{AttrValue, RawEntity, ScrapeMeta};

    fn entity(identity: &str, n: i64) -> ScrapedEntity {
        ScrapedEntity::from_raw(
            RawEntity::new(identity).with("n", n),
            ScrapeMeta {
                page: 1,
                run_started_at: chrono::Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn insert_find_update() {
        let store = MemoryStore::new();
        let key = IdentityKey::parse("a.example").unwrap();
        assert!(store.find_by_identity(&key).await.unwrap().is_none());

        let id = store.insert(&key, &entity("a.example", 1)).await.unwrap();
        store.update(id, &entity("a.example", 2)).await.unwrap();

        let row = store.find_by_identity(&key).await.unwrap().unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.attributes["n"], AttrValue::Integer(2));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn second_insert_for_key_conflicts() {
        let store = MemoryStore::new();
        let key = IdentityKey::parse("a.example").unwrap();
        store.insert(&key, &entity("a.example", 1)).await.unwrap();
        let err = store.insert(&key, &entity("a.example", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }
}
