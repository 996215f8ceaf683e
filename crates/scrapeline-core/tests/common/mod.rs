//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use scrapeline_core::{
    EntityId, ExtractionError, ExtractionSource, IdentityKey, Page, PersistenceStore, RawEntity,
    ScrapedEntity, StoreError, StoredEntity,
};

/// In-memory store recording every call, with scripted failures and latency.
#[derive(Default)]
pub struct RecordingStore {
    rows: Mutex<HashMap<IdentityKey, StoredEntity>>,
    next_id: Mutex<EntityId>,
    /// Identity keys of every successful insert, in call order
    pub inserts: Mutex<Vec<String>>,
    pub updates: Mutex<Vec<EntityId>>,
    /// identity key -> remaining insert failures (u32::MAX fails forever)
    failures: Mutex<HashMap<String, u32>>,
    /// Insert attempts per identity key
    pub attempts: Mutex<HashMap<String, u32>>,
    latency: Option<Duration>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn fail_times(self, key: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(key.to_string(), times);
        self
    }

    pub fn fail_always(self, key: &str) -> Self {
        self.fail_times(key, u32::MAX)
    }

    pub fn inserted(&self) -> Vec<String> {
        self.inserts.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, key: &str) -> u32 {
        self.attempts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn row(&self, key: &str) -> Option<StoredEntity> {
        let key = IdentityKey::parse(key).ok()?;
        self.rows.lock().unwrap().get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    async fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PersistenceStore for RecordingStore {
    async fn find_by_identity(
        &self,
        key: &IdentityKey,
    ) -> Result<Option<StoredEntity>, StoreError> {
        Ok(self.rows.lock().unwrap().get(key).cloned())
    }

    async fn insert(
        &self,
        key: &IdentityKey,
        entity: &ScrapedEntity,
    ) -> Result<EntityId, StoreError> {
        self.enter().await;
        let result = {
            *self
                .attempts
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default() += 1;
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(key.as_str()) {
                Some(left) if *left > 0 => {
                    if *left != u32::MAX {
                        *left -= 1;
                    }
                    Err(StoreError::Unavailable("injected failure".into()))
                }
                _ => {
                    let mut next_id = self.next_id.lock().unwrap();
                    *next_id += 1;
                    let id = *next_id;
                    self.rows
                        .lock()
                        .unwrap()
                        .insert(key.clone(), StoredEntity::from_entity(id, key.clone(), entity));
                    self.inserts.lock().unwrap().push(key.to_string());
                    Ok(id)
                }
            }
        };
        self.leave();
        result
    }

    async fn update(&self, id: EntityId, entity: &ScrapedEntity) -> Result<(), StoreError> {
        self.enter().await;
        let result = {
            let mut rows = self.rows.lock().unwrap();
            match rows.values_mut().find(|r| r.id == id) {
                Some(row) => {
                    *row = StoredEntity::from_entity(id, row.key.clone(), entity);
                    self.updates.lock().unwrap().push(id);
                    Ok(())
                }
                None => Err(StoreError::NotFound { id }),
            }
        };
        self.leave();
        result
    }
}

/// Source serving fixed pages; pages past the end report `End`.
pub struct VecSource {
    pages: Vec<Vec<RawEntity>>,
}

impl VecSource {
    pub fn new(pages: Vec<Vec<RawEntity>>) -> Self {
        Self { pages }
    }

    /// `n` single-record pages with identities `https://site.example/{i}`
    pub fn numbered(n: usize) -> Self {
        Self::new(
            (0..n)
                .map(|i| vec![RawEntity::new(format!("https://site.example/{i}"))])
                .collect(),
        )
    }
}

impl ExtractionSource for VecSource {
    async fn fetch_page(&self, page: u32) -> Result<Page, ExtractionError> {
        match page
            .checked_sub(1)
            .and_then(|i| self.pages.get(i as usize))
        {
            Some(records) => Ok(Page::Records(records.clone())),
            None => Ok(Page::End),
        }
    }
}

pub fn raw(identity: &str) -> RawEntity {
    RawEntity::new(identity)
}
