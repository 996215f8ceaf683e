//! Append-only journal store
//!
//! Directory layout:
//! ```text
//! {dir}/
//! ├── journal.jsonl          # one insert/update per line, flushed per write
//! ├── journal.jsonl.tmp      # only while compacting
//! └── errors-{run}.jsonl     # error-record exports
//! ```
//!
//! Every row lives in memory; the journal is the durable copy. Replay applies
//! lines in order, so the last write per id wins.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use scrapeline_core::{
    EntityId, IdentityKey, PersistenceStore, ScrapedEntity, StoreError, StoredEntity,
};

pub const JOURNAL_FILE: &str = "journal.jsonl";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Op {
    Insert,
    Update,
}

#[derive(Serialize)]
struct JournalLine<'a> {
    op: Op,
    at: DateTime<Utc>,
    row: &'a StoredEntity,
}

#[derive(Deserialize)]
struct JournalRecord {
    op: Op,
    row: StoredEntity,
}

/// Journal line counts before and after [`JournalStore::compact`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactStats {
    pub lines_before: u64,
    pub lines_after: u64,
}

struct Inner {
    rows: FxHashMap<IdentityKey, StoredEntity>,
    keys_by_id: FxHashMap<EntityId, IdentityKey>,
    next_id: EntityId,
    writer: BufWriter<File>,
    /// Lines currently in the journal file
    lines: u64,
}

impl Inner {
    fn apply(&mut self, row: StoredEntity) {
        self.next_id = self.next_id.max(row.id);
        if let Some(old_key) = self.keys_by_id.insert(row.id, row.key.clone()) {
            if old_key != row.key {
                self.rows.remove(&old_key);
            }
        }
        self.rows.insert(row.key.clone(), row);
    }

    fn append(&mut self, op: Op, row: &StoredEntity) -> Result<(), StoreError> {
        let line = JournalLine {
            op,
            at: Utc::now(),
            row,
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.lines += 1;
        Ok(())
    }
}

/// Durable store backed by `journal.jsonl` in one directory.
pub struct JournalStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

/// Rows recovered from an existing journal.
struct Replay {
    rows: Vec<(Op, StoredEntity)>,
    /// Byte length of the intact prefix
    good_len: u64,
    torn: bool,
    /// Last intact line lacks its newline
    needs_newline: bool,
}

fn replay(path: &Path) -> Result<Replay, StoreError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    let mut replay = Replay {
        rows: Vec::new(),
        good_len: 0,
        torn: false,
        needs_newline: false,
    };
    let mut rest = &data[..];
    let mut line_no = 0usize;
    while !rest.is_empty() {
        line_no += 1;
        let (line, consumed, terminated) = match rest.iter().position(|&b| b == b'\n') {
            Some(i) => (&rest[..i], i + 1, true),
            None => (rest, rest.len(), false),
        };
        rest = &rest[consumed..];
        if line.trim_ascii().is_empty() {
            replay.good_len += consumed as u64;
            continue;
        }
        match serde_json::from_slice::<JournalRecord>(line) {
            Ok(record) => {
                replay.rows.push((record.op, record.row));
                replay.good_len += consumed as u64;
                replay.needs_newline = !terminated;
            }
            Err(e) if rest.is_empty() => {
                log::warn!(
                    "{}: dropping torn trailing line {line_no}: {e}",
                    path.display()
                );
                replay.torn = true;
            }
            Err(e) => {
                return Err(StoreError::Serialize(format!(
                    "{}:{line_no}: {e}",
                    path.display()
                )));
            }
        }
    }
    Ok(replay)
}

fn open_append(path: &Path) -> Result<File, StoreError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

impl JournalStore {
    /// Open (or create) the store in `dir`, replaying its journal.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE);
        let replay = replay(&path)?;

        let file = open_append(&path)?;
        if replay.torn {
            file.set_len(replay.good_len)?;
        }
        let mut writer = BufWriter::new(file);
        if replay.needs_newline {
            writer.write_all(b"\n")?;
            writer.flush()?;
        }

        let lines = replay.rows.len() as u64;
        let mut inner = Inner {
            rows: FxHashMap::default(),
            keys_by_id: FxHashMap::default(),
            next_id: 0,
            writer,
            lines,
        };
        for (op, row) in replay.rows {
            if op == Op::Update && !inner.keys_by_id.contains_key(&row.id) {
                log::warn!("{}: update for unknown row {}", path.display(), row.id);
            }
            inner.apply(row);
        }
        log::debug!(
            "opened {} ({} rows from {} lines)",
            path.display(),
            inner.rows.len(),
            lines
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Number of distinct rows
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lines in the journal file, including superseded writes
    pub fn journal_lines(&self) -> u64 {
        self.lock().lines
    }

    pub fn get(&self, key: &IdentityKey) -> Option<StoredEntity> {
        self.lock().rows.get(key).cloned()
    }

    /// All rows ordered by id.
    pub fn rows(&self) -> Vec<StoredEntity> {
        let mut rows: Vec<_> = self.lock().rows.values().cloned().collect();
        rows.sort_unstable_by_key(|r| r.id);
        rows
    }

    /// Rewrite the journal with one line per row (tmp file, then rename).
    pub fn compact(&self) -> Result<CompactStats, StoreError> {
        let mut inner = self.lock();
        let path = self.journal_path();
        let tmp = path.with_extension("jsonl.tmp");

        let mut rows: Vec<&StoredEntity> = inner.rows.values().collect();
        rows.sort_unstable_by_key(|r| r.id);
        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            let at = Utc::now();
            for &row in &rows {
                serde_json::to_writer(
                    &mut w,
                    &JournalLine {
                        op: Op::Insert,
                        at,
                        row,
                    },
                )?;
                w.write_all(b"\n")?;
            }
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        let lines_after = rows.len() as u64;
        fs::rename(&tmp, &path)?;

        inner.writer = BufWriter::new(open_append(&path)?);
        let lines_before = std::mem::replace(&mut inner.lines, lines_after);
        log::info!(
            "compacted {}: {lines_before} -> {lines_after} lines",
            path.display()
        );
        Ok(CompactStats {
            lines_before,
            lines_after,
        })
    }
}

impl PersistenceStore for JournalStore {
    async fn check(&self) -> Result<(), StoreError> {
        let meta = fs::metadata(self.journal_path())?;
        if meta.permissions().readonly() {
            return Err(StoreError::Unavailable(format!(
                "{} is read-only",
                self.journal_path().display()
            )));
        }
        Ok(())
    }

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
        let mut inner = self.lock();
        if inner.rows.contains_key(key) {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }
        let id = inner.next_id + 1;
        let row = StoredEntity::from_entity(id, key.clone(), entity);
        inner.append(Op::Insert, &row)?;
        inner.apply(row);
        Ok(id)
    }

    async fn update(&self, id: EntityId, entity: &ScrapedEntity) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let key = inner
            .keys_by_id
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })?;
        let row = StoredEntity::from_entity(id, key, entity);
        inner.append(Op::Update, &row)?;
        inner.apply(row);
        Ok(())
    }
}
