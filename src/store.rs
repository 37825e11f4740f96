//! Durable, crash-safe storage for the doc_id -> IndexEntry catalog.
//!
//! The catalog is one JSON object in `index.json`, keyed by doc_id in
//! sorted order so diffs stay reviewable. All mutation happens under the
//! advisory file lock and is committed by writing a temp file and renaming
//! it over the target, so readers never observe a half-written store, only
//! a possibly stale one. Reads take no lock.

use std::{
    collections::BTreeMap,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::debug;

use crate::{
    entry::IndexEntry,
    error::{Error, Result},
    lock::IndexLock,
};

/// Fields of a [`IndexEntry`] that [`IndexStore::batch_update`] preserves
/// from the existing record when the incoming partial record leaves them
/// empty. Single-record [`IndexStore::update`] gives no such protection.
const PROTECTED_FIELDS: &[&str] = &["path", "url", "content_hash"];

pub struct IndexStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl IndexStore {
    pub fn new(
        path: impl Into<PathBuf>,
        lock_path: impl Into<PathBuf>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            lock_path: lock_path.into(),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full catalog. A missing file is an empty catalog, not an
    /// error.
    pub fn load_all(&self) -> Result<BTreeMap<String, IndexEntry>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(err) => return Err(err.into()),
        };
        let entries = serde_json::from_reader(BufReader::new(file))?;
        Ok(entries)
    }

    /// Look up a single entry by its live doc_id.
    ///
    /// Returns `Ok(None)` for an id that was never indexed; alias-aware
    /// resolution lives in the retrieval layer.
    pub fn get(&self, doc_id: &str) -> Result<Option<IndexEntry>> {
        Ok(self.load_all()?.remove(doc_id))
    }

    /// Replace the entire record for `doc_id`.
    ///
    /// This is not a field merge: callers that want to keep existing fields
    /// must read-modify-write explicitly.
    pub fn update(&self, doc_id: &str, entry: IndexEntry) -> Result<()> {
        self.mutate(true, |entries| {
            entries.insert(doc_id.to_string(), entry);
            Ok(())
        })
    }

    /// Apply many partial records in one locked transaction.
    ///
    /// Unlike [`update`](Self::update), this entry point is additive for
    /// the protected fields (`path`, `url`, `content_hash`): a partial
    /// record that leaves one of them empty inherits the existing value.
    /// The asymmetry is deliberate; see PROTECTED_FIELDS.
    pub fn batch_update(
        &self,
        updates: BTreeMap<String, IndexEntry>,
    ) -> Result<()> {
        self.batch_apply(updates, &[])
    }

    /// Batch updates plus removals as a single locked transaction, so a
    /// rename (new id in, old id out) commits atomically.
    pub fn batch_apply(
        &self,
        updates: BTreeMap<String, IndexEntry>,
        removals: &[String],
    ) -> Result<()> {
        if updates.is_empty() && removals.is_empty() {
            return Ok(());
        }
        self.mutate(false, |entries| {
            for (doc_id, mut incoming) in updates {
                if let Some(existing) = entries.get(&doc_id) {
                    merge_protected_fields(&mut incoming, existing);
                }
                entries.insert(doc_id, incoming);
            }
            for doc_id in removals {
                entries.remove(doc_id);
            }
            Ok(())
        })
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, doc_id: &str) -> Result<bool> {
        let mut removed = false;
        self.mutate(true, |entries| {
            removed = entries.remove(doc_id).is_some();
            Ok(())
        })?;
        Ok(removed)
    }

    /// Remove every entry matching the predicate. Returns how many were
    /// removed.
    pub fn remove_where(
        &self,
        predicate: impl Fn(&str, &IndexEntry) -> bool,
    ) -> Result<usize> {
        let mut count = 0;
        self.mutate(false, |entries| {
            let doomed: Vec<String> = entries
                .iter()
                .filter(|(id, entry)| predicate(id, entry))
                .map(|(id, _)| id.clone())
                .collect();
            count = doomed.len();
            for id in doomed {
                entries.remove(&id);
            }
            Ok(())
        })?;
        Ok(count)
    }

    /// Lock, load, apply, guard, and atomically persist one mutation.
    ///
    /// `single_entry` scopes the anti-truncation guard: a change touching
    /// one record can never legitimately empty a catalog that held more
    /// than one, so that outcome means the intermediate read was corrupt
    /// and the write is rejected before it happens.
    fn mutate(
        &self,
        single_entry: bool,
        apply: impl FnOnce(&mut BTreeMap<String, IndexEntry>) -> Result<()>,
    ) -> Result<()> {
        let _lock = IndexLock::acquire(&self.lock_path, self.lock_timeout)?;

        let mut entries = self.load_all()?;
        let previous = entries.len();
        apply(&mut entries)?;

        if single_entry && entries.is_empty() && previous > 1 {
            return Err(Error::StoreTruncation {
                path: self.path.clone(),
                previous,
            });
        }

        self.persist(&entries)?;
        debug!(
            path = %self.path.display(),
            entries = entries.len(),
            "committed index store write"
        );
        Ok(())
    }

    /// Write-to-temp-then-rename so readers never see a partial file.
    fn persist(
        &self,
        entries: &BTreeMap<String, IndexEntry>,
    ) -> Result<()> {
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let file = std::fs::File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, entries)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn merge_protected_fields(incoming: &mut IndexEntry, existing: &IndexEntry) {
    if incoming.path.is_empty() {
        incoming.path = existing.path.clone();
    }
    if incoming.url.is_empty() {
        incoming.url = existing.url.clone();
    }
    if incoming.content_hash.is_empty() {
        incoming.content_hash = existing.content_hash.clone();
    }
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
