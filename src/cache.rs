//! Derived inverted-index cache over the index store.
//!
//! Pure cache: everything here can be rebuilt from `index.json` at any
//! time, so deleting it is always safe and no locking is needed. Staleness
//! is detected opportunistically by readers; concurrent rebuilds race
//! harmlessly since the last writer wins and every rebuild derives from the
//! same store.

use std::{
    collections::HashMap,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    doc_id,
    entry::IndexEntry,
    error::Result,
    store::IndexStore,
};

/// Schema version of the cache builder. Bumped whenever postings change in
/// a way that invalidates caches built by older binaries.
pub const CACHE_FORMAT_VERSION: u32 = 2;

/// Where in an entry a cached term came from. Recorded as a weight hint so
/// the ranking layer can score shortlisted candidates without re-deriving
/// the field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TermField {
    Tag,
    Keyword,
    Title,
    DocId,
    SubsectionHeading,
    SubsectionKeyword,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: String,
    pub field: TermField,
}

/// Version record written next to the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub cache_format_version: u32,
    pub producer_fingerprint: String,
    /// Digest of the index store file at build time.
    pub source_hash: String,
    /// Store mtime at build time; the fast-path freshness check.
    pub source_mtime: u64,
}

/// Digest identifying the exact cache-building logic, so a logic change
/// invalidates surviving caches even without a format version bump.
pub fn producer_fingerprint() -> String {
    let seed = format!(
        "docdex-cache/v{CACHE_FORMAT_VERSION}/{}",
        crate::search::scoring_fingerprint()
    );
    blake3::hash(seed.as_bytes()).to_hex().to_string()
}

/// Status report for the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub valid: bool,
    pub format_version: Option<u32>,
    pub age_secs: Option<u64>,
}

pub struct SearchCache {
    payload_path: PathBuf,
    meta_path: PathBuf,
}

impl SearchCache {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            payload_path: cache_dir.join("terms.json"),
            meta_path: cache_dir.join("meta.json"),
        }
    }

    /// Whether the cache may be served without a rebuild.
    ///
    /// Check order: both files exist, format version matches, then the
    /// mtime fast path, then the content-hash slow path. When the mtime
    /// differs but the hash still matches (the store was touched, not
    /// edited), the recorded mtime is refreshed so the next check takes
    /// the fast path again.
    pub fn is_valid(&self, store: &IndexStore) -> Result<bool> {
        self.check_valid(store, true)
    }

    fn check_valid(
        &self,
        store: &IndexStore,
        refresh_meta: bool,
    ) -> Result<bool> {
        if !self.payload_path.exists() {
            return Ok(false);
        }
        let Some(meta) = self.read_meta()? else {
            return Ok(false);
        };

        if meta.cache_format_version != CACHE_FORMAT_VERSION {
            return Ok(false);
        }
        if meta.producer_fingerprint != producer_fingerprint() {
            return Ok(false);
        }

        // Fast path. An equal mtime is only conclusive when the store
        // timestamp is strictly older than the version record's own write
        // time: a store edit landing within the filesystem's timestamp
        // granularity of the cache build leaves the mtime unchanged, and
        // that racily-clean window must fall through to the hash.
        let current_mtime = file_mtime(store.path());
        if current_mtime != 0
            && current_mtime == meta.source_mtime
            && current_mtime < file_mtime(&self.meta_path)
        {
            return Ok(true);
        }

        let current_hash = store_hash(store.path())?;
        if current_hash == meta.source_hash {
            if refresh_meta {
                // Touched but not edited: refresh the recorded mtime so
                // the next check is O(1) again.
                let refreshed = CacheMeta {
                    source_mtime: current_mtime,
                    ..meta
                };
                self.write_meta(&refreshed)?;
            }
            return Ok(true);
        }

        Ok(false)
    }

    /// Derive the inverted index from a full store read and replace both
    /// cache files. Idempotent; never writes to the store itself.
    pub fn rebuild(&self, store: &IndexStore) -> Result<()> {
        let entries = store.load_all()?;
        let postings = build_postings(&entries);

        {
            let file = std::fs::File::create(&self.payload_path)?;
            serde_json::to_writer(BufWriter::new(file), &postings)?;
        }

        let meta = CacheMeta {
            cache_format_version: CACHE_FORMAT_VERSION,
            producer_fingerprint: producer_fingerprint(),
            source_hash: store_hash(store.path())?,
            source_mtime: file_mtime(store.path()),
        };
        self.write_meta(&meta)?;

        debug!(terms = postings.len(), "rebuilt search cache");
        Ok(())
    }

    /// Load the payload. Callers should have checked validity first.
    pub fn load(&self) -> Result<HashMap<String, Vec<Posting>>> {
        let file = std::fs::File::open(&self.payload_path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Return a fresh payload, rebuilding first if the cache is stale.
    pub fn ensure(
        &self,
        store: &IndexStore,
    ) -> Result<HashMap<String, Vec<Posting>>> {
        if !self.is_valid(store)? {
            self.rebuild(store)?;
        }
        self.load()
    }

    /// Delete payload and version record. Always safe.
    pub fn clear(&self) -> Result<()> {
        for path in [&self.payload_path, &self.meta_path] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err)
                    if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Reporting is read-only: unlike [`is_valid`](Self::is_valid), it
    /// never rewrites the version record.
    pub fn status(&self, store: &IndexStore) -> Result<CacheStatus> {
        let meta = self.read_meta()?;
        let age_secs = self
            .payload_path
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .map(|d| d.as_secs());
        Ok(CacheStatus {
            valid: self.check_valid(store, false)?,
            format_version: meta.map(|m| m.cache_format_version),
            age_secs,
        })
    }

    fn read_meta(&self) -> Result<Option<CacheMeta>> {
        let body = match std::fs::read_to_string(&self.meta_path) {
            Ok(b) => b,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        // A corrupt version record just means "rebuild".
        Ok(serde_json::from_str(&body).ok())
    }

    fn write_meta(&self, meta: &CacheMeta) -> Result<()> {
        let body = serde_json::to_string_pretty(meta)?;
        std::fs::write(&self.meta_path, body)?;
        Ok(())
    }
}

/// Nanosecond mtime, so two writes within the same second still differ.
fn file_mtime(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn store_hash(path: &Path) -> Result<String> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Vec::new()
        }
        Err(err) => return Err(err.into()),
    };
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn build_postings(
    entries: &std::collections::BTreeMap<String, IndexEntry>,
) -> HashMap<String, Vec<Posting>> {
    let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
    let mut add = |term: &str, doc_id: &str, field: TermField| {
        let term = term.to_ascii_lowercase();
        if term.is_empty() {
            return;
        }
        let list = postings.entry(term).or_default();
        let posting = Posting {
            doc_id: doc_id.to_string(),
            field,
        };
        if !list.contains(&posting) {
            list.push(posting);
        }
    };

    for (id, entry) in entries {
        for tag in &entry.tags {
            add(tag, id, TermField::Tag);
        }
        for kw in &entry.keywords {
            add(kw, id, TermField::Keyword);
        }
        for token in entry.title.split_whitespace() {
            add(
                token.trim_matches(|c: char| !c.is_ascii_alphanumeric()),
                id,
                TermField::Title,
            );
        }
        for token in doc_id::tokens(id) {
            add(token, id, TermField::DocId);
        }
        // The whole id in normalized form, so a query straddling token
        // boundaries still shortlists the document.
        add(&doc_id::normalize(id), id, TermField::DocId);
        for section in &entry.subsections {
            for token in section.heading.split_whitespace() {
                add(
                    token.trim_matches(|c: char| {
                        !c.is_ascii_alphanumeric()
                    }),
                    id,
                    TermField::SubsectionHeading,
                );
            }
            for kw in &section.keywords {
                add(kw, id, TermField::SubsectionKeyword);
            }
        }
    }

    postings
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use filetime_shim::touch_with_mtime;

    use super::*;

    /// Minimal mtime adjustment without an extra dev-dependency.
    mod filetime_shim {
        use std::path::Path;

        /// Rewrite the file with its own contents, bumping mtime only.
        pub fn touch_with_mtime(path: &Path) {
            let contents = std::fs::read(path).unwrap();
            // Sleep so the new mtime is guaranteed to differ.
            std::thread::sleep(std::time::Duration::from_millis(20));
            std::fs::write(path, contents).unwrap();
        }
    }

    fn setup() -> (tempfile::TempDir, IndexStore, SearchCache) {
        let tmp = tempfile::tempdir().unwrap();
        let store = IndexStore::new(
            tmp.path().join("index.json"),
            tmp.path().join("index.lock"),
            Duration::from_secs(1),
        );
        let cache = SearchCache::new(tmp.path());
        (tmp, store, cache)
    }

    fn entry(title: &str, tag: &str) -> IndexEntry {
        IndexEntry {
            path: format!("{tag}.md"),
            content_hash: format!("hash-{tag}"),
            title: title.to_string(),
            tags: [tag.to_string()].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_cache_is_invalid() {
        let (_tmp, store, cache) = setup();
        assert!(!cache.is_valid(&store).unwrap());
    }

    #[test]
    fn rebuild_makes_cache_valid() {
        let (_tmp, store, cache) = setup();
        store.update("doc-a", entry("Alpha Doc", "alpha")).unwrap();

        cache.rebuild(&store).unwrap();
        assert!(cache.is_valid(&store).unwrap());
    }

    #[test]
    fn store_edit_invalidates() {
        let (_tmp, store, cache) = setup();
        store.update("doc-a", entry("Alpha Doc", "alpha")).unwrap();
        cache.rebuild(&store).unwrap();

        store.update("doc-b", entry("Beta Doc", "beta")).unwrap();
        assert!(!cache.is_valid(&store).unwrap());
    }

    #[test]
    fn edit_within_timestamp_granularity_invalidates() {
        // Rebuild and edit back to back with no sleep: on filesystems
        // with coarse timestamps the edited store keeps the recorded
        // mtime, and only the hash comparison can catch the change.
        let (_tmp, store, cache) = setup();
        for i in 0..5 {
            store
                .update(&format!("doc-{i}"), entry("Doc", "tag"))
                .unwrap();
            cache.rebuild(&store).unwrap();
            store
                .update(&format!("doc-{i}-b"), entry("Doc B", "tagb"))
                .unwrap();
            assert!(
                !cache.is_valid(&store).unwrap(),
                "edit immediately after rebuild must invalidate"
            );
        }
    }

    #[test]
    fn touch_without_edit_stays_valid_and_refreshes_meta() {
        let (_tmp, store, cache) = setup();
        store.update("doc-a", entry("Alpha Doc", "alpha")).unwrap();
        cache.rebuild(&store).unwrap();
        let before = cache.read_meta().unwrap().unwrap();

        touch_with_mtime(store.path());
        assert!(cache.is_valid(&store).unwrap(), "same hash, still valid");

        let after = cache.read_meta().unwrap().unwrap();
        assert_eq!(after.source_hash, before.source_hash);
        assert_ne!(
            after.source_mtime, before.source_mtime,
            "recorded mtime refreshed for the next fast-path check"
        );
        // And the follow-up check is the fast path.
        assert!(cache.is_valid(&store).unwrap());
    }

    #[test]
    fn version_mismatch_invalidates() {
        let (_tmp, store, cache) = setup();
        store.update("doc-a", entry("Alpha Doc", "alpha")).unwrap();
        cache.rebuild(&store).unwrap();

        let mut meta = cache.read_meta().unwrap().unwrap();
        meta.cache_format_version += 1;
        cache.write_meta(&meta).unwrap();

        assert!(!cache.is_valid(&store).unwrap());
    }

    #[test]
    fn fingerprint_mismatch_invalidates() {
        let (_tmp, store, cache) = setup();
        store.update("doc-a", entry("Alpha Doc", "alpha")).unwrap();
        cache.rebuild(&store).unwrap();

        let mut meta = cache.read_meta().unwrap().unwrap();
        meta.producer_fingerprint = "stale-builder".to_string();
        cache.write_meta(&meta).unwrap();

        assert!(!cache.is_valid(&store).unwrap());
    }

    #[test]
    fn clear_is_safe_and_idempotent() {
        let (_tmp, store, cache) = setup();
        store.update("doc-a", entry("Alpha Doc", "alpha")).unwrap();
        cache.rebuild(&store).unwrap();

        cache.clear().unwrap();
        assert!(!cache.is_valid(&store).unwrap());
        cache.clear().unwrap();
    }

    #[test]
    fn postings_cover_all_fields() {
        let (_tmp, store, cache) = setup();
        let mut e = entry("Hook Reference", "hooks");
        e.keywords.insert("pretooluse".to_string());
        e.subsections.push(crate::entry::Subsection {
            heading: "Configuring Matchers".to_string(),
            level: 2,
            anchor: "configuring-matchers".to_string(),
            keywords: vec!["matchers".to_string()],
        });
        store.update("en-hooks", e).unwrap();

        let postings = cache.ensure(&store).unwrap();
        assert!(postings.contains_key("hooks"), "tag and doc_id token");
        assert!(postings.contains_key("pretooluse"), "keyword");
        assert!(postings.contains_key("reference"), "title token");
        assert!(postings.contains_key("configuring"), "heading token");
        assert!(postings.contains_key("matchers"), "subsection keyword");
        assert!(postings.contains_key("enhooks"), "whole normalized id");

        let fields: Vec<TermField> = postings["hooks"]
            .iter()
            .map(|p| p.field)
            .collect();
        assert!(fields.contains(&TermField::Tag));
        assert!(fields.contains(&TermField::DocId));
    }

    #[test]
    fn ensure_rebuilds_when_stale() {
        let (_tmp, store, cache) = setup();
        store.update("doc-a", entry("Alpha Doc", "alpha")).unwrap();

        // No cache yet: ensure builds one.
        let postings = cache.ensure(&store).unwrap();
        assert!(postings.contains_key("alpha"));
        assert!(cache.is_valid(&store).unwrap());
    }

    #[test]
    fn status_never_rewrites_meta() {
        let (_tmp, store, cache) = setup();
        store.update("doc-a", entry("Alpha Doc", "alpha")).unwrap();
        cache.rebuild(&store).unwrap();
        let before = std::fs::read(&cache.meta_path).unwrap();

        // A touched store takes the slow path; status must still leave
        // the version record alone.
        touch_with_mtime(store.path());
        let status = cache.status(&store).unwrap();
        assert!(status.valid);
        assert_eq!(std::fs::read(&cache.meta_path).unwrap(), before);
    }

    #[test]
    fn status_reports_state() {
        let (_tmp, store, cache) = setup();
        let status = cache.status(&store).unwrap();
        assert!(!status.valid);
        assert_eq!(status.format_version, None);

        store.update("doc-a", entry("Alpha Doc", "alpha")).unwrap();
        cache.rebuild(&store).unwrap();
        let status = cache.status(&store).unwrap();
        assert!(status.valid);
        assert_eq!(status.format_version, Some(CACHE_FORMAT_VERSION));
        assert!(status.age_secs.is_some());
    }
}
