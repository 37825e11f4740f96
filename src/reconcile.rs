//! Drift reconciliation between the catalog, the local docs tree, and
//! remote sources.
//!
//! A pass never holds the index lock while walking or probing: decisions
//! accumulate in memory and commit as one locked batch at the end. Stale
//! entries are only ever flagged, never deleted; deletion is the explicit
//! prune operation.

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    time::SystemTime,
};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    doc_id,
    entry::{IndexEntry, StaleReason},
    error::Result,
    extract::MetadataExtractor,
    fetch::{self, FetchOutcome, SourceFetcher},
    store::IndexStore,
    walker,
};

/// Per-category counts for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub new: usize,
    pub updated: usize,
    pub renamed: usize,
    pub unchanged: usize,
    pub missing: usize,
    pub remote_stale: usize,
    /// Probes whose transient failures outlived the fetcher's retries.
    /// No state change; not counted as a transition.
    pub probe_failures: usize,
}

impl ReconcileSummary {
    /// Number of state transitions the pass produced. Zero on the second
    /// of two back-to-back runs with no drift in between.
    pub fn transitions(&self) -> usize {
        self.new + self.updated + self.renamed + self.missing
            + self.remote_stale
    }
}

pub struct Reconciler<'a> {
    store: &'a IndexStore,
    config: &'a Config,
    extractor: &'a dyn MetadataExtractor,
}

struct HashedFile {
    relative: String,
    hash: String,
    body: String,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a IndexStore,
        config: &'a Config,
        extractor: &'a dyn MetadataExtractor,
    ) -> Self {
        Self {
            store,
            config,
            extractor,
        }
    }

    /// Walk the docs tree and reconcile the catalog against it.
    pub fn run_local(&self) -> Result<ReconcileSummary> {
        let entries = self.store.load_all()?;
        let files = walker::discover_files(&self.config.docs_dir)?;

        // Hash the whole tree up front, in parallel. The hash is always
        // recomputed from the on-disk body, never taken from the caller.
        let hashed: Vec<HashedFile> = files
            .par_iter()
            .filter_map(|file| {
                match std::fs::read_to_string(&file.absolute_path) {
                    Ok(body) => Some(HashedFile {
                        relative: file
                            .relative_path
                            .to_string_lossy()
                            .to_string(),
                        hash: fetch::hash_body(&body),
                        body,
                    }),
                    Err(err) => {
                        warn!(
                            path = %file.absolute_path.display(),
                            %err,
                            "skipping unreadable file"
                        );
                        None
                    }
                }
            })
            .collect();

        let seen_paths: HashSet<&str> =
            hashed.iter().map(|h| h.relative.as_str()).collect();

        let mut summary = ReconcileSummary::default();
        let mut updates: BTreeMap<String, IndexEntry> = BTreeMap::new();
        let mut removals: Vec<String> = Vec::new();

        for file in &hashed {
            let id = doc_id::from_path(Path::new(&file.relative));

            if let Some(existing) = entries.get(&id) {
                if existing.content_hash == file.hash {
                    if existing.stale {
                        // The file is back and matches; unflag it.
                        let mut entry = existing.clone();
                        entry.clear_stale();
                        updates.insert(id, entry);
                        summary.updated += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                } else {
                    let entry = self.refresh_entry(existing, file);
                    updates.insert(id, entry);
                    summary.updated += 1;
                }
                continue;
            }

            // Same content under a different derived id, and the old
            // location is gone: a rename, not a new document.
            let moved = entries.iter().find(|(old_id, old)| {
                old.content_hash == file.hash
                    && !old.content_hash.is_empty()
                    && **old_id != id
                    && !seen_paths.contains(old.path.as_str())
                    && !removals.contains(old_id)
            });
            if let Some((old_id, old)) = moved {
                let mut entry = old.clone();
                entry.path = file.relative.clone();
                entry.aliases.insert(old_id.clone());
                // An alias may never shadow the live id.
                entry.aliases.remove(&id);
                entry.clear_stale();
                self.assign_urls(&mut entry, &file.relative);
                entry.indexed_at = Some(unix_now());

                debug!(old = %old_id, new = %id, "rename detected");
                removals.push(old_id.clone());
                updates.insert(id, entry);
                summary.renamed += 1;
                continue;
            }

            let entry = self.new_entry(file);
            updates.insert(id, entry);
            summary.new += 1;
        }

        // Anything still cataloged but absent on disk is flagged, not
        // deleted.
        for (id, entry) in &entries {
            if updates.contains_key(id) || removals.contains(id) {
                continue;
            }
            if seen_paths.contains(entry.path.as_str()) {
                continue;
            }
            if entry.stale
                && entry.stale_reason == Some(StaleReason::MissingFile)
            {
                continue; // already flagged on a previous pass
            }
            let mut flagged = entry.clone();
            flagged.mark_stale(StaleReason::MissingFile);
            updates.insert(id.clone(), flagged);
            summary.missing += 1;
        }

        self.store.batch_apply(updates, &removals)?;
        info!(
            new = summary.new,
            updated = summary.updated,
            renamed = summary.renamed,
            unchanged = summary.unchanged,
            missing = summary.missing,
            "local reconciliation committed"
        );
        Ok(summary)
    }

    /// Probe each entry's remote source and flag drift.
    ///
    /// One slow or failing probe never blocks the pass: the fan-out is
    /// parallel, per-probe timeouts live inside the fetcher, and failures
    /// are absorbed into per-document state or the failure count.
    pub fn run_remote(
        &self,
        fetcher: &dyn SourceFetcher,
    ) -> Result<ReconcileSummary> {
        let entries = self.store.load_all()?;

        let probes: Vec<(&String, &IndexEntry)> = entries
            .iter()
            .filter(|(_, entry)| {
                !entry.source_url.is_empty()
                    && entry.stale_reason != Some(StaleReason::MissingFile)
            })
            .collect();

        let outcomes: Vec<(String, FetchOutcome)> = probes
            .par_iter()
            .map(|(id, entry)| {
                ((*id).clone(), fetcher.fetch(&entry.source_url))
            })
            .collect();

        let mut summary = ReconcileSummary::default();
        let mut updates: BTreeMap<String, IndexEntry> = BTreeMap::new();

        for (id, outcome) in outcomes {
            let entry = &entries[&id];
            match outcome {
                FetchOutcome::NotFound => {
                    if entry.stale_reason != Some(StaleReason::Remote404) {
                        let mut flagged = entry.clone();
                        flagged.mark_stale(StaleReason::Remote404);
                        updates.insert(id, flagged);
                        summary.remote_stale += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
                FetchOutcome::Fetched { content_hash, .. } => {
                    if content_hash != entry.content_hash {
                        if entry.stale_reason
                            != Some(StaleReason::ContentHashMismatch)
                        {
                            let mut flagged = entry.clone();
                            flagged.mark_stale(
                                StaleReason::ContentHashMismatch,
                            );
                            updates.insert(id, flagged);
                            summary.remote_stale += 1;
                        } else {
                            summary.unchanged += 1;
                        }
                    } else if entry.stale {
                        // Remote matches again; the flag is obsolete.
                        let mut cleared = entry.clone();
                        cleared.clear_stale();
                        updates.insert(id, cleared);
                        summary.updated += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
                FetchOutcome::Transient(reason) => {
                    warn!(doc_id = %id, %reason, "remote probe failed");
                    summary.probe_failures += 1;
                }
            }
        }

        self.store.batch_update(updates)?;
        info!(
            remote_stale = summary.remote_stale,
            cleared = summary.updated,
            failures = summary.probe_failures,
            "remote reconciliation committed"
        );
        Ok(summary)
    }

    fn new_entry(&self, file: &HashedFile) -> IndexEntry {
        let relative = Path::new(&file.relative);
        let meta = self.extractor.extract(&file.body, relative);

        let mut entry = IndexEntry {
            path: file.relative.clone(),
            content_hash: file.hash.clone(),
            title: meta.title,
            description: meta.description,
            keywords: meta.keywords,
            tags: meta.tags,
            category: meta.category,
            domain: meta.domain,
            subsections: meta.subsections,
            indexed_at: Some(unix_now()),
            ..Default::default()
        };
        self.assign_urls(&mut entry, &file.relative);
        entry
    }

    /// Rebuild the derived metadata of an existing entry whose body
    /// changed, preserving identity fields (url, aliases, published_at,
    /// unknown extras).
    fn refresh_entry(
        &self,
        existing: &IndexEntry,
        file: &HashedFile,
    ) -> IndexEntry {
        let relative = Path::new(&file.relative);
        let meta = self.extractor.extract(&file.body, relative);

        let mut entry = existing.clone();
        entry.path = file.relative.clone();
        entry.content_hash = file.hash.clone();
        entry.title = meta.title;
        entry.description = meta.description;
        entry.keywords = meta.keywords;
        entry.tags = meta.tags;
        entry.category = meta.category;
        entry.subsections = meta.subsections;
        entry.indexed_at = Some(unix_now());
        entry.clear_stale();
        entry
    }

    /// Derive url/source_url/domain from the configured base URL. Without
    /// one, existing values are left alone; there is nothing to derive
    /// from.
    fn assign_urls(&self, entry: &mut IndexEntry, relative: &str) {
        let Some(base) = &self.config.base_url else {
            return;
        };
        let slug = PathBuf::from(relative)
            .with_extension("")
            .to_string_lossy()
            .to_string();
        entry.url = format!("{}/{}", base.trim_end_matches('/'), slug);
        entry.source_url =
            format!("{}/{}", base.trim_end_matches('/'), relative);
        if let Some(domain) = doc_id::url_domain(&entry.url) {
            entry.domain = domain;
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::extract::MarkdownExtractor;

    struct Fixture {
        _tmp: tempfile::TempDir,
        store: IndexStore,
        config: Config,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir =
            crate::data_dir::DataDir::resolve(Some(tmp.path())).unwrap();
        let config = Config::from_data_dir(&data_dir).unwrap();
        let store = IndexStore::new(
            &config.index_path,
            &config.lock_path,
            Duration::from_secs(1),
        );
        Fixture {
            _tmp: tmp,
            store,
            config,
        }
    }

    fn write_doc(fx: &Fixture, rel: &str, body: &str) {
        let path = fx.config.docs_dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, body).unwrap();
    }

    fn reconcile(fx: &Fixture) -> ReconcileSummary {
        Reconciler::new(&fx.store, &fx.config, &MarkdownExtractor)
            .run_local()
            .unwrap()
    }

    struct StubFetcher {
        outcome_for: fn(&str) -> FetchOutcome,
    }

    impl SourceFetcher for StubFetcher {
        fn fetch(&self, url: &str) -> FetchOutcome {
            (self.outcome_for)(url)
        }
    }

    #[test]
    fn first_pass_indexes_everything_as_new() {
        let fx = fixture();
        write_doc(&fx, "en/hooks.md", "# Hooks\n\nBody.\n");
        write_doc(&fx, "en/agents.md", "# Agents\n\nBody.\n");

        let summary = reconcile(&fx);
        assert_eq!(summary.new, 2);
        assert_eq!(summary.transitions(), 2);

        let entries = fx.store.load_all().unwrap();
        assert!(entries.contains_key("en-hooks"));
        assert!(entries.contains_key("en-agents"));
        assert_eq!(entries["en-hooks"].title, "Hooks");
        assert!(!entries["en-hooks"].content_hash.is_empty());
        assert!(entries["en-hooks"].indexed_at.is_some());
    }

    #[test]
    fn second_pass_is_idempotent() {
        let fx = fixture();
        write_doc(&fx, "en/hooks.md", "# Hooks\n\nBody.\n");

        reconcile(&fx);
        let second = reconcile(&fx);
        assert_eq!(second.transitions(), 0, "no drift, no transitions");
        assert_eq!(second.unchanged, 1);
    }

    #[test]
    fn edited_file_is_updated_with_fresh_metadata() {
        let fx = fixture();
        write_doc(&fx, "en/hooks.md", "# Hooks\n\nOld body.\n");
        reconcile(&fx);
        let old_hash =
            fx.store.get("en-hooks").unwrap().unwrap().content_hash;

        write_doc(
            &fx,
            "en/hooks.md",
            "# Hook Events\n\nNew body.\n\n## PreToolUse\n\nDetails.\n",
        );
        let summary = reconcile(&fx);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.new, 0);

        let entry = fx.store.get("en-hooks").unwrap().unwrap();
        assert_ne!(entry.content_hash, old_hash);
        assert_eq!(entry.title, "Hook Events");
        assert_eq!(entry.subsections.len(), 1);
    }

    #[test]
    fn rename_promotes_new_id_and_keeps_alias() {
        let fx = fixture();
        let body = "# Hooks\n\nStable body.\n";
        write_doc(&fx, "en/hooks.md", body);
        reconcile(&fx);
        let before = fx.store.load_all().unwrap().len();

        // Same content, new location; the old file is gone.
        std::fs::remove_file(fx.config.docs_dir.join("en/hooks.md"))
            .unwrap();
        write_doc(&fx, "en/guides/hooks.md", body);

        let summary = reconcile(&fx);
        assert_eq!(summary.renamed, 1);
        assert_eq!(summary.new, 0);
        assert_eq!(summary.missing, 0);

        let entries = fx.store.load_all().unwrap();
        assert_eq!(entries.len(), before, "entry count unchanged");
        assert!(!entries.contains_key("en-hooks"), "old id removed");
        let renamed = &entries["en-guides-hooks"];
        assert!(renamed.has_alias("en-hooks"));
        assert_eq!(renamed.path, "en/guides/hooks.md");
    }

    #[test]
    fn rename_is_idempotent() {
        let fx = fixture();
        let body = "# Hooks\n\nStable body.\n";
        write_doc(&fx, "en/hooks.md", body);
        reconcile(&fx);
        std::fs::remove_file(fx.config.docs_dir.join("en/hooks.md"))
            .unwrap();
        write_doc(&fx, "en/guides/hooks.md", body);
        reconcile(&fx);

        let summary = reconcile(&fx);
        assert_eq!(summary.transitions(), 0);
    }

    #[test]
    fn missing_file_is_flagged_not_deleted() {
        let fx = fixture();
        write_doc(&fx, "en/hooks.md", "# Hooks\n\nBody.\n");
        reconcile(&fx);

        std::fs::remove_file(fx.config.docs_dir.join("en/hooks.md"))
            .unwrap();
        let summary = reconcile(&fx);
        assert_eq!(summary.missing, 1);

        let entry = fx.store.get("en-hooks").unwrap().unwrap();
        assert!(entry.stale);
        assert_eq!(entry.stale_reason, Some(StaleReason::MissingFile));

        // Still flagged, but no new transition on the next pass.
        let again = reconcile(&fx);
        assert_eq!(again.transitions(), 0);
    }

    #[test]
    fn reappearing_file_clears_missing_flag() {
        let fx = fixture();
        let body = "# Hooks\n\nBody.\n";
        write_doc(&fx, "en/hooks.md", body);
        reconcile(&fx);
        std::fs::remove_file(fx.config.docs_dir.join("en/hooks.md"))
            .unwrap();
        reconcile(&fx);

        write_doc(&fx, "en/hooks.md", body);
        let summary = reconcile(&fx);
        assert_eq!(summary.updated, 1);

        let entry = fx.store.get("en-hooks").unwrap().unwrap();
        assert!(!entry.stale);
        assert_eq!(entry.stale_reason, None);
    }

    #[test]
    fn base_url_populates_url_fields() {
        let fx = fixture();
        let mut config = fx.config.clone();
        config.base_url = Some("https://docs.example.com".to_string());
        write_doc(&fx, "en/hooks.md", "# Hooks\n\nBody.\n");

        Reconciler::new(&fx.store, &config, &MarkdownExtractor)
            .run_local()
            .unwrap();

        let entry = fx.store.get("en-hooks").unwrap().unwrap();
        assert_eq!(entry.url, "https://docs.example.com/en/hooks");
        assert_eq!(
            entry.source_url,
            "https://docs.example.com/en/hooks.md"
        );
        assert_eq!(entry.domain, "docs.example.com");
    }

    #[test]
    fn remote_404_flags_entry() {
        let fx = fixture();
        write_doc(&fx, "en/hooks.md", "# Hooks\n\nBody.\n");
        seed_source_urls(&fx);

        let fetcher = StubFetcher {
            outcome_for: |_| FetchOutcome::NotFound,
        };
        let summary =
            Reconciler::new(&fx.store, &fx.config, &MarkdownExtractor)
                .run_remote(&fetcher)
                .unwrap();
        assert_eq!(summary.remote_stale, 1);

        let entry = fx.store.get("en-hooks").unwrap().unwrap();
        assert_eq!(entry.stale_reason, Some(StaleReason::Remote404));
    }

    #[test]
    fn remote_hash_mismatch_flags_entry() {
        let fx = fixture();
        write_doc(&fx, "en/hooks.md", "# Hooks\n\nBody.\n");
        seed_source_urls(&fx);

        let fetcher = StubFetcher {
            outcome_for: |_| FetchOutcome::Fetched {
                body: "different remote content".to_string(),
                content_hash: fetch::hash_body("different remote content"),
            },
        };
        Reconciler::new(&fx.store, &fx.config, &MarkdownExtractor)
            .run_remote(&fetcher)
            .unwrap();

        let entry = fx.store.get("en-hooks").unwrap().unwrap();
        assert_eq!(
            entry.stale_reason,
            Some(StaleReason::ContentHashMismatch)
        );
    }

    #[test]
    fn matching_remote_clears_stale_flag() {
        let fx = fixture();
        let body = "# Hooks\n\nBody.\n";
        write_doc(&fx, "en/hooks.md", body);
        seed_source_urls(&fx);

        let mut entry = fx.store.get("en-hooks").unwrap().unwrap();
        entry.mark_stale(StaleReason::Remote404);
        fx.store.update("en-hooks", entry).unwrap();

        // The local pass recomputed the hash of `body` at index time; a
        // remote body with identical content yields the same hash.
        let fetcher = StubFetcher {
            outcome_for: |_| FetchOutcome::Fetched {
                body: "# Hooks\n\nBody.\n".to_string(),
                content_hash: fetch::hash_body("# Hooks\n\nBody.\n"),
            },
        };
        let summary =
            Reconciler::new(&fx.store, &fx.config, &MarkdownExtractor)
                .run_remote(&fetcher)
                .unwrap();
        assert_eq!(summary.updated, 1);
        assert!(!fx.store.get("en-hooks").unwrap().unwrap().stale);
    }

    #[test]
    fn transient_failure_changes_nothing() {
        let fx = fixture();
        write_doc(&fx, "en/hooks.md", "# Hooks\n\nBody.\n");
        seed_source_urls(&fx);

        let fetcher = StubFetcher {
            outcome_for: |_| {
                FetchOutcome::Transient("connection reset".to_string())
            },
        };
        let summary =
            Reconciler::new(&fx.store, &fx.config, &MarkdownExtractor)
                .run_remote(&fetcher)
                .unwrap();
        assert_eq!(summary.probe_failures, 1);
        assert_eq!(summary.transitions(), 0);
        assert!(!fx.store.get("en-hooks").unwrap().unwrap().stale);
    }

    #[test]
    fn missing_file_entries_are_not_probed() {
        let fx = fixture();
        write_doc(&fx, "en/hooks.md", "# Hooks\n\nBody.\n");
        seed_source_urls(&fx);
        std::fs::remove_file(fx.config.docs_dir.join("en/hooks.md"))
            .unwrap();
        reconcile(&fx); // flags missing-file

        let fetcher = StubFetcher {
            outcome_for: |_| FetchOutcome::NotFound,
        };
        let summary =
            Reconciler::new(&fx.store, &fx.config, &MarkdownExtractor)
                .run_remote(&fetcher)
                .unwrap();
        assert_eq!(summary.remote_stale, 0);
        // The missing-file reason is preserved, not overwritten.
        let entry = fx.store.get("en-hooks").unwrap().unwrap();
        assert_eq!(entry.stale_reason, Some(StaleReason::MissingFile));
    }

    /// Index the tree, then give each entry a source_url so the remote
    /// pass has something to probe.
    fn seed_source_urls(fx: &Fixture) {
        reconcile(fx);
        let mut entries = fx.store.load_all().unwrap();
        for (id, entry) in entries.iter_mut() {
            entry.source_url =
                format!("https://docs.example.com/{id}.md");
        }
        fx.store.batch_update(entries).unwrap();
    }
}
