//! The catalog record for one indexed document.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Why an entry is flagged as no longer trustworthy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum StaleReason {
    /// The remote body hashes differently from the stored content.
    ContentHashMismatch,
    /// The remote source returned not-found.
    #[serde(rename = "remote-404")]
    Remote404,
    /// The local cached body no longer exists.
    MissingFile,
}

/// One section of a document, as reported by the metadata extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subsection {
    pub heading: String,
    pub level: u8,
    pub anchor: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

/// Catalog metadata for one document.
///
/// Persisted as one key of the index store's JSON object, keyed by doc_id.
/// Fields this version does not know about round-trip unchanged through
/// `extra`, so a newer writer's records survive being rewritten by an older
/// one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Location of the cached body, relative to the docs base directory.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_url: String,

    /// Digest of the on-disk body. Recomputed at write time during
    /// reconciliation, never trusted from caller input.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_hash: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub keywords: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsections: Vec<Subsection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,

    /// When this entry was created or last rewritten, seconds since the
    /// Unix epoch. Used by age-based cleanup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<u64>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_reason: Option<StaleReason>,

    /// Former doc_ids that now resolve to this entry, kept after renames so
    /// old references keep working.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub aliases: BTreeSet<String>,

    /// Forward-compatible fields from newer writers, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl IndexEntry {
    pub fn mark_stale(&mut self, reason: StaleReason) {
        self.stale = true;
        self.stale_reason = Some(reason);
    }

    pub fn clear_stale(&mut self) {
        self.stale = false;
        self.stale_reason = None;
    }

    /// Whether `doc_id` (a former identifier) resolves to this entry.
    pub fn has_alias(&self, doc_id: &str) -> bool {
        self.aliases.contains(doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> IndexEntry {
        IndexEntry {
            path: "en/agents/sub-agents.md".into(),
            url: "https://docs.example.com/en/agents/sub-agents".into(),
            source_url: "https://docs.example.com/en/agents/sub-agents.md"
                .into(),
            content_hash: "abc123".into(),
            title: "Sub-agents".into(),
            keywords: ["agents", "delegation"]
                .into_iter()
                .map(String::from)
                .collect(),
            tags: ["sub-agents"].into_iter().map(String::from).collect(),
            category: "agents".into(),
            domain: "docs.example.com".into(),
            ..Default::default()
        }
    }

    #[test]
    fn serde_roundtrip() {
        let entry = sample_entry();
        let json = serde_json::to_string_pretty(&entry).unwrap();
        let restored: IndexEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, restored);
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let json = r#"{
            "path": "a.md",
            "content_hash": "h1",
            "future_field": {"nested": [1, 2, 3]}
        }"#;
        let entry: IndexEntry = serde_json::from_str(json).unwrap();
        assert!(entry.extra.contains_key("future_field"));

        let rewritten = serde_json::to_string(&entry).unwrap();
        let reparsed: serde_json::Value =
            serde_json::from_str(&rewritten).unwrap();
        assert_eq!(
            reparsed["future_field"]["nested"],
            serde_json::json!([1, 2, 3])
        );
    }

    #[test]
    fn stale_reason_serializes_kebab_case() {
        let mut entry = sample_entry();
        entry.mark_stale(StaleReason::ContentHashMismatch);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("content-hash-mismatch"));

        entry.mark_stale(StaleReason::Remote404);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("remote-404"));
    }

    #[test]
    fn clean_entry_omits_stale_fields() {
        let entry = sample_entry();
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("stale"));
    }

    #[test]
    fn clear_stale_resets_reason() {
        let mut entry = sample_entry();
        entry.mark_stale(StaleReason::MissingFile);
        assert!(entry.stale);
        entry.clear_stale();
        assert!(!entry.stale);
        assert_eq!(entry.stale_reason, None);
    }
}
