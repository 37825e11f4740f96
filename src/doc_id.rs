//! Deterministic document identifiers.
//!
//! A doc_id is a stable slug derived from a document's canonical URL or its
//! path relative to the docs base directory. The same source always yields
//! the same id, which is what makes rename detection and alias tracking
//! possible.

use std::path::Path;

use percent_encoding::percent_decode_str;

/// Derive a doc_id from a path relative to the docs base directory.
///
/// The extension is dropped, separators become `-`, and everything is
/// lowercased: `en/agents/Sub-Agents.md` becomes `en-agents-sub-agents`.
pub fn from_path(relative_path: &Path) -> String {
    let no_ext = relative_path.with_extension("");
    let joined = no_ext
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("-");
    slugify(&joined)
}

/// Derive a doc_id from a canonical URL.
///
/// The scheme and host are stripped (the host is recorded separately as the
/// entry's domain) and the decoded path is slugified the same way as a
/// filesystem path.
pub fn from_url(url: &str) -> String {
    let without_scheme = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .split_once('/')
        .map_or("", |(_, path)| path);
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let trimmed = decoded
        .trim_matches('/')
        .trim_end_matches(".html")
        .trim_end_matches(".md");
    slugify(&trimmed.replace('/', "-"))
}

/// The host portion of a URL, for the entry's `domain` field.
pub fn url_domain(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://")?.1;
    let host = without_scheme.split('/').next()?;
    (!host.is_empty()).then(|| host.to_string())
}

/// Split a doc_id into its constituent tokens.
pub fn tokens(doc_id: &str) -> Vec<&str> {
    doc_id
        .split(['-', '_', '.'])
        .filter(|t| !t.is_empty())
        .collect()
}

/// Collapse a string to separator-free lowercase for comparison.
///
/// `sub-agents` and `subagents` normalize to the same value, so a query can
/// match an id regardless of hyphenation.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true; // suppress leading dashes
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
