//! Document body retrieval with alias-aware lookup and fuzzy section
//! resolution.
//!
//! Section matching is an ordered chain of strategies tried until one
//! hits: exact case-insensitive, then substring containment, then token
//! overlap. It is deliberately separate from the relevance scoring in
//! [`crate::search`]; the two were designed independently.

use serde::Serialize;

use crate::{
    config::Config,
    entry::IndexEntry,
    error::{Error, Result},
    store::IndexStore,
};

/// How many runner-up headings to suggest alongside a fuzzy match.
const MAX_SUGGESTIONS: usize = 4;

/// Whether the returned body is the whole document or one subsection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Full,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocContent {
    /// The live doc_id, after alias resolution.
    pub doc_id: String,
    pub path: String,
    pub title: String,
    pub content: String,
    pub content_type: ContentType,
    /// The heading that was actually matched, when partial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_section: Option<String>,
    /// True when the section was found by substring or token overlap
    /// rather than an exact heading match.
    pub fuzzy_matched: bool,
    /// Other candidate headings, for "did you mean" output.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Load a document's body, optionally narrowed to one section.
///
/// `doc_id` resolves through aliases, so references from before a rename
/// keep working. An unknown id is a typed not-found error; contrast with a
/// query that merely matches nothing, which is an empty result list.
pub fn get_content(
    store: &IndexStore,
    config: &Config,
    doc_id: &str,
    section: Option<&str>,
) -> Result<DocContent> {
    let entries = store.load_all()?;

    let (live_id, entry) = resolve(&entries, doc_id).ok_or_else(|| {
        Error::NotFound {
            kind: "document",
            name: doc_id.to_string(),
        }
    })?;

    let full_path = config.docs_dir.join(&entry.path);
    let body = std::fs::read_to_string(&full_path)?;

    let mut result = DocContent {
        doc_id: live_id.to_string(),
        path: entry.path.clone(),
        title: entry.title.clone(),
        content: body,
        content_type: ContentType::Full,
        matched_section: None,
        fuzzy_matched: false,
        suggestions: Vec::new(),
    };

    if let Some(wanted) = section {
        apply_section(&mut result, entry, wanted);
    }

    Ok(result)
}

fn resolve<'e>(
    entries: &'e std::collections::BTreeMap<String, IndexEntry>,
    doc_id: &'e str,
) -> Option<(&'e str, &'e IndexEntry)> {
    if let Some(entry) = entries.get(doc_id) {
        return Some((doc_id, entry));
    }
    entries
        .iter()
        .find(|(_, entry)| entry.has_alias(doc_id))
        .map(|(id, entry)| (id.as_str(), entry))
}

/// Narrow `result` to the requested section if any strategy matches.
///
/// On a miss the content stays full and the headings become suggestions,
/// so the caller can tell a fallback occurred from `content_type` alone.
fn apply_section(result: &mut DocContent, entry: &IndexEntry, wanted: &str) {
    let headings: Vec<&str> = entry
        .subsections
        .iter()
        .map(|s| s.heading.as_str())
        .collect();

    let Some(found) = find_section(&headings, wanted) else {
        result.suggestions = headings
            .iter()
            .take(MAX_SUGGESTIONS)
            .map(|h| h.to_string())
            .collect();
        return;
    };

    let heading = headings[found.index];
    let level = entry.subsections[found.index].level;
    if let Some(slice) = extract_section(&result.content, heading, level) {
        result.content = slice;
        result.content_type = ContentType::Partial;
        result.matched_section = Some(heading.to_string());
        result.fuzzy_matched = found.fuzzy;
        result.suggestions = headings
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != found.index)
            .take(MAX_SUGGESTIONS)
            .map(|(_, h)| h.to_string())
            .collect();
    } else {
        // Heading indexed but absent from the body; keep the full text.
        result.suggestions = headings
            .iter()
            .take(MAX_SUGGESTIONS)
            .map(|h| h.to_string())
            .collect();
    }
}

struct SectionMatch {
    index: usize,
    fuzzy: bool,
}

/// The layered heuristic: first strategy that produces a match wins.
fn find_section(headings: &[&str], wanted: &str) -> Option<SectionMatch> {
    let wanted_lower = wanted.to_ascii_lowercase();

    // 1. Exact, case-insensitive.
    if let Some(index) = headings
        .iter()
        .position(|h| h.eq_ignore_ascii_case(wanted))
    {
        return Some(SectionMatch {
            index,
            fuzzy: false,
        });
    }

    // 2. Substring containment, either direction.
    if let Some(index) = headings.iter().position(|h| {
        let h = h.to_ascii_lowercase();
        h.contains(&wanted_lower) || wanted_lower.contains(h.as_str())
    }) {
        return Some(SectionMatch { index, fuzzy: true });
    }

    // 3. Token overlap: most shared tokens wins, one shared minimum.
    let wanted_tokens = heading_tokens(&wanted_lower);
    headings
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let overlap = heading_tokens(&h.to_ascii_lowercase())
                .iter()
                .filter(|t| wanted_tokens.contains(*t))
                .count();
            (i, overlap)
        })
        .filter(|(_, overlap)| *overlap > 0)
        .max_by_key(|(_, overlap)| *overlap)
        .map(|(index, _)| SectionMatch { index, fuzzy: true })
}

fn heading_tokens(heading: &str) -> Vec<String> {
    heading
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_string())
        .collect()
}

/// Slice the body from `heading`'s line up to the next heading of the same
/// or higher level.
fn extract_section(
    body: &str,
    heading: &str,
    level: u8,
) -> Option<String> {
    let lines: Vec<&str> = body.lines().collect();
    let start = lines.iter().position(|line| {
        parse_heading(line)
            .is_some_and(|(_, text)| text.eq_ignore_ascii_case(heading))
    })?;

    let end = lines[start + 1..]
        .iter()
        .position(|line| {
            parse_heading(line)
                .is_some_and(|(l, _)| l <= level.max(1))
        })
        .map_or(lines.len(), |offset| start + 1 + offset);

    Some(lines[start..end].join("\n"))
}

fn parse_heading(line: &str) -> Option<(u8, &str)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = trimmed[hashes..].trim();
    (!rest.is_empty()).then_some((hashes as u8, rest))
}
