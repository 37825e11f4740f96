//! Metadata extraction collaborator.
//!
//! The index treats extraction output as opaque input to an entry: given
//! raw document text it receives title, description, keywords, tags,
//! subsections, category, and domain, and never re-derives them. The
//! default implementation understands markdown.

use std::{
    collections::BTreeSet,
    path::Path,
};

use crate::entry::Subsection;

/// What the extractor reports for one document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedMetadata {
    pub title: String,
    pub description: String,
    pub keywords: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub subsections: Vec<Subsection>,
    pub category: String,
    pub domain: String,
}

pub trait MetadataExtractor {
    fn extract(
        &self,
        text: &str,
        relative_path: &Path,
    ) -> ExtractedMetadata;
}

/// Default extractor for markdown and plain-text documents.
///
/// Title comes from the first `# ` heading, falling back to the filename.
/// Subsections are the level-2+ headings with slugified anchors. Keywords
/// are the significant tokens of the title and headings; tags and category
/// come from the directory components of the path.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownExtractor;

impl MetadataExtractor for MarkdownExtractor {
    fn extract(
        &self,
        text: &str,
        relative_path: &Path,
    ) -> ExtractedMetadata {
        let title = extract_title(text, relative_path);
        let subsections = extract_subsections(text);
        let description = extract_description(text);

        let mut keywords: BTreeSet<String> = significant_tokens(&title);
        for section in &subsections {
            keywords.extend(section.keywords.iter().cloned());
        }

        let dirs: Vec<String> = relative_path
            .parent()
            .into_iter()
            .flat_map(|p| p.components())
            .map(|c| {
                c.as_os_str().to_string_lossy().to_ascii_lowercase()
            })
            .collect();
        let tags: BTreeSet<String> = dirs.iter().cloned().collect();
        let category = dirs.last().cloned().unwrap_or_default();

        ExtractedMetadata {
            title,
            description,
            keywords,
            tags,
            subsections,
            category,
            domain: String::new(), // set by the caller from the source URL
        }
    }
}

/// First `# ` heading, or the filename without extension.
fn extract_title(text: &str, relative_path: &Path) -> String {
    for line in text.lines() {
        if let Some(heading) = line.trim().strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }
    relative_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

/// First non-heading, non-blank paragraph line, truncated.
fn extract_description(text: &str) -> String {
    const MAX_DESCRIPTION: usize = 200;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut description = trimmed.to_string();
        if description.len() > MAX_DESCRIPTION {
            let cut = description
                .char_indices()
                .take_while(|(i, _)| *i < MAX_DESCRIPTION)
                .last()
                .map_or(0, |(i, c)| i + c.len_utf8());
            description.truncate(cut);
            description.push_str("...");
        }
        return description;
    }
    String::new()
}

fn extract_subsections(text: &str) -> Vec<Subsection> {
    let mut sections = Vec::new();
    let mut in_code_block = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }
        if in_code_block {
            continue;
        }

        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        if !(2..=6).contains(&hashes) {
            continue;
        }
        let heading = trimmed[hashes..].trim();
        if heading.is_empty() {
            continue;
        }

        sections.push(Subsection {
            heading: heading.to_string(),
            level: hashes as u8,
            anchor: slug_anchor(heading),
            keywords: significant_tokens(heading)
                .into_iter()
                .collect(),
        });
    }
    sections
}

/// GitHub-style anchor slug: lowercase, alphanumerics kept, spaces to
/// dashes, everything else dropped.
fn slug_anchor(heading: &str) -> String {
    let mut out = String::with_capacity(heading.len());
    for c in heading.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if c == ' ' || c == '-' || c == '_' {
            out.push('-');
        }
    }
    while out.contains("--") {
        out = out.replace("--", "-");
    }
    out.trim_matches('-').to_string()
}

fn significant_tokens(text: &str) -> BTreeSet<String> {
    crate::query::tokenize(text, 3).into_iter().collect()
}
