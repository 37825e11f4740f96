//! Ranking and retrieval over the index store.
//!
//! Candidate generation prefers the derived cache and falls back to a full
//! catalog scan when the cache cannot be served. Scoring is additive per
//! matched term across fields, with a penalty for generic terms that
//! co-occur with specific ones and a doc_id-specificity tie-break for equal
//! scores.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::{
    cache::SearchCache,
    config::Config,
    doc_id,
    entry::IndexEntry,
    error::Result,
    query,
    store::IndexStore,
};

// Field weights, in strictly decreasing match quality. An exact tag beats
// an exact keyword beats a title substring beats a doc_id token beats a
// subsection match.
const W_TAG: f32 = 12.0;
const W_KEYWORD: f32 = 10.0;
const W_TITLE: f32 = 6.0;
const W_DOC_ID: f32 = 4.0;
const W_SECTION_HEADING: f32 = 3.0;
const W_SECTION_KEYWORD: f32 = 2.0;
/// A term merely contained in (or containing) a keyword, not equal to it.
const W_KEYWORD_PARTIAL: f32 = 2.0;

/// Multiplier applied to a generic term's contribution when the query also
/// carries at least one specific term. Keeps documents that only match
/// "configuration" from outranking ones that match the discriminating term.
const GENERIC_PENALTY: f32 = 0.25;

/// Shortest substring considered meaningful for partial matching.
const MIN_PARTIAL_LEN: usize = 4;

/// Encodes every constant the scoring logic depends on. Folded into the
/// cache producer fingerprint so a weight change invalidates old caches.
pub fn scoring_fingerprint() -> String {
    format!(
        "tag={W_TAG};kw={W_KEYWORD};title={W_TITLE};id={W_DOC_ID};\
         sec_h={W_SECTION_HEADING};sec_kw={W_SECTION_KEYWORD};\
         kw_part={W_KEYWORD_PARTIAL};generic={GENERIC_PENALTY};\
         min_part={MIN_PARTIAL_LEN}"
    )
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Keyword terms, matched case-insensitively.
    pub terms: Vec<String>,
    /// Hard pre-filter: documents must carry every listed tag.
    pub tags: Vec<String>,
    /// Maximum results returned, applied after `min_score`.
    pub limit: usize,
    /// Minimum score; filters the fully scored set before truncation.
    pub min_score: f32,
    /// Attach numeric scores to results without changing their order.
    pub with_scores: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            tags: Vec::new(),
            limit: 10,
            min_score: 0.0,
            with_scores: false,
        }
    }
}

/// A matched subsection, referenced by anchor rather than bare document.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SectionRef {
    pub heading: String,
    pub anchor: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub title: String,
    pub path: String,
    /// Present only when the caller asked for scores.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Present when a query term matched a subsection heading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<SectionRef>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

pub struct SearchEngine<'a> {
    store: &'a IndexStore,
    cache: &'a SearchCache,
    config: &'a Config,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        store: &'a IndexStore,
        cache: &'a SearchCache,
        config: &'a Config,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Score and rank documents against a keyword list.
    ///
    /// An empty result is a normal outcome, not an error.
    pub fn search_by_keyword(
        &self,
        params: &SearchParams,
    ) -> Result<Vec<SearchHit>> {
        let entries = self.store.load_all()?;
        if entries.is_empty() || params.terms.is_empty() {
            return Ok(Vec::new());
        }

        let terms: Vec<String> = params
            .terms
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();
        let tags_filter: Vec<String> = params
            .tags
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();

        let candidates: Vec<&String> = match self.shortlist(&terms) {
            Some(ids) => entries
                .keys()
                .filter(|id| ids.contains(id.as_str()))
                .collect(),
            None => entries.keys().collect(),
        };

        let has_specific = terms
            .iter()
            .any(|t| !self.config.is_generic_term(t));

        let mut scored: Vec<ScoredDoc<'_>> = Vec::new();
        for id in candidates {
            let entry = &entries[id];
            if !matches_tag_filter(entry, &tags_filter) {
                continue;
            }
            let doc =
                score_entry(id, entry, &terms, self.config, has_specific);
            if doc.score > 0.0 {
                scored.push(doc);
            }
        }

        // Order: score, then doc_id specificity, then id for determinism.
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.specificity.total_cmp(&a.specificity))
                .then(a.doc_id.cmp(b.doc_id))
        });

        let hits = scored
            .into_iter()
            .filter(|d| d.score >= params.min_score)
            .take(params.limit)
            .map(|d| SearchHit {
                doc_id: d.doc_id.clone(),
                title: d.entry.title.clone(),
                path: d.entry.path.clone(),
                score: params.with_scores.then_some(d.score),
                section: d.section,
                stale: d.entry.stale,
            })
            .collect();
        Ok(hits)
    }

    /// Tokenize free text and delegate to keyword search.
    pub fn search_by_natural_language(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let terms = query::tokenize(text, self.config.min_token_len);
        debug!(?terms, "derived query terms");
        self.search_by_keyword(&SearchParams {
            terms,
            limit,
            ..Default::default()
        })
    }

    /// Candidate doc_ids from the cache, or None to force a full scan.
    ///
    /// An invalid cache is rebuilt silently; only a cache that cannot be
    /// rebuilt at all (for instance an unreadable cache dir) falls back,
    /// since the catalog scan gives the same answer slower.
    fn shortlist(
        &self,
        terms: &[String],
    ) -> Option<std::collections::HashSet<String>> {
        let postings = match self.cache.ensure(self.store) {
            Ok(p) => p,
            Err(err) => {
                warn!(%err, "search cache unavailable, falling back to full scan");
                return None;
            }
        };

        // The shortlist must be a superset of everything the scorer can
        // match, so containment runs in both directions on normalized
        // forms with no length floor; the scorer's own floors decide what
        // actually contributes.
        let mut ids = std::collections::HashSet::new();
        for (cache_term, list) in &postings {
            let cache_norm = doc_id::normalize(cache_term);
            let matched = terms.iter().any(|t| {
                let term_norm = doc_id::normalize(t);
                !term_norm.is_empty()
                    && !cache_norm.is_empty()
                    && (cache_norm.contains(&term_norm)
                        || term_norm.contains(&cache_norm))
            });
            if matched {
                for posting in list {
                    ids.insert(posting.doc_id.clone());
                }
            }
        }
        Some(ids)
    }
}

struct ScoredDoc<'e> {
    doc_id: &'e String,
    entry: &'e IndexEntry,
    score: f32,
    specificity: f32,
    section: Option<SectionRef>,
}

fn matches_tag_filter(entry: &IndexEntry, tags_filter: &[String]) -> bool {
    tags_filter.iter().all(|wanted| {
        entry
            .tags
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(wanted))
    })
}

fn score_entry<'e>(
    doc_id: &'e String,
    entry: &'e IndexEntry,
    terms: &[String],
    config: &Config,
    has_specific: bool,
) -> ScoredDoc<'e> {
    let mut score = 0.0;
    let mut section_scores: HashMap<usize, f32> = HashMap::new();
    let title_lower = entry.title.to_ascii_lowercase();

    for term in terms {
        let normalized = doc_id::normalize(term);
        let mut term_score = 0.0;

        if entry
            .tags
            .iter()
            .any(|tag| doc_id::normalize(tag) == normalized)
        {
            term_score += W_TAG;
        }

        if entry
            .keywords
            .iter()
            .any(|kw| doc_id::normalize(kw) == normalized)
        {
            term_score += W_KEYWORD;
        } else if entry.keywords.iter().any(|kw| {
            partial_overlap(&kw.to_ascii_lowercase(), term)
        }) {
            term_score += W_KEYWORD_PARTIAL;
        }

        if !title_lower.is_empty() && title_lower.contains(term.as_str()) {
            term_score += W_TITLE;
        }

        if doc_id::tokens(doc_id).iter().any(|tok| tok == term)
            || (normalized.len() >= MIN_PARTIAL_LEN
                && doc_id::normalize(doc_id).contains(&normalized))
        {
            term_score += W_DOC_ID;
        }

        for (idx, section) in entry.subsections.iter().enumerate() {
            let heading_lower = section.heading.to_ascii_lowercase();
            if heading_lower.contains(term.as_str()) {
                term_score += W_SECTION_HEADING;
                *section_scores.entry(idx).or_default() +=
                    W_SECTION_HEADING;
            }
            if section
                .keywords
                .iter()
                .any(|kw| kw.eq_ignore_ascii_case(term))
            {
                term_score += W_SECTION_KEYWORD;
                *section_scores.entry(idx).or_default() +=
                    W_SECTION_KEYWORD;
            }
        }

        if has_specific && config.is_generic_term(term) {
            term_score *= GENERIC_PENALTY;
        }
        score += term_score;
    }

    let section = section_scores
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(idx, _)| {
            let s = &entry.subsections[idx];
            SectionRef {
                heading: s.heading.clone(),
                anchor: s.anchor.clone(),
            }
        });

    ScoredDoc {
        doc_id,
        entry,
        score,
        specificity: doc_id_specificity(doc_id, terms),
        section,
    }
}

fn partial_overlap(keyword: &str, term: &str) -> bool {
    keyword.len().min(term.len()) >= MIN_PARTIAL_LEN
        && (keyword.contains(term) || term.contains(keyword))
}

/// How precisely the query terms name this document's id. Used only to
/// break score ties: a document literally named after the term wins over
/// one that merely overlaps it.
fn doc_id_specificity(doc_id: &str, terms: &[String]) -> f32 {
    let id_norm = doc_id::normalize(doc_id);
    if id_norm.is_empty() {
        return 0.0;
    }
    terms
        .iter()
        .map(|term| {
            let tn = doc_id::normalize(term);
            if tn.is_empty() {
                0.0
            } else if id_norm == tn {
                1.0
            } else if doc_id::tokens(doc_id).iter().any(|tok| tok == term)
            {
                term.len() as f32 / doc_id.len() as f32
            } else if id_norm.contains(&tn) {
                0.5 * tn.len() as f32 / id_norm.len() as f32
            } else {
                0.0
            }
        })
        .fold(0.0, f32::max)
}
