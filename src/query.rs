//! Natural-language query tokenization.
//!
//! Turns free text like "how do I configure hooks in settings.json" into
//! the keyword list the ranking engine scores: stop words dropped, short
//! noise tokens dropped, but filename-like tokens preserved whole so
//! technical phrases survive.

/// Words that carry no discriminating signal in a documentation query.
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "any", "are", "as", "at", "be", "but",
    "by", "can", "do", "does", "for", "from", "get", "have", "how", "i",
    "if", "in", "into", "is", "it", "me", "my", "not", "of", "on", "or",
    "should", "that", "the", "their", "them", "then", "there", "this",
    "to", "use", "using", "was", "we", "what", "when", "where", "which",
    "why", "will", "with", "you", "your",
];

/// Tokenize natural-language text into query terms.
///
/// Tokens containing an interior dot with an extension-like tail (such as
/// `settings.json` or `config.toml`) are kept intact regardless of the
/// minimum length; everything else is lowercased, stripped of punctuation,
/// filtered against the stop-word list, and dropped when shorter than
/// `min_token_len`.
pub fn tokenize(text: &str, min_token_len: usize) -> Vec<String> {
    let mut terms = Vec::new();
    for raw in text.split_whitespace() {
        let token = raw
            .trim_matches(|c: char| {
                !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
            })
            .to_ascii_lowercase();
        if token.is_empty() {
            continue;
        }

        if is_technical_phrase(&token) {
            push_unique(&mut terms, token);
            continue;
        }

        // Plain tokens lose surrounding dots/dashes that punctuation left.
        let token = token.trim_matches(['.', '-', '_']).to_string();
        if token.len() < min_token_len {
            continue;
        }
        if STOP_WORDS.contains(&token.as_str()) {
            continue;
        }
        push_unique(&mut terms, token);
    }
    terms
}

/// Whether a token looks like a filename or dotted identifier worth
/// preserving whole (`settings.json`, `claude.md`, `a.b.c`).
fn is_technical_phrase(token: &str) -> bool {
    let Some((stem, ext)) = token.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty()
        && !ext.is_empty()
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}

fn push_unique(terms: &mut Vec<String>, token: String) {
    if !terms.contains(&token) {
        terms.push(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_stop_words() {
        let terms = tokenize("how do I configure hooks", 3);
        assert_eq!(terms, vec!["configure", "hooks"]);
    }

    #[test]
    fn drops_short_tokens() {
        let terms = tokenize("go to db", 3);
        assert_eq!(terms, Vec::<String>::new());
    }

    #[test]
    fn preserves_dotted_filenames() {
        let terms = tokenize("where is settings.json stored", 3);
        assert_eq!(terms, vec!["settings.json", "stored"]);
    }

    #[test]
    fn preserves_short_dotted_tokens() {
        // Below min length, but filename-like tokens survive.
        let terms = tokenize("edit a.md now", 3);
        assert!(terms.contains(&"a.md".to_string()));
    }

    #[test]
    fn strips_punctuation() {
        let terms = tokenize("What are \"sub-agents\", exactly?", 3);
        assert_eq!(terms, vec!["sub-agents", "exactly"]);
    }

    #[test]
    fn lowercases() {
        let terms = tokenize("PreToolUse Hooks", 3);
        assert_eq!(terms, vec!["pretooluse", "hooks"]);
    }

    #[test]
    fn deduplicates() {
        let terms = tokenize("hooks hooks hooks", 3);
        assert_eq!(terms, vec!["hooks"]);
    }

    #[test]
    fn trailing_sentence_dot_is_not_technical() {
        let terms = tokenize("configure hooks.", 3);
        assert_eq!(terms, vec!["configure", "hooks"]);
    }
}
