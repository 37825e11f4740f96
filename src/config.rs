use std::{path::PathBuf, time::Duration};

use crate::data_dir::DataDir;
use crate::error::Result;

/// Query terms considered too broad to discriminate between documents on
/// their own. Their score contribution is damped when a more specific term
/// is present in the same query.
pub const DEFAULT_GENERIC_TERMS: &[&str] = &[
    "configuration",
    "config",
    "settings",
    "documentation",
    "docs",
    "guide",
    "overview",
    "reference",
    "usage",
    "general",
];

/// Explicit configuration for every component in the subsystem.
///
/// Loaded once at process start and passed by reference; there is no
/// process-wide mutable state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for cached document bodies.
    pub docs_dir: PathBuf,
    /// Path of the durable index file.
    pub index_path: PathBuf,
    /// Path of the advisory lock file.
    pub lock_path: PathBuf,
    /// Directory holding the cache payload and version record.
    pub cache_dir: PathBuf,
    /// How long a mutation waits for the advisory lock before failing.
    pub lock_timeout: Duration,
    /// Per-probe timeout for remote drift checks.
    pub probe_timeout: Duration,
    /// Remote base URL that entry paths are joined onto, if the corpus
    /// mirrors a remote site.
    pub base_url: Option<String>,
    /// Terms subject to the generic-term ranking penalty.
    pub generic_terms: Vec<String>,
    /// Minimum token length for natural-language queries.
    pub min_token_len: usize,
}

impl Config {
    pub fn from_data_dir(data_dir: &DataDir) -> Result<Self> {
        Ok(Self {
            docs_dir: data_dir.docs_dir()?,
            index_path: data_dir.index_file(),
            lock_path: data_dir.lock_file(),
            cache_dir: data_dir.cache_dir()?,
            lock_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(15),
            base_url: None,
            generic_terms: DEFAULT_GENERIC_TERMS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            min_token_len: 3,
        })
    }

    pub fn is_generic_term(&self, term: &str) -> bool {
        self.generic_terms.iter().any(|g| g == term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let config = Config::from_data_dir(&data_dir).unwrap();

        assert_eq!(config.index_path, tmp.path().join("index.json"));
        assert!(config.is_generic_term("configuration"));
        assert!(!config.is_generic_term("pretooluse"));
    }
}
