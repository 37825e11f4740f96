use std::{path::PathBuf, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index store parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error(
        "could not acquire index lock {path} within {timeout:?}; \
         another process may be writing; try again later"
    )]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error(
        "refusing to write {path}: a single-entry change would empty a \
         catalog of {previous} entries; the store may be corrupt"
    )]
    StoreTruncation { path: PathBuf, previous: usize },
}

impl Error {
    /// Whether the caller can safely retry the failed operation.
    ///
    /// Only lock contention is recoverable; everything else needs
    /// intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_is_recoverable() {
        let err = Error::LockTimeout {
            path: PathBuf::from("/tmp/index.lock"),
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_recoverable());
    }

    #[test]
    fn truncation_is_not_recoverable() {
        let err = Error::StoreTruncation {
            path: PathBuf::from("/tmp/index.json"),
            previous: 42,
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("42"));
    }
}
