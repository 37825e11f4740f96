use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCDEX_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docdex/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("DOCDEX_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docdex")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The durable catalog file. Human-readable JSON, one key per doc_id.
    pub fn index_file(&self) -> PathBuf {
        self.root.join("index.json")
    }

    /// Advisory lock file guarding catalog mutation.
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("index.lock")
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let path = self.root.join("cache");
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }

    /// Base directory for cached document bodies; entry paths are relative
    /// to this.
    pub fn docs_dir(&self) -> Result<PathBuf> {
        let path = self.root.join("docs");
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}
