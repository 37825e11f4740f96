use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::error::Result;

/// A document file found under the docs base directory.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the docs base directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
}

const SUPPORTED_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Walk the docs tree and return every eligible document file, sorted by
/// relative path.
///
/// Hidden files and directories are skipped, as are symlinks that point
/// back into the tree (cycle prevention) and broken symlinks.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    let mut pending = vec![canonical_root.clone()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
                continue;
            }

            let abs = if file_type.is_symlink() {
                let Ok(resolved) = entry.path().canonicalize() else {
                    continue; // broken symlink
                };
                if resolved.is_dir() {
                    // Never follow symlinked directories; a link back into
                    // the tree would loop forever.
                    continue;
                }
                resolved
            } else {
                entry.path().canonicalize()?
            };

            if !is_supported(&abs) {
                continue;
            }
            results.push(discovered(&canonical_root, &entry.path(), abs)?);
        }
    }

    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

fn discovered(
    root: &Path,
    original: &Path,
    absolute: PathBuf,
) -> Result<DiscoveredFile> {
    let relative_path = original
        .strip_prefix(root)
        .unwrap_or(original)
        .to_path_buf();
    let mtime = std::fs::metadata(&absolute)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    Ok(DiscoveredFile {
        relative_path,
        absolute_path: absolute,
        mtime,
    })
}
