//! Folder walker: enumerates a managed folder's files for the indexer's scan plan
//! (§4.6 contract 1), respecting `.gitignore`/`.kbaseignore` and the fixed exclusion set.
//!
//! Unlike the teacher's walker, nothing here decides indexability by extension or
//! binary sniffing — every file is a candidate; MIME dispatch in `extract` is what
//! decides whether its content can be turned into text.

use std::path::PathBuf;

use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::constants::ALWAYS_EXCLUDED;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Default, Clone)]
pub struct WalkStats {
    pub total_entries: usize,
    pub files: usize,
    pub total_size_bytes: u64,
}

impl WalkStats {
    fn record(&mut self, file: &DiscoveredFile) {
        self.files += 1;
        self.total_size_bytes += file.size;
    }
}

/// Walks a folder non-recursively into the managed root's exclusion rules. Symlinks
/// are never followed — the Open Question decision in SPEC_FULL §9 treats them as
/// invisible to both the walker and the observer, avoiding cycle/identity ambiguity.
pub struct FileWalker {
    root: PathBuf,
}

impl FileWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn walk(&self) -> Result<(Vec<DiscoveredFile>, WalkStats)> {
        let mut files = Vec::new();
        let mut stats = WalkStats::default();

        debug!("walking folder: {}", self.root.display());

        let mut builder = WalkBuilder::new(&self.root);
        builder
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .hidden(true)
            .follow_links(false)
            .add_custom_ignore_filename(".kbaseignore")
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                match entry.file_name().to_str() {
                    Some(name) => !ALWAYS_EXCLUDED.contains(&name),
                    None => true,
                }
            });

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    stats.total_entries += 1;
                    let is_symlink = entry
                        .path()
                        .symlink_metadata()
                        .map(|m| m.file_type().is_symlink())
                        .unwrap_or(false);
                    if is_symlink {
                        continue;
                    }
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }
                    let size = entry.metadata().ok().map(|m| m.len()).unwrap_or(0);
                    let file = DiscoveredFile {
                        path: entry.path().to_path_buf(),
                        size,
                    };
                    stats.record(&file);
                    files.push(file);
                }
                Err(err) => warn!("error walking entry: {err}"),
            }
        }

        Ok((files, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_finds_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::write(dir.path().join("b.md"), "# hi").unwrap();

        let (files, stats) = FileWalker::new(dir.path()).walk().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(stats.files, 2);
    }

    #[test]
    fn test_walk_excludes_fixed_set() {
        let dir = TempDir::new().unwrap();
        let node_modules = dir.path().join("node_modules");
        fs::create_dir(&node_modules).unwrap();
        fs::write(node_modules.join("pkg.js"), "x").unwrap();
        fs::write(dir.path().join("index.js"), "x").unwrap();

        let (files, _) = FileWalker::new(dir.path()).walk().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path.file_name().unwrap(), "index.js");
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_ignores_symlinks() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real.txt"), "hello").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();

        let (files, _) = FileWalker::new(dir.path()).walk().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path.file_name().unwrap(), "real.txt");
    }
}
