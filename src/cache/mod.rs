//! Path normalization shared by the observer, indexer, and state store.
//!
//! Strips the Windows UNC prefix (`\\?\`) and converts backslashes to forward
//! slashes so paths agree regardless of which OS produced them — the same
//! normalization the filesystem observer and state store key rows on.

use std::path::Path;

pub fn normalize_path(path: &Path) -> String {
    normalize_path_str(&path.to_string_lossy())
}

pub fn normalize_path_str(path: &str) -> String {
    path.strip_prefix(r"\\?\").unwrap_or(path).replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_strips_unc_prefix() {
        assert_eq!(
            normalize_path_str(r"\\?\C:\repo\src\main.rs"),
            "C:/repo/src/main.rs"
        );
    }

    #[test]
    fn test_converts_backslashes() {
        assert_eq!(normalize_path(&PathBuf::from(r"a\b\c")), "a/b/c");
    }

    #[test]
    fn test_unix_path_unchanged() {
        assert_eq!(normalize_path_str("a/b/c"), "a/b/c");
    }
}
