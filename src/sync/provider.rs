//! The `Provider` capability (§4.7.1): one uniform shape behind all seven
//! `SyncSourceConfig` variants.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::state::SyncSourceConfig;

/// A resolved, ready-to-use credential. Providers that need OAuth2 refresh resolve it
/// here; providers keyed by a static PAT just read it from the environment.
pub struct AuthToken {
    pub bearer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Add,
    Update,
    Delete,
}

/// One remote change, relative to the folder's root — not yet applied to disk.
#[derive(Debug, Clone)]
pub struct RemoteChange {
    pub remote_path: String,
    pub op: RemoteOp,
    pub remote_hash: String,
}

/// Output of the plan phase (§4.7 phase 2): a minimal diff plus the cursor to persist
/// once `apply` succeeds, so the next plan starts from here instead of re-listing
/// everything.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub changes: Vec<RemoteChange>,
    pub next_cursor: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOutcome {
    pub written: usize,
    pub deleted: usize,
}

/// Uniform per-provider capability (§4.7.1). `plan`/`apply` are split so a cancelled
/// sync can stop between files in `apply` without re-listing the remote on resume.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn authorize(&self, source: &SyncSourceConfig) -> Result<AuthToken>;

    async fn plan(
        &self,
        source: &SyncSourceConfig,
        token: &AuthToken,
        cursor: Option<&str>,
    ) -> Result<SyncPlan>;

    async fn apply(
        &self,
        source: &SyncSourceConfig,
        token: &AuthToken,
        plan: &SyncPlan,
        folder_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome>;
}

/// Write `bytes` to `relative` under `folder_root` atomically (write-to-temp +
/// rename), keeping the filesystem observer's hash-based change detection honest —
/// it never sees a partially written file (§4.7 phase 3).
pub fn write_atomic(folder_root: &Path, relative: &str, bytes: &[u8]) -> Result<()> {
    let dest = folder_root.join(relative);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = dest.clone().into_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, &dest)?;
    Ok(())
}

pub fn delete_if_present(folder_root: &Path, relative: &str) -> Result<bool> {
    let dest = folder_root.join(relative);
    if dest.exists() {
        std::fs::remove_file(&dest)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        write_atomic(dir.path(), "docs/a/b.txt", b"hello").unwrap();
        assert_eq!(std::fs::read(dir.path().join("docs/a/b.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_delete_if_present() {
        let dir = tempdir().unwrap();
        write_atomic(dir.path(), "a.txt", b"x").unwrap();
        assert!(delete_if_present(dir.path(), "a.txt").unwrap());
        assert!(!delete_if_present(dir.path(), "a.txt").unwrap());
    }
}
