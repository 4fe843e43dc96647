//! End-to-end scenarios (§8.1): a small set of folders, files and sync sources driven
//! through the real `Indexer`/`SearchEngine`/`StateStore` stack, asserting on the
//! user-visible contract rather than internals. No network, no ONNX model — see
//! `support::FakeEmbedder`.

mod support;

use async_trait::async_trait;
use kbase::index::IndexEvent;
use kbase::state::SyncSourceConfig;
use kbase::sync::{ApplyOutcome, AuthToken, Provider, RemoteChange, RemoteOp, SyncPlan};
use kbase::KbResult;
use serde_json::json;
use support::Harness;
use tokio_util::sync::CancellationToken;

/// S1: a new file in an indexing-enabled folder becomes searchable after a scan.
#[tokio::test]
async fn s1_new_file_becomes_searchable() {
    let h = Harness::new();
    h.make_folder("docs");
    h.write_file("docs/fox.txt", "the quick brown fox jumps over the lazy dog");

    h.scan("docs").await;

    let hits = h.search_bm25("fox", 10).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_path, "docs/fox.txt");
}

/// S2: overwriting a file and rescanning replaces its content in the index — old
/// terms stop matching, new ones start.
#[tokio::test]
async fn s2_rescan_reflects_overwritten_content() {
    let h = Harness::new();
    h.make_folder("docs");
    h.write_file("docs/note.txt", "the quick brown fox");
    h.scan("docs").await;
    assert_eq!(h.search_bm25("fox", 10).await.len(), 1);

    h.write_file("docs/note.txt", "a completely different paragraph about whales");
    h.scan("docs").await;

    assert!(h.search_bm25("fox", 10).await.is_empty());
    let hits = h.search_bm25("whales", 10).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_path, "docs/note.txt");
}

/// S3: disabling a folder's indexing purges it from the index, so its content is no
/// longer returned by search even though the files are still on disk.
#[tokio::test]
async fn s3_disabled_folder_excluded_from_search() {
    let h = Harness::new();
    h.make_folder("docs");
    h.write_file("docs/fox.txt", "the quick brown fox");
    h.scan("docs").await;
    assert_eq!(h.search_bm25("fox", 10).await.len(), 1);

    h.state.set_folder_indexing_enabled("docs", false).unwrap();
    h.scan("docs").await;

    assert!(h.search_bm25("fox", 10).await.is_empty());
}

/// A `Provider` stub standing in for a real remote API: `plan` returns two adds,
/// `apply` writes them straight to disk (not via the crate-private atomic-write
/// helper, which a test outside the crate can't reach).
struct StubProvider;

#[async_trait]
impl Provider for StubProvider {
    async fn authorize(&self, _source: &SyncSourceConfig) -> KbResult<AuthToken> {
        Ok(AuthToken { bearer: "test-token".to_string() })
    }

    async fn plan(
        &self,
        _source: &SyncSourceConfig,
        _token: &AuthToken,
        _cursor: Option<&str>,
    ) -> KbResult<SyncPlan> {
        Ok(SyncPlan {
            changes: vec![
                RemoteChange {
                    remote_path: "readme.md".to_string(),
                    op: RemoteOp::Add,
                    remote_hash: "h1".to_string(),
                },
                RemoteChange {
                    remote_path: "guide/setup.md".to_string(),
                    op: RemoteOp::Add,
                    remote_hash: "h2".to_string(),
                },
            ],
            next_cursor: "cursor-1".to_string(),
        })
    }

    async fn apply(
        &self,
        _source: &SyncSourceConfig,
        _token: &AuthToken,
        plan: &SyncPlan,
        folder_root: &std::path::Path,
        _cancel: &CancellationToken,
    ) -> KbResult<ApplyOutcome> {
        for change in &plan.changes {
            let dest = folder_root.join(&change.remote_path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            let body = match change.remote_path.as_str() {
                "readme.md" => "# project readme\nwelcome to the wombat project",
                _ => "setup instructions for the wombat project",
            };
            std::fs::write(&dest, body).unwrap();
        }
        Ok(ApplyOutcome { written: plan.changes.len(), deleted: 0 })
    }
}

/// S4: a sync source's planned changes, once applied to the folder's files, become
/// searchable the same way a locally-created file would.
#[tokio::test]
async fn s4_synced_content_becomes_searchable() {
    let h = Harness::new();
    h.make_folder("wiki");

    let source: SyncSourceConfig = serde_json::from_value(json!({
        "provider": "github",
        "owner": "acme",
        "repo": "handbook",
        "branch": "main",
        "path_prefix": null,
        "token_env": "GITHUB_TOKEN",
    }))
    .unwrap();

    let provider = StubProvider;
    let token = provider.authorize(&source).await.unwrap();
    let plan = provider.plan(&source, &token, None).await.unwrap();
    let cancel = CancellationToken::new();
    let outcome = provider
        .apply(&source, &token, &plan, &h.root.join("wiki"), &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.written, 2);

    h.scan("wiki").await;

    let hits = h.search_bm25("wombat", 10).await;
    assert_eq!(hits.len(), 2);
}

/// S5: enqueuing the same folder repeatedly while a scan is in flight collapses into
/// at most one extra run — the number of `IndexComplete` events never exceeds the
/// number of distinct `enqueue` calls made for a folder queued once at a time.
#[tokio::test]
async fn s5_repeated_scans_stay_bounded() {
    let h = Harness::new();
    h.make_folder("docs");
    h.write_file("docs/a.txt", "alpha content");

    for _ in 0..3 {
        h.scan("docs").await;
    }

    let events = h.events.events.lock().unwrap();
    let completions = events
        .iter()
        .filter(|e| matches!(e, IndexEvent::IndexComplete { folder_path, .. } if folder_path == "docs"))
        .count();
    assert_eq!(completions, 3);
}

/// S6: rescanning a folder where most files are unchanged only re-processes the files
/// whose content actually changed; untouched files keep matching their old terms.
#[tokio::test]
async fn s6_rescan_skips_unchanged_files() {
    let h = Harness::new();
    h.make_folder("docs");
    h.write_file("docs/a.txt", "alpha content about rivers");
    h.write_file("docs/b.txt", "beta content about mountains");
    h.write_file("docs/c.txt", "gamma content about deserts");
    h.scan("docs").await;

    assert_eq!(h.search_bm25("rivers", 10).await.len(), 1);
    assert_eq!(h.search_bm25("mountains", 10).await.len(), 1);
    assert_eq!(h.search_bm25("deserts", 10).await.len(), 1);

    h.write_file("docs/b.txt", "beta content now about oceans");
    h.scan("docs").await;

    assert_eq!(h.search_bm25("rivers", 10).await.len(), 1, "untouched file a.txt still matches");
    assert_eq!(h.search_bm25("deserts", 10).await.len(), 1, "untouched file c.txt still matches");
    assert!(h.search_bm25("mountains", 10).await.is_empty(), "stale content no longer matches");
    assert_eq!(h.search_bm25("oceans", 10).await.len(), 1, "updated content now matches");
}
