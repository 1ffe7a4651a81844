//
// file_search.rs — end-to-end walker and search engine tests against
// real directory trees.
//

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;

use osprey::search::engine::RawSearchQuery;
use osprey::search::walker::{FileMatch, MatchSink, SearchQuery};
use osprey::search::{FileWalker, GlobExpression, SearchEngine};

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn collecting_sink() -> (MatchSink, Arc<Mutex<Vec<PathBuf>>>) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink_copy = collected.clone();
    let sink: MatchSink = Arc::new(move |m: FileMatch| {
        sink_copy.lock().unwrap().push(m.path);
    });
    (sink, collected)
}

fn relative_set(root: &Path, paths: &[PathBuf]) -> BTreeSet<String> {
    paths
        .iter()
        .map(|p| {
            p.strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/")
        })
        .collect()
}

#[tokio::test]
async fn walk_excludes_node_modules() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("src/app.js"), "");
    write_file(&root.join("src/util.js"), "");
    write_file(&root.join("node_modules/lodash/index.js"), "");
    write_file(&root.join("pkg/node_modules/x.js"), "");

    let walker = FileWalker::new(SearchQuery {
        folders: vec![root.to_path_buf()],
        exclude: GlobExpression::parse(&json!({ "**/node_modules/**": true })),
        ..Default::default()
    });
    let (sink, collected) = collecting_sink();
    let outcome = walker.walk(sink).await.unwrap();

    let found = relative_set(root, &collected.lock().unwrap());
    assert_eq!(
        found,
        BTreeSet::from(["src/app.js".to_string(), "src/util.js".to_string()])
    );
    assert!(!outcome.limit_hit);
}

#[tokio::test]
async fn walk_portable_only_agrees_with_fast_path() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("src/app.js"), "");
    write_file(&root.join("src/util.js"), "");
    write_file(&root.join("node_modules/lodash/index.js"), "");

    let walker = FileWalker::new(SearchQuery {
        folders: vec![root.to_path_buf()],
        exclude: GlobExpression::parse(&json!({ "**/node_modules/**": true })),
        disable_fast_lookup: true,
        ..Default::default()
    });
    let (sink, collected) = collecting_sink();
    walker.walk(sink).await.unwrap();

    let found = relative_set(root, &collected.lock().unwrap());
    assert_eq!(
        found,
        BTreeSet::from(["src/app.js".to_string(), "src/util.js".to_string()])
    );
}

#[tokio::test]
async fn walk_respects_max_results() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for i in 0..5 {
        write_file(&root.join(format!("file{i}.txt")), "");
    }

    let walker = FileWalker::new(SearchQuery {
        folders: vec![root.to_path_buf()],
        max_results: Some(3),
        ..Default::default()
    });
    let (sink, collected) = collecting_sink();
    let outcome = walker.walk(sink).await.unwrap();

    assert_eq!(collected.lock().unwrap().len(), 3);
    assert!(outcome.limit_hit);
}

#[tokio::test]
async fn walk_root_that_is_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("single.txt");
    write_file(&file, "");

    let walker = FileWalker::new(SearchQuery {
        folders: vec![file.clone()],
        ..Default::default()
    });
    let (sink, collected) = collecting_sink();
    walker.walk(sink).await.unwrap();

    assert_eq!(collected.lock().unwrap().as_slice(), &[file]);
}

#[tokio::test]
async fn walk_fuzzy_pattern_filters_by_relative_path() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("src/reader.js"), "");
    write_file(&root.join("src/writer.js"), "");
    write_file(&root.join("README.md"), "");

    let walker = FileWalker::new(SearchQuery {
        folders: vec![root.to_path_buf()],
        pattern: "readme".to_string(),
        match_fuzzy: true,
        ..Default::default()
    });
    let (sink, collected) = collecting_sink();
    walker.walk(sink).await.unwrap();

    let found = relative_set(root, &collected.lock().unwrap());
    // Only README.md contains r-e-a-d-m-e in order.
    assert_eq!(found, BTreeSet::from(["README.md".to_string()]));
}

#[tokio::test]
async fn walk_plain_pattern_matches_basename_substring() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("src/reader.js"), "");
    write_file(&root.join("src/writer.js"), "");
    write_file(&root.join("read/other.js"), "");

    let walker = FileWalker::new(SearchQuery {
        folders: vec![root.to_path_buf()],
        pattern: "read".to_string(),
        ..Default::default()
    });
    let (sink, collected) = collecting_sink();
    walker.walk(sink).await.unwrap();

    // Without fuzzy matching the pattern applies to basenames only, so
    // the directory named "read" does not pull in its contents.
    let found = relative_set(root, &collected.lock().unwrap());
    assert_eq!(found, BTreeSet::from(["src/reader.js".to_string()]));
}

#[tokio::test]
async fn walk_include_pattern_limits_results() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("a.js"), "");
    write_file(&root.join("b.ts"), "");
    write_file(&root.join("deep/c.js"), "");

    let walker = FileWalker::new(SearchQuery {
        folders: vec![root.to_path_buf()],
        include: GlobExpression::parse(&json!("**/*.js")),
        ..Default::default()
    });
    let (sink, collected) = collecting_sink();
    walker.walk(sink).await.unwrap();

    let found = relative_set(root, &collected.lock().unwrap());
    assert_eq!(
        found,
        BTreeSet::from(["a.js".to_string(), "deep/c.js".to_string()])
    );
}

#[tokio::test]
async fn walk_sibling_clause_excludes_shadowed_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("app.js"), "");
    write_file(&root.join("app.ts"), "");
    write_file(&root.join("lonely.js"), "");

    let walker = FileWalker::new(SearchQuery {
        folders: vec![root.to_path_buf()],
        exclude: GlobExpression::parse(&json!({ "**/*.js": { "when": "$(basename).ts" } })),
        ..Default::default()
    });
    let (sink, collected) = collecting_sink();
    walker.walk(sink).await.unwrap();

    let found = relative_set(root, &collected.lock().unwrap());
    assert_eq!(
        found,
        BTreeSet::from(["app.ts".to_string(), "lonely.js".to_string()])
    );
}

#[tokio::test]
async fn walk_exact_pattern_name_bypasses_sibling_exclude() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("app.js"), "");
    write_file(&root.join("app.ts"), "");

    let walker = FileWalker::new(SearchQuery {
        folders: vec![root.to_path_buf()],
        pattern: "app.js".to_string(),
        exclude: GlobExpression::parse(&json!({ "**/*.js": { "when": "$(basename).ts" } })),
        ..Default::default()
    });
    let (sink, collected) = collecting_sink();
    walker.walk(sink).await.unwrap();

    // The shadowed file is exactly what was asked for, and it is
    // reported only once even though the pattern names it directly.
    let found: Vec<_> = collected.lock().unwrap().clone();
    assert_eq!(found, vec![root.join("app.js")]);
}

#[tokio::test]
async fn walk_exact_pattern_name_still_respects_plain_excludes() {
    // The exact-name bypass only disarms sibling clauses; an
    // unconditional exclude still wins over a pattern-named file.
    for disable_fast_lookup in [false, true] {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("src/foo.ts"), "");
        write_file(&root.join("node_modules/foo.ts"), "");

        let walker = FileWalker::new(SearchQuery {
            folders: vec![root.to_path_buf()],
            pattern: "foo.ts".to_string(),
            exclude: GlobExpression::parse(&json!({ "**/node_modules/**": true })),
            disable_fast_lookup,
            ..Default::default()
        });
        let (sink, collected) = collecting_sink();
        walker.walk(sink).await.unwrap();

        let found = collected.lock().unwrap().clone();
        assert_eq!(
            found,
            vec![root.join("src/foo.ts")],
            "disable_fast_lookup={disable_fast_lookup}"
        );
    }
}

#[tokio::test]
async fn walk_extra_files_bypass_sibling_excludes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("app.js"), "");
    write_file(&root.join("app.ts"), "");

    let walker = FileWalker::new(SearchQuery {
        folders: Vec::new(),
        extra_files: vec![root.join("app.js")],
        exclude: GlobExpression::parse(&json!({ "**/*.js": { "when": "$(basename).ts" } })),
        ..Default::default()
    });
    let (sink, collected) = collecting_sink();
    walker.walk(sink).await.unwrap();

    assert_eq!(collected.lock().unwrap().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn walk_terminates_on_symlink_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("a.txt"), "");
    write_file(&root.join("sub/b.txt"), "");
    std::os::unix::fs::symlink(root, root.join("sub/loop")).unwrap();

    let walker = FileWalker::new(SearchQuery {
        folders: vec![root.to_path_buf()],
        ..Default::default()
    });
    let (sink, collected) = collecting_sink();
    let outcome = walker.walk(sink).await.unwrap();

    let found = relative_set(root, &collected.lock().unwrap());
    assert_eq!(
        found,
        BTreeSet::from(["a.txt".to_string(), "sub/b.txt".to_string()])
    );
    assert!(!outcome.limit_hit);
}

#[tokio::test]
async fn cancelled_walker_reports_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("a.txt"), "");

    let walker = FileWalker::new(SearchQuery {
        folders: vec![root.to_path_buf()],
        ..Default::default()
    });
    walker.cancel();
    let (sink, collected) = collecting_sink();
    let _ = walker.walk(sink).await;

    assert!(collected.lock().unwrap().is_empty());
}

#[tokio::test]
async fn engine_batches_progress_and_completes_once() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for i in 0..120 {
        write_file(&root.join(format!("file{i:03}.txt")), "");
    }

    let engine = SearchEngine::new();
    let batches = Arc::new(Mutex::new(Vec::new()));
    let batches_clone = batches.clone();
    let done_count = Arc::new(AtomicUsize::new(0));
    let done_clone = done_count.clone();

    engine
        .search(
            RawSearchQuery {
                id: 42,
                root_paths: vec![root.to_string_lossy().into_owned()],
                extra_files: Vec::new(),
                file_pattern: String::new(),
                match_fuzzy: false,
                exclude_pattern: None,
                include_pattern: None,
                max_results: None,
                disable_fast_file_lookup: false,
            },
            move |progress| {
                assert_eq!(progress.id, 42);
                batches_clone.lock().unwrap().push(progress.paths.len());
            },
            move |complete| {
                done_clone.fetch_add(1, Ordering::SeqCst);
                assert_eq!(complete.id, 42);
                assert!(!complete.limit_hit);
                assert!(complete.error.is_none());
            },
        )
        .await;

    let batches = batches.lock().unwrap();
    let total: usize = batches.iter().sum();
    assert_eq!(total, 120);
    assert!(batches.len() >= 3);
    assert!(batches.iter().all(|&len| len <= 50));
    assert_eq!(done_count.load(Ordering::SeqCst), 1);
    assert_eq!(engine.active_count(), 0);
}

#[tokio::test]
async fn engine_limit_hit_delivers_exact_cap() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for i in 0..10 {
        write_file(&root.join(format!("f{i}.txt")), "");
    }

    let engine = SearchEngine::new();
    let delivered = Arc::new(AtomicUsize::new(0));
    let delivered_clone = delivered.clone();
    let limit_seen = Arc::new(AtomicUsize::new(0));
    let limit_clone = limit_seen.clone();

    engine
        .search(
            RawSearchQuery {
                id: 7,
                root_paths: vec![root.to_string_lossy().into_owned()],
                extra_files: Vec::new(),
                file_pattern: String::new(),
                match_fuzzy: false,
                exclude_pattern: None,
                include_pattern: None,
                max_results: Some(4),
                disable_fast_file_lookup: false,
            },
            move |progress| {
                delivered_clone.fetch_add(progress.paths.len(), Ordering::SeqCst);
            },
            move |complete| {
                if complete.limit_hit {
                    limit_clone.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .await;

    assert_eq!(delivered.load(Ordering::SeqCst), 4);
    assert_eq!(limit_seen.load(Ordering::SeqCst), 1);
}
