//
// search/engine.rs
//
// Search orchestration over the wire protocol. Each request gets one
// walker; matches stream back in batches through a progress callback
// and every search finishes with exactly one completion callback,
// whether it ran out of files, hit the cap, failed or was cancelled.
//

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::glob::GlobExpression;
use super::walker::{FileMatch, FileWalker, MatchSink, SearchQuery};

/// Matches per progress notification.
const PROGRESS_BATCH: usize = 50;

/// A file search request as it arrives off the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSearchQuery {
    /// Caller-chosen identifier, used to cancel the search later.
    pub id: i64,
    pub root_paths: Vec<String>,
    #[serde(default)]
    pub extra_files: Vec<String>,
    #[serde(default)]
    pub file_pattern: String,
    #[serde(default)]
    pub match_fuzzy: bool,
    /// Glob expression: a pattern string or a pattern-to-value map.
    #[serde(default)]
    pub exclude_pattern: Option<Value>,
    #[serde(default)]
    pub include_pattern: Option<Value>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub disable_fast_file_lookup: bool,
}

// Notification params must round-trip; the LSP notification trait
// requires both serde directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchProgress {
    pub id: i64,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchComplete {
    pub id: i64,
    pub limit_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tracks in-flight searches so they can be cancelled by id.
#[derive(Default)]
pub struct SearchEngine {
    active: DashMap<i64, FileWalker>,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel the search with the given id, if still running. Matches
    /// already delivered stay delivered; the completion callback still
    /// fires exactly once.
    pub fn cancel(&self, id: i64) {
        if let Some(walker) = self.active.get(&id) {
            log::debug!("cancelling file search {id}");
            walker.cancel();
        }
    }

    /// Run one search to completion. `on_progress` receives batched
    /// match paths; `on_done` is invoked exactly once at the end.
    pub async fn search(
        &self,
        raw: RawSearchQuery,
        on_progress: impl Fn(SearchProgress) + Send + Sync + 'static,
        on_done: impl FnOnce(SearchComplete) + Send + 'static,
    ) {
        let id = raw.id;
        let walker = FileWalker::new(build_query(raw));
        self.active.insert(id, walker.clone());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<FileMatch>();
        let sink: MatchSink = Arc::new(move |m: FileMatch| {
            let _ = tx.send(m);
        });

        // The sink (and with it the channel sender) moves into the walk
        // task; the channel closes when the walk finishes.
        let walk_task = {
            let walker = walker.clone();
            tokio::spawn(async move { walker.walk(sink).await })
        };

        let mut batch = Vec::new();
        while let Some(found) = rx.recv().await {
            batch.push(found.path.to_string_lossy().into_owned());
            if batch.len() >= PROGRESS_BATCH {
                on_progress(SearchProgress {
                    id,
                    paths: std::mem::take(&mut batch),
                });
            }
        }
        if !batch.is_empty() {
            on_progress(SearchProgress { id, paths: batch });
        }

        let outcome = match walk_task.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("file search task failed: {e}")),
        };
        self.active.remove(&id);

        let complete = match outcome {
            Ok(outcome) => SearchComplete {
                id,
                limit_hit: outcome.limit_hit,
                error: None,
            },
            Err(e) => SearchComplete {
                id,
                limit_hit: false,
                error: Some(e.to_string()),
            },
        };
        on_done(complete);
    }
}

fn build_query(raw: RawSearchQuery) -> SearchQuery {
    SearchQuery {
        folders: raw.root_paths.into_iter().map(PathBuf::from).collect(),
        extra_files: raw.extra_files.into_iter().map(PathBuf::from).collect(),
        pattern: raw.file_pattern,
        match_fuzzy: raw.match_fuzzy,
        exclude: raw
            .exclude_pattern
            .as_ref()
            .map(GlobExpression::parse)
            .unwrap_or_default(),
        include: raw
            .include_pattern
            .as_ref()
            .map(GlobExpression::parse)
            .unwrap_or_default(),
        max_results: raw.max_results,
        disable_fast_lookup: raw.disable_fast_file_lookup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn raw(root_paths: Vec<String>) -> RawSearchQuery {
        RawSearchQuery {
            id: 1,
            root_paths,
            extra_files: Vec::new(),
            file_pattern: String::new(),
            match_fuzzy: false,
            exclude_pattern: None,
            include_pattern: None,
            max_results: None,
            disable_fast_file_lookup: false,
        }
    }

    #[tokio::test]
    async fn test_done_fires_once_on_error() {
        let engine = SearchEngine::new();
        let done_count = Arc::new(AtomicUsize::new(0));
        let done_clone = done_count.clone();

        engine
            .search(
                raw(vec!["/no/such/root".to_string()]),
                |_| {},
                move |complete| {
                    done_clone.fetch_add(1, Ordering::SeqCst);
                    assert!(complete.error.is_some());
                    assert!(!complete.limit_hit);
                },
            )
            .await;

        assert_eq!(done_count.load(Ordering::SeqCst), 1);
        assert_eq!(engine.active_count(), 0);
    }

    #[tokio::test]
    async fn test_search_empty_folder_list_completes_cleanly() {
        let engine = SearchEngine::new();
        let results = Arc::new(Mutex::new(Vec::new()));
        let results_clone = results.clone();
        let done = Arc::new(AtomicUsize::new(0));
        let done_clone = done.clone();

        engine
            .search(
                raw(Vec::new()),
                move |progress| {
                    results_clone.lock().unwrap().extend(progress.paths);
                },
                move |complete| {
                    done_clone.fetch_add(1, Ordering::SeqCst);
                    assert!(complete.error.is_none());
                },
            )
            .await;

        assert!(results.lock().unwrap().is_empty());
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_raw_query_wire_format() {
        let json = serde_json::json!({
            "id": 7,
            "rootPaths": ["/work"],
            "filePattern": "app",
            "matchFuzzy": true,
            "excludePattern": { "**/node_modules/**": true },
            "maxResults": 100
        });
        let raw: RawSearchQuery = serde_json::from_value(json).unwrap();
        assert_eq!(raw.id, 7);
        assert_eq!(raw.root_paths, vec!["/work".to_string()]);
        assert_eq!(raw.file_pattern, "app");
        assert!(raw.match_fuzzy);
        assert_eq!(raw.max_results, Some(100));
        assert!(raw.exclude_pattern.is_some());
        assert!(raw.extra_files.is_empty());
        assert!(!raw.disable_fast_file_lookup);
    }

    #[test]
    fn test_progress_round_trips_over_the_wire() {
        let progress = SearchProgress {
            id: 9,
            paths: vec!["/work/a.js".to_string()],
        };
        let value = serde_json::to_value(&progress).unwrap();
        let back: SearchProgress = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, 9);
        assert_eq!(back.paths, vec!["/work/a.js".to_string()]);
    }

    #[test]
    fn test_complete_serialization_omits_absent_error() {
        let complete = SearchComplete {
            id: 3,
            limit_hit: true,
            error: None,
        };
        let value = serde_json::to_value(&complete).unwrap();
        assert_eq!(value["limitHit"], true);
        assert!(value.get("error").is_none());
    }
}
