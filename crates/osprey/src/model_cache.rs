//
// model_cache.rs
//
// Bounded cache mapping a document (URI + version) to a derived model,
// e.g. the embedded script sub-document. Entries are evicted by LRU
// capacity, by idle age, and immediately when the owning document closes.
//

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use tower_lsp::lsp_types::Url;

use crate::document::Document;

/// Eviction bounds for a [`DocumentModelCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of documents to keep derived models for.
    pub max_entries: usize,
    /// Maximum idle time before an entry is dropped.
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10,
            max_age: Duration::from_secs(60),
        }
    }
}

struct CacheEntry<T> {
    version: i32,
    artifact: Arc<T>,
    last_access: Instant,
}

type DeriveFn<T> = Box<dyn Fn(&Document) -> anyhow::Result<T> + Send + Sync>;

/// Version-checked LRU cache of derived per-document models.
///
/// A cached artifact is only returned while its source version matches the
/// current document version; a mismatch forces recomputation. Derivation
/// failures propagate to the caller and are never cached.
pub struct DocumentModelCache<T> {
    entries: Mutex<LruCache<Url, CacheEntry<T>>>,
    derive: DeriveFn<T>,
    config: CacheConfig,
}

impl<T> DocumentModelCache<T> {
    pub fn new<F>(config: CacheConfig, derive: F) -> Self
    where
        F: Fn(&Document) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let capacity = NonZeroUsize::new(config.max_entries.max(1)).expect("max(1) is non-zero");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            derive: Box::new(derive),
            config,
        }
    }

    /// Fetch the derived model for `document`, recomputing it when the
    /// cached version is stale.
    pub fn get(&self, uri: &Url, document: &Document) -> anyhow::Result<Arc<T>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        Self::sweep(&mut entries, self.config.max_age);

        if let Some(entry) = entries.get_mut(uri) {
            if entry.version == document.version {
                entry.last_access = Instant::now();
                return Ok(entry.artifact.clone());
            }
        }

        let artifact = Arc::new((self.derive)(document)?);
        entries.push(
            uri.clone(),
            CacheEntry {
                version: document.version,
                artifact: artifact.clone(),
                last_access: Instant::now(),
            },
        );
        Ok(artifact)
    }

    /// Drop the entry for a closed document immediately.
    pub fn on_document_removed(&self, uri: &Url) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.pop(uri);
    }

    pub fn dispose(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(entries: &mut LruCache<Url, CacheEntry<T>>, max_age: Duration) {
        let stale: Vec<Url> = entries
            .iter()
            .filter(|(_, entry)| entry.last_access.elapsed() > max_age)
            .map(|(uri, _)| uri.clone())
            .collect();
        for uri in stale {
            entries.pop(&uri);
        }
    }
}
