//
// host.rs
//
// Language service host adapter: owns the single lazily-loaded script
// engine, resolves script content for engine consumption, and holds the
// shared mutable compilation settings.
//
// The engine's historical "current document" focus slot is replaced by
// explicit EngineSession values: every query path gets a session bound
// to one document snapshot, so there is no last-writer-wins state to
// race on.
//

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use tokio::sync::OnceCell;
use tower_lsp::lsp_types::Url;

use crate::engine::{EngineSession, ScriptEngine};

/// Compilation settings shared by all sessions. Mutated in place so the
/// engine never pays a reinitialization cost for a settings change.
#[derive(Debug, Clone)]
pub struct CompileSettings {
    /// Run syntax validation and publish diagnostics.
    pub validate: bool,
    /// Expose proposed runtime globals to completions and hover.
    pub experimental_globals: bool,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            validate: true,
            experimental_globals: false,
        }
    }
}

/// Host adapter around one [`ScriptEngine`] instance.
pub struct ScriptHost {
    engine: OnceCell<Arc<ScriptEngine>>,
    settings: Arc<RwLock<CompileSettings>>,
    disposed: AtomicBool,
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptHost {
    pub fn new() -> Self {
        Self {
            engine: OnceCell::new(),
            settings: Arc::new(RwLock::new(CompileSettings::default())),
            disposed: AtomicBool::new(false),
        }
    }

    /// The engine instance, loading it on first use. Concurrent callers
    /// all await the same in-flight load; the engine is created at most
    /// once per host.
    pub async fn engine(&self) -> anyhow::Result<Arc<ScriptEngine>> {
        let engine = self
            .engine
            .get_or_try_init(ScriptEngine::load)
            .await?;
        Ok(engine.clone())
    }

    /// Create an analysis session for a document. `live_text` is the
    /// editor's in-memory content; when absent, content is resolved from
    /// disk and then from the builtin library snapshots.
    pub async fn session(
        &self,
        uri: &Url,
        live_text: Option<&str>,
        version: i32,
    ) -> anyhow::Result<EngineSession> {
        let engine = self.engine().await?;
        let file_name = uri_to_native_path(uri);

        let text = match live_text {
            Some(text) => text.to_string(),
            None => self
                .resolve_script_text(&engine, &file_name)
                .ok_or_else(|| anyhow!("no content available for {file_name}"))?,
        };

        let settings = self.settings_snapshot();
        Ok(EngineSession::new(engine, file_name, text, version, settings))
    }

    /// Script content resolution order: live document text is handled by
    /// the caller; here it is real filesystem first, builtin library
    /// snapshot second. Anything else does not resolve.
    pub fn resolve_script_text(&self, engine: &ScriptEngine, file_name: &str) -> Option<String> {
        if Path::new(file_name).is_file() {
            match std::fs::read_to_string(file_name) {
                Ok(text) => return Some(text),
                Err(e) => {
                    log::warn!("failed to read script {}: {}", file_name, e);
                    return None;
                }
            }
        }
        engine.library_source(file_name).map(|s| s.to_string())
    }

    /// File-existence check matching the resolution order above.
    pub fn script_exists(&self, engine: &ScriptEngine, file_name: &str) -> bool {
        Path::new(file_name).is_file() || engine.library_source(file_name).is_some()
    }

    /// Shared mutable compilation settings.
    pub fn settings(&self) -> Arc<RwLock<CompileSettings>> {
        self.settings.clone()
    }

    pub fn settings_snapshot(&self) -> CompileSettings {
        self.settings
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut CompileSettings)) {
        if let Ok(mut guard) = self.settings.write() {
            update(&mut guard);
        }
    }

    /// Mark the host released. Idempotent; the engine Arc is dropped
    /// with the host itself.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            log::debug!("script host disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Normalize a document URI to a native filesystem path for engine
/// consumption. Non-file schemes keep a slash-normalized form of their
/// path; on Windows, escaped segments are decoded and separators
/// flipped.
pub fn uri_to_native_path(uri: &Url) -> String {
    if uri.scheme() == "file" {
        if let Ok(path) = uri.to_file_path() {
            return path.to_string_lossy().into_owned();
        }
    }

    #[cfg(windows)]
    {
        percent_decode(uri.path()).replace('/', "\\")
    }
    #[cfg(not(windows))]
    {
        uri.path().to_string()
    }
}

#[cfg(windows)]
fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&path[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_loaded_once() {
        let host = ScriptHost::new();
        let first = host.engine().await.unwrap();
        let second = host.engine().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_concurrent_engine_loads_share_instance() {
        let host = Arc::new(ScriptHost::new());
        let a = host.clone();
        let b = host.clone();
        let (ea, eb) = tokio::join!(
            async move { a.engine().await.unwrap() },
            async move { b.engine().await.unwrap() }
        );
        assert!(Arc::ptr_eq(&ea, &eb));
    }

    #[tokio::test]
    async fn test_session_prefers_live_text() {
        let host = ScriptHost::new();
        let uri = Url::parse("file:///not/on/disk.js").unwrap();
        let session = host.session(&uri, Some("var live = 1;"), 7).await.unwrap();
        assert_eq!(session.text, "var live = 1;");
        assert_eq!(session.version, 7);
    }

    #[tokio::test]
    async fn test_session_resolves_builtin_library() {
        let host = ScriptHost::new();
        let uri = Url::parse("file:///bundled/lib.global.js").unwrap();
        let session = host.session(&uri, None, 0).await.unwrap();
        assert!(session.text.contains("parseInt"));
    }

    #[tokio::test]
    async fn test_session_unresolvable_fails() {
        let host = ScriptHost::new();
        let uri = Url::parse("file:///definitely/missing.js").unwrap();
        assert!(host.session(&uri, None, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_settings_shared_and_mutable() {
        let host = ScriptHost::new();
        assert!(!host.settings_snapshot().experimental_globals);
        host.update_settings(|s| s.experimental_globals = true);
        assert!(host.settings_snapshot().experimental_globals);

        let uri = Url::parse("file:///x.js").unwrap();
        let session = host.session(&uri, Some(""), 0).await.unwrap();
        assert!(session.settings.experimental_globals);
    }

    #[test]
    fn test_dispose_idempotent() {
        let host = ScriptHost::new();
        host.dispose();
        host.dispose();
        assert!(host.is_disposed());
    }

    #[test]
    fn test_uri_to_native_path_file_scheme() {
        let uri = Url::parse("file:///proj/src/app.js").unwrap();
        let path = uri_to_native_path(&uri);
        assert!(path.ends_with("app.js"));
    }

    #[test]
    fn test_uri_to_native_path_other_scheme() {
        let uri = Url::parse("untitled:/Untitled-1").unwrap();
        let path = uri_to_native_path(&uri);
        assert!(path.contains("Untitled-1"));
    }
}
