//
// search/walker.rs
//
// Filesystem traversal for file search. Each search root is walked on
// its own task; on Unix a `find -L` subprocess provides the fast path,
// with a portable recursive walk as the fallback (and the only path on
// other platforms). Matches stream through a caller-provided sink;
// cancellation stops emission immediately, while the result cap only
// suppresses further matches as the walk winds down.
//

#[cfg(unix)]
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use dashmap::DashSet;
use tokio_util::sync::CancellationToken;

use super::fuzzy::FuzzyQuery;
use super::glob::GlobExpression;

/// One file search request.
#[derive(Debug, Default)]
pub struct SearchQuery {
    /// Root folders to traverse.
    pub folders: Vec<PathBuf>,
    /// Files searched regardless of any folder, e.g. open editors for
    /// files outside the workspace. Sibling-conditional excludes do not
    /// apply to these.
    pub extra_files: Vec<PathBuf>,
    /// File name pattern; empty matches everything.
    pub pattern: String,
    /// Gap-tolerant subsequence matching against the relative path;
    /// when false the pattern must appear contiguously in the basename.
    pub match_fuzzy: bool,
    pub exclude: GlobExpression,
    pub include: GlobExpression,
    /// Result cap. Exactly this many matches are delivered; later
    /// matches are suppressed while the walk winds down.
    pub max_results: Option<usize>,
    /// Skip the `find` subprocess and use the portable walk only.
    pub disable_fast_lookup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatch {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOutcome {
    pub limit_hit: bool,
}

pub type MatchSink = Arc<dyn Fn(FileMatch) + Send + Sync>;

/// A single-use walker for one [`SearchQuery`].
#[derive(Clone)]
pub struct FileWalker {
    inner: Arc<WalkerInner>,
}

struct WalkerInner {
    query: SearchQuery,
    fuzzy: FuzzyQuery,
    cancel: CancellationToken,
    result_count: AtomicUsize,
    limit_hit: AtomicBool,
    /// Canonical paths of directories already entered, shared across
    /// roots so symlink cycles and overlapping roots are walked once.
    walked_dirs: DashSet<PathBuf>,
    /// Files already reported up front (extra files, pattern-named
    /// files); the traversal must not report them again.
    explicit_matches: DashSet<PathBuf>,
}

impl FileWalker {
    pub fn new(query: SearchQuery) -> Self {
        let fuzzy = FuzzyQuery::new(&query.pattern);
        Self {
            inner: Arc::new(WalkerInner {
                query,
                fuzzy,
                cancel: CancellationToken::new(),
                result_count: AtomicUsize::new(0),
                limit_hit: AtomicBool::new(false),
                walked_dirs: DashSet::new(),
                explicit_matches: DashSet::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn result_count(&self) -> usize {
        self.inner.result_count.load(Ordering::SeqCst)
    }

    /// Run the walk to completion. The sink is called once per match;
    /// matches from different roots interleave. Returns the first root
    /// error encountered, if any.
    pub async fn walk(&self, on_match: MatchSink) -> anyhow::Result<WalkOutcome> {
        self.inner.match_extra_files(&on_match);
        self.inner.match_absolute_pattern(&on_match);

        let mut handles = Vec::new();
        for root in &self.inner.query.folders {
            let inner = self.inner.clone();
            let sink = on_match.clone();
            let root = root.clone();
            handles.push(tokio::spawn(async move {
                WalkerInner::walk_root(inner, &root, sink).await
            }));
        }

        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(anyhow!("walk task failed: {e}"));
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(WalkOutcome {
            limit_hit: self.inner.limit_hit.load(Ordering::SeqCst),
        })
    }
}

impl WalkerInner {
    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deliver one match unless cancelled or over the cap. Returns
    /// whether the caller should keep walking: false only on
    /// cancellation. Hitting the cap sets the limit flag and suppresses
    /// the match, but the walk itself still runs to completion.
    /// `explicit` marks up-front matches (extra files, pattern-named
    /// files) which the traversal must not deliver a second time.
    fn emit(&self, path: PathBuf, sink: &MatchSink, explicit: bool) -> bool {
        if self.cancelled() {
            return false;
        }
        if explicit {
            if !self.explicit_matches.insert(path.clone()) {
                return true;
            }
        } else if self.explicit_matches.contains(&path) {
            return true;
        }
        if let Some(max) = self.query.max_results {
            let previous = self.result_count.fetch_add(1, Ordering::SeqCst);
            if previous >= max {
                self.limit_hit.store(true, Ordering::SeqCst);
                return true;
            }
        } else {
            self.result_count.fetch_add(1, Ordering::SeqCst);
        }
        sink(FileMatch { path });
        true
    }

    fn accepts(&self, rel: &str, basename: &str, siblings: Option<&[String]>) -> bool {
        // A file named exactly like the query pattern is a deliberate
        // target; sibling-conditional excludes do not refine it away.
        let exclude_siblings = if basename == self.query.pattern {
            None
        } else {
            siblings
        };
        if self.query.exclude.matches(rel, basename, exclude_siblings) {
            return false;
        }
        let name_matches = if self.query.match_fuzzy {
            self.fuzzy.matches(rel)
        } else {
            self.fuzzy.matches_contiguous(basename)
        };
        if !name_matches {
            return false;
        }
        if !self.query.include.is_empty() && !self.query.include.matches(rel, basename, siblings) {
            return false;
        }
        true
    }

    /// Explicitly listed files are matched without a sibling list, so
    /// sibling-conditional excludes never suppress them.
    fn match_extra_files(&self, sink: &MatchSink) {
        for file in &self.query.extra_files {
            if self.cancelled() {
                return;
            }
            let Some(basename) = file.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            let rel = slashed(file);
            if self.accepts(&rel, &basename, None) && !self.emit(file.clone(), sink, true) {
                return;
            }
        }
    }

    /// A pattern naming an existing absolute file is itself a match,
    /// unless it duplicates a search root (the root walk handles that).
    fn match_absolute_pattern(&self, sink: &MatchSink) {
        if self.query.pattern.is_empty() {
            return;
        }
        let candidate = Path::new(&self.query.pattern);
        if candidate.is_absolute()
            && candidate.is_file()
            && !self.query.folders.iter().any(|f| f.as_path() == candidate)
        {
            let Some(basename) = candidate.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                return;
            };
            if !self.query.exclude.matches(&slashed(candidate), &basename, None) {
                self.emit(candidate.to_path_buf(), sink, true);
            }
        }
    }

    /// The pattern resolved against a root may also name a file
    /// directly, e.g. a relative path pasted into the picker.
    fn match_relative_pattern(&self, root: &Path, sink: &MatchSink) {
        if self.query.pattern.is_empty() || Path::new(&self.query.pattern).is_absolute() {
            return;
        }
        let candidate = root.join(&self.query.pattern);
        if !candidate.is_file() {
            return;
        }
        let Some(basename) = candidate.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            return;
        };
        let Some(rel) = rel_slashed(root, &candidate) else {
            return;
        };
        if !self.query.exclude.matches(&rel, &basename, None) {
            self.emit(candidate, sink, true);
        }
    }

    async fn walk_root(
        self: Arc<Self>,
        root: &Path,
        sink: MatchSink,
    ) -> anyhow::Result<()> {
        let metadata = fs::metadata(root)
            .with_context(|| format!("cannot access search root {}", root.display()))?;

        // A root that is itself a file is a single candidate.
        if metadata.is_file() {
            let Some(basename) = root.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                return Ok(());
            };
            if self.accepts(&basename, &basename, None) {
                self.emit(root.to_path_buf(), &sink, false);
            }
            return Ok(());
        }

        self.match_relative_pattern(root, &sink);

        #[cfg(unix)]
        if !self.query.disable_fast_lookup {
            match self.spawn_find(root) {
                Ok(child) => return self.consume_find_output(root, child, sink).await,
                Err(e) => {
                    log::debug!(
                        "find unavailable for {}, using portable walk: {e}",
                        root.display()
                    );
                }
            }
        }

        let this = self.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || this.walk_dir_recursive(&root, &root, &sink)).await?
    }

    #[cfg(unix)]
    fn spawn_find(&self, root: &Path) -> std::io::Result<tokio::process::Child> {
        tokio::process::Command::new("find")
            .arg("-L")
            .arg(root)
            .args(["-type", "f"])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }

    /// Fast path: stream `find` output, then filter. Filtering needs
    /// each file's sibling list and its ancestor directories, so the
    /// listing is indexed by parent directory first. Ancestor excludes
    /// use the sibling-conservative glob check.
    #[cfg(unix)]
    async fn consume_find_output(
        &self,
        root: &Path,
        mut child: tokio::process::Child,
        sink: MatchSink,
    ) -> anyhow::Result<()> {
        use tokio::io::AsyncBufReadExt;

        let stdout = child
            .stdout
            .take()
            .context("find produced no stdout handle")?;
        let mut lines = tokio::io::BufReader::new(stdout).lines();

        let mut files: Vec<PathBuf> = Vec::new();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = child.start_kill();
                    break;
                }
                line = lines.next_line() => match line? {
                    Some(line) if !line.is_empty() => files.push(PathBuf::from(line)),
                    Some(_) => {}
                    None => break,
                }
            }
        }
        match child.wait().await {
            Ok(status) if !status.success() => {
                log::trace!("find for {} exited with {status}", root.display());
            }
            Ok(_) => {}
            Err(e) => log::trace!("find for {} could not be reaped: {e}", root.display()),
        }

        let mut siblings: HashMap<PathBuf, Vec<String>> = HashMap::new();
        for file in &files {
            if let (Some(parent), Some(name)) = (file.parent(), file.file_name()) {
                siblings
                    .entry(parent.to_path_buf())
                    .or_default()
                    .push(name.to_string_lossy().into_owned());
            }
        }

        let mut excluded_dirs: HashMap<PathBuf, bool> = HashMap::new();
        for file in files {
            if self.cancelled() {
                break;
            }
            let Some(parent) = file.parent() else {
                continue;
            };
            if self.dir_chain_excluded(root, parent, &mut excluded_dirs) {
                continue;
            }
            let Some(rel) = rel_slashed(root, &file) else {
                continue;
            };
            let Some(basename) = file.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            let sibling_names = siblings.get(parent).map(|v| v.as_slice());
            if self.accepts(&rel, &basename, sibling_names) && !self.emit(file, &sink, false) {
                break;
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn dir_chain_excluded(
        &self,
        root: &Path,
        dir: &Path,
        memo: &mut HashMap<PathBuf, bool>,
    ) -> bool {
        if dir == root || !dir.starts_with(root) {
            return false;
        }
        if let Some(&known) = memo.get(dir) {
            return known;
        }
        let parent_excluded = dir
            .parent()
            .map(|p| self.dir_chain_excluded(root, p, memo))
            .unwrap_or(false);
        let excluded = parent_excluded
            || match (rel_slashed(root, dir), dir.file_name()) {
                (Some(rel), Some(name)) => self
                    .query
                    .exclude
                    .matches_conservative(&rel, &name.to_string_lossy()),
                _ => false,
            };
        memo.insert(dir.to_path_buf(), excluded);
        excluded
    }

    /// Portable walk: manual recursion so each directory's full entry
    /// list is in hand for sibling-conditional globs. Symlinks are
    /// followed; the canonical-path set breaks cycles. Unreadable
    /// subdirectories are skipped; only an unreadable root is an error.
    fn walk_dir_recursive(
        &self,
        root: &Path,
        dir: &Path,
        sink: &MatchSink,
    ) -> anyhow::Result<()> {
        if self.cancelled() {
            return Ok(());
        }

        match fs::canonicalize(dir) {
            Ok(canonical) => {
                if !self.walked_dirs.insert(canonical) {
                    return Ok(());
                }
            }
            Err(_) => return Ok(()),
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                if dir == root {
                    return Err(anyhow!("cannot read search root {}: {e}", root.display()));
                }
                log::debug!("skipping unreadable directory {}: {e}", dir.display());
                return Ok(());
            }
        };

        let mut names = Vec::new();
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            // metadata() follows symlinks; broken links drop out here
            let Ok(metadata) = fs::metadata(&path) else {
                continue;
            };
            if metadata.is_dir() {
                dirs.push((path, name.clone()));
            } else if metadata.is_file() {
                files.push((path, name.clone()));
            }
            names.push(name);
        }

        for (path, basename) in files {
            if self.cancelled() {
                return Ok(());
            }
            let Some(rel) = rel_slashed(root, &path) else {
                continue;
            };
            if self.accepts(&rel, &basename, Some(&names)) && !self.emit(path, sink, false) {
                return Ok(());
            }
        }

        for (path, basename) in dirs {
            if self.cancelled() {
                return Ok(());
            }
            let Some(rel) = rel_slashed(root, &path) else {
                continue;
            };
            if self.query.exclude.matches(&rel, &basename, Some(&names)) {
                continue;
            }
            self.walk_dir_recursive(root, &path, sink)?;
        }
        Ok(())
    }
}

/// Path relative to `root`, '/'-separated.
fn rel_slashed(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(slashed(rel))
}

/// '/'-separated rendering of a path, without a leading separator.
fn slashed(path: &Path) -> String {
    let text = path.to_string_lossy();
    let text = if std::path::MAIN_SEPARATOR == '/' {
        text.into_owned()
    } else {
        text.replace(std::path::MAIN_SEPARATOR, "/")
    };
    text.trim_start_matches('/').to_string()
}
