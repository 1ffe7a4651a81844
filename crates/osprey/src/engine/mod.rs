//
// engine/mod.rs
//
// The script analysis engine: offset-native queries over a parsed
// script document. The engine knows nothing about editor positions;
// everything here speaks byte offsets and TextSpans. Translation into
// editor ranges happens in the language mode facade.
//

pub mod classify;
pub mod format;
pub mod navigate;
pub mod scope;

use std::sync::Arc;

use anyhow::anyhow;
use tree_sitter::{Language, Node, Parser, Tree};

use crate::host::CompileSettings;

/// Engine-native text span: byte offset + byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextSpan {
    pub start: usize,
    pub length: usize,
}

impl TextSpan {
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }

    pub fn from_bounds(start: usize, end: usize) -> Self {
        Self {
            start,
            length: end.saturating_sub(start),
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.length
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset <= self.end()
    }
}

pub fn span_of(node: Node) -> TextSpan {
    TextSpan::from_bounds(node.start_byte(), node.end_byte())
}

/// Kinds of script elements surfaced by engine queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptElementKind {
    /// The whole-document pseudo element at the root of a navigation tree.
    Script,
    Function,
    Class,
    Method,
    Variable,
    Constant,
    Parameter,
    Property,
    Keyword,
    Global,
}

#[derive(Debug, Clone)]
pub struct EngineDiagnostic {
    pub span: TextSpan,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CompletionEntry {
    pub name: String,
    pub kind: ScriptElementKind,
}

#[derive(Debug, Clone)]
pub struct EntryDetails {
    pub display: String,
    pub documentation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QuickInfo {
    pub span: TextSpan,
    pub display: String,
    pub documentation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SignatureInfo {
    pub label: String,
    pub parameters: Vec<String>,
    pub documentation: Option<String>,
    pub active_parameter: usize,
    pub applicable_span: TextSpan,
}

/// A span referencing the document, with read/write classification.
#[derive(Debug, Clone, Copy)]
pub struct DocumentSpan {
    pub span: TextSpan,
    pub is_write: bool,
}

/// One node of the hierarchical navigation tree.
#[derive(Debug, Clone)]
pub struct NavigationItem {
    pub name: String,
    pub kind: ScriptElementKind,
    pub span: TextSpan,
    pub children: Vec<NavigationItem>,
}

/// Built-in declaration snapshots consulted when a file is neither open
/// nor on disk. The names mimic the engine's bundled library files.
const BUILTIN_LIBRARIES: &[(&str, &str)] = &[(
    "lib.global.js",
    "var console;\nvar Math;\nvar JSON;\nfunction parseInt(string, radix) {}\n\
     function parseFloat(string) {}\nfunction isNaN(value) {}\n\
     function setTimeout(handler, timeout) {}\nfunction clearTimeout(handle) {}\n\
     function setInterval(handler, timeout) {}\nfunction clearInterval(handle) {}\n",
)];

/// Globals always visible to completions, with one-line documentation.
const GLOBALS: &[(&str, &str)] = &[
    ("console", "Console logging and inspection."),
    ("Math", "Mathematical constants and functions."),
    ("JSON", "JSON parsing and serialization."),
    ("Date", "Date and time values."),
    ("Object", "Base object constructor."),
    ("Array", "Array constructor."),
    ("String", "String constructor."),
    ("Number", "Number constructor."),
    ("Boolean", "Boolean constructor."),
    ("Promise", "Asynchronous value container."),
    ("RegExp", "Regular expression constructor."),
    ("Error", "Runtime error constructor."),
    ("Map", "Keyed collection."),
    ("Set", "Unique value collection."),
    ("parseInt", "Parse a string into an integer."),
    ("parseFloat", "Parse a string into a floating point number."),
    ("isNaN", "Whether a value is NaN after numeric coercion."),
    ("setTimeout", "Schedule a callback after a delay."),
    ("clearTimeout", "Cancel a scheduled timeout."),
    ("setInterval", "Schedule a repeating callback."),
    ("clearInterval", "Cancel a repeating callback."),
    ("undefined", "The undefined value."),
    ("NaN", "Not-a-number value."),
    ("Infinity", "Positive infinity."),
];

/// Globals only offered when the experimental-globals compilation flag
/// is toggled on.
const EXPERIMENTAL_GLOBALS: &[(&str, &str)] = &[
    ("structuredClone", "Deep-clone a value (experimental)."),
    ("queueMicrotask", "Queue a microtask callback (experimental)."),
    ("reportError", "Dispatch an error event (experimental)."),
];

/// The long-running analysis engine. Loaded lazily, exactly once per
/// host adapter; cheap to share behind an Arc.
pub struct ScriptEngine {
    language: Language,
}

impl ScriptEngine {
    /// Load the engine library: grammar plus builtin declaration
    /// snapshots. Validation of the grammar happens off the async
    /// executor since it is CPU-bound.
    pub async fn load() -> anyhow::Result<Arc<ScriptEngine>> {
        let engine = tokio::task::spawn_blocking(|| {
            let language: Language = tree_sitter_javascript::LANGUAGE.into();
            let mut parser = Parser::new();
            parser
                .set_language(&language)
                .map_err(|e| anyhow!("failed to load script grammar: {e}"))?;
            Ok::<_, anyhow::Error>(ScriptEngine { language })
        })
        .await??;
        log::info!("script engine loaded");
        Ok(Arc::new(engine))
    }

    pub fn parse(&self, text: &str) -> Option<Tree> {
        let mut parser = Parser::new();
        parser.set_language(&self.language).ok()?;
        parser.parse(text, None)
    }

    /// Look up a builtin library snapshot by file name (matched on the
    /// path's final segment).
    pub fn library_source(&self, file_name: &str) -> Option<&'static str> {
        let basename = file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(file_name);
        BUILTIN_LIBRARIES
            .iter()
            .find(|(name, _)| *name == basename)
            .map(|(_, source)| *source)
    }

    pub fn global_entries(&self, settings: &CompileSettings) -> Vec<CompletionEntry> {
        let mut entries: Vec<CompletionEntry> = GLOBALS
            .iter()
            .map(|(name, _)| CompletionEntry {
                name: (*name).to_string(),
                kind: ScriptElementKind::Global,
            })
            .collect();
        if settings.experimental_globals {
            entries.extend(EXPERIMENTAL_GLOBALS.iter().map(|(name, _)| CompletionEntry {
                name: (*name).to_string(),
                kind: ScriptElementKind::Global,
            }));
        }
        entries
    }

    pub fn global_documentation(&self, name: &str, settings: &CompileSettings) -> Option<&'static str> {
        if let Some((_, doc)) = GLOBALS.iter().find(|(n, _)| *n == name) {
            return Some(doc);
        }
        if settings.experimental_globals {
            if let Some((_, doc)) = EXPERIMENTAL_GLOBALS.iter().find(|(n, _)| *n == name) {
                return Some(doc);
            }
        }
        None
    }
}

/// A single analysis session: one engine bound to one document snapshot
/// and one settings snapshot. Queries are synchronous and act only on
/// this session's state, so concurrent sessions never race on a shared
/// "current document" slot.
pub struct EngineSession {
    engine: Arc<ScriptEngine>,
    pub file_name: String,
    pub text: String,
    pub version: i32,
    pub settings: CompileSettings,
    tree: Option<Tree>,
}

impl EngineSession {
    pub(crate) fn new(
        engine: Arc<ScriptEngine>,
        file_name: String,
        text: String,
        version: i32,
        settings: CompileSettings,
    ) -> Self {
        let tree = engine.parse(&text);
        Self {
            engine,
            file_name,
            text,
            version,
            settings,
            tree,
        }
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    pub(crate) fn root(&self) -> Option<Node<'_>> {
        self.tree.as_ref().map(|t| t.root_node())
    }

    pub(crate) fn node_text(&self, node: Node) -> &str {
        &self.text[node.byte_range()]
    }

    /// Smallest node covering `offset`.
    pub(crate) fn node_at(&self, offset: usize) -> Option<Node<'_>> {
        let root = self.root()?;
        let offset = offset.min(self.text.len());
        root.descendant_for_byte_range(offset, offset)
    }

    /// Identifier-ish node at or immediately before `offset` (the cursor
    /// usually sits just past the word being queried).
    pub(crate) fn identifier_at(&self, offset: usize) -> Option<Node<'_>> {
        for probe in [offset, offset.saturating_sub(1)] {
            if let Some(node) = self.node_at(probe) {
                if is_identifier_kind(node.kind()) {
                    return Some(node);
                }
            }
        }
        None
    }

    /// Parse-error diagnostics from the current tree.
    pub fn syntactic_diagnostics(&self) -> Vec<EngineDiagnostic> {
        let Some(root) = self.root() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node.is_missing() {
                out.push(EngineDiagnostic {
                    span: span_of(node),
                    message: format!("'{}' expected.", node.kind()),
                });
            } else if node.is_error() {
                let token = self.node_text(node).chars().take(12).collect::<String>();
                let message = if token.trim().is_empty() {
                    "Unexpected token.".to_string()
                } else {
                    format!("Unexpected token '{}'.", token.trim())
                };
                out.push(EngineDiagnostic {
                    span: span_of(node),
                    message,
                });
            }
            if node.is_error() {
                // Children of an error node are fragments of the same problem.
                continue;
            }
            for i in (0..node.child_count()).rev() {
                if let Some(child) = node.child(i) {
                    if child.has_error() || child.is_missing() {
                        stack.push(child);
                    }
                }
            }
        }
        out.sort_by_key(|d| d.span.start);
        out
    }

    /// Expanding selection spans at `offset`, innermost first.
    pub fn selection_spans_at(&self, offset: usize) -> Vec<TextSpan> {
        let Some(mut node) = self.node_at(offset) else {
            return Vec::new();
        };

        let mut spans = vec![span_of(node)];
        while let Some(parent) = node.parent() {
            let span = span_of(parent);
            if span != *spans.last().expect("spans is non-empty") {
                spans.push(span);
            }
            node = parent;
        }
        spans
    }
}

pub(crate) fn is_identifier_kind(kind: &str) -> bool {
    matches!(
        kind,
        "identifier" | "property_identifier" | "shorthand_property_identifier" | "statement_identifier"
    )
}
