//
// mode.rs
//
// Language mode facade for embedded script documents. Every operation
// follows the same three-phase protocol: resolve the derived sub-
// document through the model cache, await an engine session from the
// host adapter, then run synchronous engine queries and translate
// engine spans into editor ranges.
//

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, CompletionList, CompletionTextEdit, Diagnostic,
    DiagnosticSeverity, Documentation, DocumentHighlight, DocumentHighlightKind, FoldingRange,
    FoldingRangeKind, FormattingOptions, Hover, HoverContents, Location, MarkupContent,
    MarkupKind, ParameterInformation, ParameterLabel, Position, Range, SelectionRange,
    SemanticToken, SemanticTokenType, SemanticTokens, SemanticTokensLegend, SignatureHelp,
    SignatureInformation, SymbolInformation, SymbolKind, TextEdit, Url, WorkspaceEdit,
};

use crate::document::Document;
use crate::embedded::extract_script_text;
use crate::engine::format::{indent_string, FormatOptions};
use crate::engine::navigate::region_start;
use crate::engine::{EngineSession, NavigationItem, ScriptElementKind, TextSpan};
use crate::host::ScriptHost;
use crate::line_map::{utf16_column_to_byte_offset, LineMap};
use crate::model_cache::{CacheConfig, DocumentModelCache};

/// Word characters for completion replacement ranges: everything except
/// whitespace and the excluded punctuation set.
fn word_regex() -> &'static Regex {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    WORD_RE.get_or_init(|| {
        Regex::new(r##"[^\s`~!@#%^&*()\-=+\[{\]}\\|;:'",.<>/?]+"##).expect("static word regex")
    })
}

/// Opaque payload attached to completion items for lazy resolution.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionItemData {
    #[allow(dead_code)]
    language_id: String,
    uri: String,
    offset: usize,
}

/// The language mode facade registered for embedded script documents.
///
/// Lifecycle: uninitialized until the first real request loads the
/// engine lazily; `dispose` is terminal and idempotent.
pub struct ScriptMode {
    language_id: String,
    host: Arc<ScriptHost>,
    cache: DocumentModelCache<String>,
    disposed: AtomicBool,
}

impl ScriptMode {
    pub fn new(host: Arc<ScriptHost>) -> Self {
        Self::with_cache_config(host, CacheConfig::default())
    }

    pub fn with_cache_config(host: Arc<ScriptHost>, config: CacheConfig) -> Self {
        let cache = DocumentModelCache::new(config, |doc: &Document| {
            if doc.language_id == "javascript" {
                Ok(doc.text())
            } else {
                Ok(extract_script_text(&doc.text()))
            }
        });
        Self {
            language_id: "javascript".to_string(),
            host,
            cache,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    /// Phases 1 and 2: derived document, then engine session.
    async fn session_for(
        &self,
        uri: &Url,
        document: &Document,
    ) -> anyhow::Result<(EngineSession, LineMap)> {
        let derived = self.cache.get(uri, document)?;
        let session = self
            .host
            .session(uri, Some(derived.as_str()), document.version)
            .await?;
        let map = LineMap::new(&derived);
        Ok((session, map))
    }

    pub async fn do_validation(
        &self,
        uri: &Url,
        document: &Document,
    ) -> anyhow::Result<Vec<Diagnostic>> {
        let (session, map) = self.session_for(uri, document).await?;
        if !session.settings.validate {
            return Ok(Vec::new());
        }
        Ok(session
            .syntactic_diagnostics()
            .into_iter()
            .map(|d| Diagnostic {
                range: map.span_to_range(d.span),
                severity: Some(DiagnosticSeverity::ERROR),
                source: Some("osprey".to_string()),
                message: d.message,
                ..Default::default()
            })
            .collect())
    }

    pub async fn do_complete(
        &self,
        uri: &Url,
        document: &Document,
        position: Position,
    ) -> anyhow::Result<CompletionList> {
        let (session, map) = self.session_for(uri, document).await?;
        let offset = map.position_to_offset(position);
        let replace_range = word_replacement_range(&map, position);

        let data = |_name: &str| {
            serde_json::json!({
                "languageId": self.language_id,
                "uri": uri.as_str(),
                "offset": offset,
            })
        };

        let items = session
            .completions_at(offset)
            .into_iter()
            .map(|entry| CompletionItem {
                label: entry.name.clone(),
                kind: Some(completion_kind(entry.kind)),
                text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                    range: replace_range,
                    new_text: entry.name.clone(),
                })),
                data: Some(data(&entry.name)),
                ..Default::default()
            })
            .collect();

        Ok(CompletionList {
            is_incomplete: false,
            items,
        })
    }

    /// Resolve detail/documentation for a completion item. Clears the
    /// `data` payload; resolving an already-resolved item is a no-op.
    pub async fn do_resolve(
        &self,
        document: &Document,
        mut item: CompletionItem,
    ) -> anyhow::Result<CompletionItem> {
        let Some(data) = item.data.take() else {
            return Ok(item);
        };
        let Ok(payload) = serde_json::from_value::<CompletionItemData>(data) else {
            return Ok(item);
        };
        let uri = Url::parse(&payload.uri)?;

        let (session, _map) = self.session_for(&uri, document).await?;
        if let Some(details) = session.completion_detail(&item.label, payload.offset) {
            item.detail = Some(details.display);
            item.documentation = details.documentation.map(Documentation::String);
        }
        Ok(item)
    }

    pub async fn do_hover(
        &self,
        uri: &Url,
        document: &Document,
        position: Position,
    ) -> anyhow::Result<Option<Hover>> {
        let (session, map) = self.session_for(uri, document).await?;
        let offset = map.position_to_offset(position);

        Ok(session.quick_info(offset).map(|info| {
            let mut value = format!("```javascript\n{}\n```", info.display);
            if let Some(doc) = info.documentation {
                value.push_str("\n\n");
                value.push_str(&doc);
            }
            Hover {
                contents: HoverContents::Markup(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value,
                }),
                range: Some(map.span_to_range(info.span)),
            }
        }))
    }

    pub async fn do_signature_help(
        &self,
        uri: &Url,
        document: &Document,
        position: Position,
    ) -> anyhow::Result<Option<SignatureHelp>> {
        let (session, map) = self.session_for(uri, document).await?;
        let offset = map.position_to_offset(position);

        Ok(session.signature_help_at(offset).map(|info| SignatureHelp {
            signatures: vec![SignatureInformation {
                label: info.label,
                documentation: info.documentation.map(Documentation::String),
                parameters: Some(
                    info.parameters
                        .iter()
                        .map(|p| ParameterInformation {
                            label: ParameterLabel::Simple(p.clone()),
                            documentation: None,
                        })
                        .collect(),
                ),
                active_parameter: Some(info.active_parameter as u32),
            }],
            active_signature: Some(0),
            active_parameter: Some(info.active_parameter as u32),
        }))
    }

    pub async fn do_rename(
        &self,
        uri: &Url,
        document: &Document,
        position: Position,
        new_name: &str,
    ) -> anyhow::Result<Option<WorkspaceEdit>> {
        let (session, map) = self.session_for(uri, document).await?;
        let offset = map.position_to_offset(position);

        let Some(locations) = session.rename_locations(offset) else {
            return Ok(None);
        };
        let edits: Vec<TextEdit> = locations
            .into_iter()
            .map(|loc| TextEdit {
                range: map.span_to_range(loc.span),
                new_text: new_name.to_string(),
            })
            .collect();

        let mut changes = std::collections::HashMap::new();
        changes.insert(uri.clone(), edits);
        Ok(Some(WorkspaceEdit {
            changes: Some(changes),
            ..Default::default()
        }))
    }

    pub async fn find_document_highlight(
        &self,
        uri: &Url,
        document: &Document,
        position: Position,
    ) -> anyhow::Result<Vec<DocumentHighlight>> {
        let (session, map) = self.session_for(uri, document).await?;
        let offset = map.position_to_offset(position);

        Ok(session
            .occurrences_at(offset)
            .into_iter()
            .map(|occ| DocumentHighlight {
                range: map.span_to_range(occ.span),
                kind: Some(if occ.is_write {
                    DocumentHighlightKind::WRITE
                } else {
                    DocumentHighlightKind::TEXT
                }),
            })
            .collect())
    }

    /// Flat document symbols from the hierarchical navigation tree.
    /// Deduplicates by (name, kind, start offset) so same-name symbols
    /// at different offsets survive; the top-level `script` pseudo-item
    /// is skipped.
    #[allow(deprecated)]
    pub async fn find_document_symbols(
        &self,
        uri: &Url,
        document: &Document,
    ) -> anyhow::Result<Vec<SymbolInformation>> {
        let (session, map) = self.session_for(uri, document).await?;
        let tree = session.navigation_tree();

        let mut symbols = Vec::new();
        let mut seen: HashSet<(String, ScriptElementKind, usize)> = HashSet::new();

        fn walk(
            item: &NavigationItem,
            container: Option<&str>,
            uri: &Url,
            map: &LineMap,
            seen: &mut HashSet<(String, ScriptElementKind, usize)>,
            out: &mut Vec<SymbolInformation>,
        ) {
            for child in &item.children {
                let key = (child.name.clone(), child.kind, child.span.start);
                let inserted = seen.insert(key);
                if inserted {
                    #[allow(deprecated)]
                    out.push(SymbolInformation {
                        name: child.name.clone(),
                        kind: symbol_kind(child.kind),
                        tags: None,
                        deprecated: None,
                        location: Location {
                            uri: uri.clone(),
                            range: map.span_to_range(child.span),
                        },
                        container_name: container.map(|c| c.to_string()),
                    });
                }
                // Children nest under the nearest non-duplicate symbol.
                let next_container = if inserted {
                    Some(child.name.as_str())
                } else {
                    container
                };
                walk(child, next_container, uri, map, seen, out);
            }
        }

        // The root is the whole-document "script" pseudo-symbol.
        walk(&tree, None, uri, &map, &mut seen, &mut symbols);
        Ok(symbols)
    }

    pub async fn find_definition(
        &self,
        uri: &Url,
        document: &Document,
        position: Position,
    ) -> anyhow::Result<Option<Location>> {
        let (session, map) = self.session_for(uri, document).await?;
        let offset = map.position_to_offset(position);

        Ok(session.definition_at(offset).map(|span| Location {
            uri: uri.clone(),
            range: map.span_to_range(span),
        }))
    }

    pub async fn find_references(
        &self,
        uri: &Url,
        document: &Document,
        position: Position,
    ) -> anyhow::Result<Vec<Location>> {
        let (session, map) = self.session_for(uri, document).await?;
        let offset = map.position_to_offset(position);

        Ok(session
            .references_at(offset)
            .into_iter()
            .map(|occ| Location {
                uri: uri.clone(),
                range: map.span_to_range(occ.span),
            })
            .collect())
    }

    pub async fn get_selection_range(
        &self,
        uri: &Url,
        document: &Document,
        positions: &[Position],
    ) -> anyhow::Result<Vec<SelectionRange>> {
        let (session, map) = self.session_for(uri, document).await?;

        Ok(positions
            .iter()
            .map(|&position| {
                let offset = map.position_to_offset(position);
                let spans = session.selection_spans_at(offset);
                let mut current: Option<SelectionRange> = None;
                for span in spans.iter().rev() {
                    current = Some(SelectionRange {
                        range: map.span_to_range(*span),
                        parent: current.map(Box::new),
                    });
                }
                current.unwrap_or(SelectionRange {
                    range: Range::new(position, position),
                    parent: None,
                })
            })
            .collect())
    }

    /// Range formatting. The indent level of the range's first line
    /// seeds the structural indent. A whitespace-only partial trailing
    /// line is excluded from the engine's edit region and replaced
    /// wholesale with a generated indent string, which sidesteps the
    /// formatter mishandling partial trailing whitespace.
    pub async fn format(
        &self,
        uri: &Url,
        document: &Document,
        range: Range,
        options: &FormattingOptions,
    ) -> anyhow::Result<Vec<TextEdit>> {
        let (session, map) = self.session_for(uri, document).await?;
        let fmt = FormatOptions {
            tab_size: options.tab_size,
            insert_spaces: options.insert_spaces,
        };

        let initial_indent = indent_level_of_line(map.line_text(range.start.line), fmt.tab_size);

        let start_offset = map.position_to_offset(range.start);
        let mut end_offset = map.position_to_offset(range.end);
        let mut trailing_edit = None;

        if range.end.character > 0 {
            let line_start = map.line_start(range.end.line);
            let partial = &map.text()[line_start..end_offset];
            if partial.trim().is_empty() {
                end_offset = line_start;
                trailing_edit = Some(TextEdit {
                    range: Range::new(Position::new(range.end.line, 0), range.end),
                    new_text: indent_string(initial_indent, &fmt),
                });
            }
        }

        let span = TextSpan::from_bounds(start_offset, end_offset.max(start_offset));
        let mut edits: Vec<TextEdit> = session
            .format_span(span, &fmt, initial_indent)
            .into_iter()
            .map(|edit| TextEdit {
                range: map.span_to_range(edit.span),
                new_text: edit.new_text,
            })
            .collect();

        if let Some(edit) = trailing_edit {
            edits.push(edit);
        }
        Ok(edits)
    }

    /// Folding ranges from engine outline spans. Single-line spans are
    /// dropped; a span is a `region` when the folded text leads with a
    /// region directive and a `comment` when it leads with a comment
    /// marker.
    pub async fn get_folding_ranges(
        &self,
        uri: &Url,
        document: &Document,
    ) -> anyhow::Result<Vec<FoldingRange>> {
        let (session, map) = self.session_for(uri, document).await?;

        let mut ranges = Vec::new();
        for span in session.outline_spans() {
            let start = map.offset_to_position(span.start);
            let end = map.offset_to_position(span.end());
            if start.line >= end.line {
                continue;
            }

            let folded = &map.text()[span.start..span.end()];
            let lead: String = folded.chars().take(16).collect();
            let kind = if region_start(lead.trim_start()) {
                Some(FoldingRangeKind::Region)
            } else if lead.trim_start().starts_with("//") || lead.trim_start().starts_with("/*") {
                Some(FoldingRangeKind::Comment)
            } else {
                None
            };

            ranges.push(FoldingRange {
                start_line: start.line,
                start_character: None,
                end_line: end.line,
                end_character: None,
                kind,
                collapsed_text: None,
            });
        }
        Ok(ranges)
    }

    pub async fn get_semantic_tokens(
        &self,
        uri: &Url,
        document: &Document,
    ) -> anyhow::Result<SemanticTokens> {
        let (session, map) = self.session_for(uri, document).await?;

        let mut data = Vec::new();
        let mut prev_line = 0u32;
        let mut prev_start = 0u32;
        for token in session.classifications() {
            let position = map.offset_to_position(token.span.start);
            let text = &map.text()[token.span.start..token.span.end()];
            let length: u32 = text.chars().map(|c| c.len_utf16() as u32).sum();

            let delta_line = position.line - prev_line;
            let delta_start = if delta_line == 0 {
                position.character - prev_start
            } else {
                position.character
            };
            data.push(SemanticToken {
                delta_line,
                delta_start,
                length,
                token_type: token.kind.legend_index(),
                token_modifiers_bitset: 0,
            });
            prev_line = position.line;
            prev_start = position.character;
        }

        Ok(SemanticTokens {
            result_id: None,
            data,
        })
    }

    /// Evict cached state for a closed document.
    pub fn on_document_removed(&self, uri: &Url) {
        self.cache.on_document_removed(uri);
    }

    /// Release the engine adapter and the document cache. Safe to call
    /// more than once; only the first call releases anything.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.cache.dispose();
            self.host.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// The semantic token legend matching [`TokenKind::legend_index`].
pub fn semantic_token_legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: vec![
            SemanticTokenType::CLASS,
            SemanticTokenType::FUNCTION,
            SemanticTokenType::METHOD,
            SemanticTokenType::PARAMETER,
            SemanticTokenType::VARIABLE,
            SemanticTokenType::PROPERTY,
        ],
        token_modifiers: Vec::new(),
    }
}

/// Replacement range for the word under the cursor, ending at the
/// cursor itself.
fn word_replacement_range(map: &LineMap, position: Position) -> Range {
    let line_text = map.line_text(position.line);
    let cursor_byte = utf16_column_to_byte_offset(line_text, position.character);

    for m in word_regex().find_iter(line_text) {
        if m.start() > cursor_byte {
            break;
        }
        if cursor_byte <= m.end() {
            let start_character: u32 = line_text[..m.start()]
                .chars()
                .map(|c| c.len_utf16() as u32)
                .sum();
            return Range::new(Position::new(position.line, start_character), position);
        }
    }
    Range::new(position, position)
}

/// Indent level of a line: spaces count 1, tabs count `tab_size`,
/// divided by `tab_size` and floored.
fn indent_level_of_line(line: &str, tab_size: u32) -> u32 {
    let mut width = 0u32;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width += tab_size,
            _ => break,
        }
    }
    width / tab_size.max(1)
}

fn completion_kind(kind: ScriptElementKind) -> CompletionItemKind {
    match kind {
        ScriptElementKind::Function => CompletionItemKind::FUNCTION,
        ScriptElementKind::Class => CompletionItemKind::CLASS,
        ScriptElementKind::Method => CompletionItemKind::METHOD,
        ScriptElementKind::Constant => CompletionItemKind::CONSTANT,
        ScriptElementKind::Parameter | ScriptElementKind::Variable => {
            CompletionItemKind::VARIABLE
        }
        ScriptElementKind::Property => CompletionItemKind::PROPERTY,
        ScriptElementKind::Keyword => CompletionItemKind::KEYWORD,
        ScriptElementKind::Global | ScriptElementKind::Script => CompletionItemKind::VALUE,
    }
}

fn symbol_kind(kind: ScriptElementKind) -> SymbolKind {
    match kind {
        ScriptElementKind::Function => SymbolKind::FUNCTION,
        ScriptElementKind::Class => SymbolKind::CLASS,
        ScriptElementKind::Method => SymbolKind::METHOD,
        ScriptElementKind::Constant => SymbolKind::CONSTANT,
        ScriptElementKind::Parameter | ScriptElementKind::Variable => SymbolKind::VARIABLE,
        ScriptElementKind::Property => SymbolKind::PROPERTY,
        ScriptElementKind::Keyword | ScriptElementKind::Global | ScriptElementKind::Script => {
            SymbolKind::VARIABLE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode() -> ScriptMode {
        ScriptMode::new(Arc::new(ScriptHost::new()))
    }

    fn uri() -> Url {
        Url::parse("file:///proj/index.html").unwrap()
    }

    fn html_doc(script: &str, version: i32) -> Document {
        Document::new(
            &format!("<script>{script}</script>"),
            "html",
            version,
        )
    }

    #[tokio::test]
    async fn test_do_complete_word_replacement() {
        let mode = mode();
        let doc = html_doc("var alpha = 1;\nalp", 1);
        // Cursor after "alp" on line 1
        let list = mode
            .do_complete(&uri(), &doc, Position::new(1, 3))
            .await
            .unwrap();

        assert!(!list.is_incomplete);
        let item = list.items.iter().find(|i| i.label == "alpha").unwrap();
        let Some(CompletionTextEdit::Edit(edit)) = &item.text_edit else {
            panic!("expected a text edit");
        };
        assert_eq!(edit.range.start, Position::new(1, 0));
        assert_eq!(edit.range.end, Position::new(1, 3));
        assert!(item.data.is_some());
    }

    #[tokio::test]
    async fn test_do_resolve_is_idempotent() {
        let mode = mode();
        let doc = html_doc("// Counts things.\nfunction count() {}\ncou", 1);
        let list = mode
            .do_complete(&uri(), &doc, Position::new(2, 3))
            .await
            .unwrap();
        let item = list
            .items
            .iter()
            .find(|i| i.label == "count")
            .unwrap()
            .clone();

        let resolved = mode.do_resolve(&doc, item).await.unwrap();
        assert!(resolved.data.is_none());
        assert!(resolved.detail.is_some());

        // Resolving again must not error and has nothing to add.
        let again = mode.do_resolve(&doc, resolved.clone()).await.unwrap();
        assert!(again.data.is_none());
    }

    #[tokio::test]
    async fn test_find_document_symbols_keeps_same_name_at_different_offsets() {
        let mode = mode();
        let doc = html_doc("function foo() {}\nfunction foo() {}\n", 1);
        let symbols = mode.find_document_symbols(&uri(), &doc).await.unwrap();

        let foos: Vec<_> = symbols.iter().filter(|s| s.name == "foo").collect();
        assert_eq!(foos.len(), 2);
        assert_ne!(
            foos[0].location.range.start.line,
            foos[1].location.range.start.line
        );
        // The whole-document script pseudo-symbol is skipped.
        assert!(!symbols.iter().any(|s| s.name == "<script>"));
    }

    #[tokio::test]
    async fn test_document_symbols_container_names() {
        let mode = mode();
        let doc = html_doc("class Widget {\n  render() {}\n}\n", 1);
        let symbols = mode.find_document_symbols(&uri(), &doc).await.unwrap();

        let render = symbols.iter().find(|s| s.name == "render").unwrap();
        assert_eq!(render.container_name.as_deref(), Some("Widget"));
        let widget = symbols.iter().find(|s| s.name == "Widget").unwrap();
        assert!(widget.container_name.is_none());
    }

    #[tokio::test]
    async fn test_format_trailing_whitespace_line_replaced() {
        let mode = mode();
        let doc = html_doc("\nif (x) {\ny();\n}\n  ", 1);
        // Script content lines (inside the host document):
        //   line 0: "<script>"..., line 1: "if (x) {", ... line 4: "  "
        let range = Range::new(Position::new(1, 0), Position::new(4, 2));
        let options = FormattingOptions {
            tab_size: 4,
            insert_spaces: true,
            ..Default::default()
        };
        let edits = mode.format(&uri(), &doc, range, &options).await.unwrap();

        // The partial whitespace-only trailing line is replaced wholesale.
        let trailing = edits
            .iter()
            .find(|e| e.range.start == Position::new(4, 0))
            .unwrap();
        assert_eq!(trailing.range.end, Position::new(4, 2));
        // And the block body got its structural indent.
        assert!(edits
            .iter()
            .any(|e| e.range.start.line == 2 && e.new_text == "    "));
    }

    #[tokio::test]
    async fn test_format_reflects_latest_version() {
        let mode = mode();
        let u = uri();

        let doc_v1 = html_doc("\nif (a) {\nb();\n}\n", 1);
        let range = Range::new(Position::new(1, 0), Position::new(4, 0));
        let options = FormattingOptions {
            tab_size: 4,
            insert_spaces: true,
            ..Default::default()
        };
        mode.format(&u, &doc_v1, range, &options).await.unwrap();

        // Same URI, new version with already-formatted content: the
        // derived document must be recomputed, yielding no edits.
        let doc_v2 = html_doc("\nif (a) {\n    b();\n}\n", 2);
        let edits = mode.format(&u, &doc_v2, range, &options).await.unwrap();
        assert!(edits.iter().all(|e| e.new_text.is_empty() || e.range.start.line != 2));
    }

    #[tokio::test]
    async fn test_folding_ranges_classified() {
        let mode = mode();
        let doc = html_doc(
            "\n//#region setup\nvar a = 1;\n//#endregion\n// one\n// two\nfunction f() {\nreturn 1;\n}\n",
            1,
        );
        let ranges = mode.get_folding_ranges(&uri(), &doc).await.unwrap();

        assert!(ranges
            .iter()
            .any(|r| r.kind == Some(FoldingRangeKind::Region)));
        assert!(ranges
            .iter()
            .any(|r| r.kind == Some(FoldingRangeKind::Comment)));
        assert!(ranges.iter().any(|r| r.kind.is_none()));
        // No single-line folding ranges
        assert!(ranges.iter().all(|r| r.start_line < r.end_line));
    }

    #[tokio::test]
    async fn test_hover_and_definition() {
        let mode = mode();
        let doc = html_doc("function add(a, b) { return a + b; }\nadd(1, 2);\n", 1);

        let hover = mode
            .do_hover(&uri(), &doc, Position::new(1, 1))
            .await
            .unwrap()
            .unwrap();
        let HoverContents::Markup(markup) = hover.contents else {
            panic!("expected markup hover");
        };
        assert!(markup.value.contains("function add(a, b)"));

        let def = mode
            .find_definition(&uri(), &doc, Position::new(1, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(def.range.start.line, 0);
    }

    #[tokio::test]
    async fn test_document_highlight_write_kind() {
        let mode = mode();
        let doc = html_doc("\nvar n = 0;\nn = n + 1;\n", 1);
        let highlights = mode
            .find_document_highlight(&uri(), &doc, Position::new(1, 4))
            .await
            .unwrap();
        assert_eq!(highlights.len(), 3);
        assert_eq!(highlights[0].kind, Some(DocumentHighlightKind::WRITE));
        assert_eq!(highlights[2].kind, Some(DocumentHighlightKind::TEXT));
    }

    #[tokio::test]
    async fn test_semantic_tokens_delta_encoding() {
        let mode = mode();
        let doc = html_doc("function f(a) {}\nfunction g(b) {}\n", 1);
        let tokens = mode.get_semantic_tokens(&uri(), &doc).await.unwrap();
        assert!(tokens.data.len() >= 4);
        // First token is absolute; the second on the same line has a
        // zero line delta.
        assert_eq!(tokens.data[1].delta_line, 0);
        assert!(tokens.data[1].delta_start > 0);
    }

    #[tokio::test]
    async fn test_selection_range_chain() {
        let mode = mode();
        let doc = html_doc("function f() { return x + 1; }\n", 1);
        let position = Position::new(0, 8 + 22); // on "x"
        let ranges = mode
            .get_selection_range(&uri(), &doc, &[position])
            .await
            .unwrap();
        assert_eq!(ranges.len(), 1);
        let mut depth = 0;
        let mut cursor = Some(&ranges[0]);
        while let Some(r) = cursor {
            depth += 1;
            cursor = r.parent.as_deref();
        }
        assert!(depth >= 3);
    }

    #[tokio::test]
    async fn test_dispose_idempotent() {
        let mode = mode();
        mode.dispose();
        mode.dispose();
        assert!(mode.is_disposed());
        assert!(mode.host.is_disposed());
    }

    #[test]
    fn test_word_regex_excludes_punctuation() {
        let re = word_regex();
        let m: Vec<&str> = re.find_iter("foo.bar(baz, qux)").map(|m| m.as_str()).collect();
        assert_eq!(m, vec!["foo", "bar", "baz", "qux"]);
        let m: Vec<&str> = re.find_iter("a$b _c d1").map(|m| m.as_str()).collect();
        assert_eq!(m, vec!["a$b", "_c", "d1"]);
    }

    #[test]
    fn test_indent_level_of_line() {
        assert_eq!(indent_level_of_line("    x", 4), 1);
        assert_eq!(indent_level_of_line("      x", 4), 1);
        assert_eq!(indent_level_of_line("\t\tx", 4), 2);
        assert_eq!(indent_level_of_line("x", 4), 0);
    }
}
