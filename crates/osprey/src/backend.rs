//
// backend.rs
//
// LSP backend: wires editor requests to the language mode facade and
// the file search engine. Document state lives here; analysis state
// lives behind the mode and its caches.
//

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService, Server};

use crate::document::Document;
use crate::host::ScriptHost;
use crate::mode::{semantic_token_legend, ScriptMode};
use crate::search::engine::{RawSearchQuery, SearchComplete, SearchProgress};
use crate::search::SearchEngine;

/// Server-to-client notification carrying batched search results.
pub enum FileSearchProgress {}

impl Notification for FileSearchProgress {
    type Params = SearchProgress;
    const METHOD: &'static str = "osprey/fileSearchProgress";
}

#[derive(Debug, Deserialize)]
pub struct CancelFileSearchParams {
    pub id: i64,
}

pub struct Backend {
    client: Client,
    documents: DashMap<Url, Document>,
    host: Arc<ScriptHost>,
    mode: ScriptMode,
    search: SearchEngine,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        let host = Arc::new(ScriptHost::new());
        let mode = ScriptMode::new(host.clone());
        Self {
            client,
            documents: DashMap::new(),
            host,
            mode,
            search: SearchEngine::new(),
        }
    }

    /// Snapshot an open document. The clone keeps DashMap guards from
    /// living across awaits.
    fn document(&self, uri: &Url) -> Option<Document> {
        self.documents.get(uri).map(|doc| doc.clone())
    }

    async fn publish_diagnostics_for(&self, uri: &Url) {
        let Some(document) = self.document(uri) else {
            return;
        };
        let version = document.version;
        match self.mode.do_validation(uri, &document).await {
            Ok(diagnostics) => {
                self.client
                    .publish_diagnostics(uri.clone(), diagnostics, Some(version))
                    .await;
            }
            Err(e) => log::warn!("validation failed for {uri}: {e}"),
        }
    }

    async fn handle_file_search(&self, raw: RawSearchQuery) -> Result<SearchComplete> {
        let client = self.client.clone();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let on_progress = move |progress: SearchProgress| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .send_notification::<FileSearchProgress>(progress)
                    .await;
            });
        };
        let on_done = move |complete: SearchComplete| {
            let _ = done_tx.send(complete);
        };

        self.search.search(raw, on_progress, on_done).await;
        done_rx
            .await
            .map_err(|_| tower_lsp::jsonrpc::Error::internal_error())
    }

    async fn handle_cancel_file_search(&self, params: CancelFileSearchParams) {
        self.search.cancel(params.id);
    }
}

/// Apply a `workspace/didChangeConfiguration` payload to the shared
/// compile settings. The relevant section may arrive at the top level
/// or nested under "osprey".
fn apply_configuration(host: &ScriptHost, settings: &Value) {
    let section = settings.get("osprey").unwrap_or(settings);
    if let Some(validate) = section.get("validate").and_then(Value::as_bool) {
        host.update_settings(|s| s.validate = validate);
    }
    if let Some(experimental) = section
        .get("experimentalGlobals")
        .and_then(Value::as_bool)
    {
        host.update_settings(|s| s.experimental_globals = experimental);
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, _params: InitializeParams) -> Result<InitializeResult> {
        log::info!("initializing osprey");

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                completion_provider: Some(CompletionOptions {
                    resolve_provider: Some(true),
                    trigger_characters: Some(vec![String::from(".")]),
                    ..Default::default()
                }),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                signature_help_provider: Some(SignatureHelpOptions {
                    trigger_characters: Some(vec![String::from("("), String::from(",")]),
                    ..Default::default()
                }),
                rename_provider: Some(OneOf::Left(true)),
                document_highlight_provider: Some(OneOf::Left(true)),
                document_symbol_provider: Some(OneOf::Left(true)),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                selection_range_provider: Some(SelectionRangeProviderCapability::Simple(true)),
                document_range_formatting_provider: Some(OneOf::Left(true)),
                folding_range_provider: Some(FoldingRangeProviderCapability::Simple(true)),
                semantic_tokens_provider: Some(
                    SemanticTokensServerCapabilities::SemanticTokensOptions(
                        SemanticTokensOptions {
                            legend: semantic_token_legend(),
                            full: Some(SemanticTokensFullOptions::Bool(true)),
                            range: None,
                            work_done_progress_options: Default::default(),
                        },
                    ),
                ),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: String::from("osprey"),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("osprey initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        self.mode.dispose();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let doc = params.text_document;
        self.documents.insert(
            doc.uri.clone(),
            Document::new(&doc.text, &doc.language_id, doc.version),
        );
        self.publish_diagnostics_for(&doc.uri).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        {
            let Some(mut document) = self.documents.get_mut(&uri) else {
                return;
            };
            for change in params.content_changes {
                document.apply_change(change);
            }
            document.version = params.text_document.version;
        }
        self.publish_diagnostics_for(&uri).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.remove(&uri);
        self.mode.on_document_removed(&uri);
        self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        apply_configuration(&self.host, &params.settings);

        let open: Vec<Url> = self.documents.iter().map(|e| e.key().clone()).collect();
        for uri in open {
            self.publish_diagnostics_for(&uri).await;
        }
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let position_params = params.text_document_position;
        let uri = position_params.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self
            .mode
            .do_complete(&uri, &document, position_params.position)
            .await
        {
            Ok(list) => Ok(Some(CompletionResponse::List(list))),
            Err(e) => {
                log::warn!("completion failed for {uri}: {e}");
                Ok(None)
            }
        }
    }

    async fn completion_resolve(&self, item: CompletionItem) -> Result<CompletionItem> {
        let uri = item
            .data
            .as_ref()
            .and_then(|data| data.get("uri"))
            .and_then(Value::as_str)
            .and_then(|s| Url::parse(s).ok());
        let Some(uri) = uri else {
            return Ok(item);
        };
        let Some(document) = self.document(&uri) else {
            return Ok(item);
        };
        match self.mode.do_resolve(&document, item.clone()).await {
            Ok(resolved) => Ok(resolved),
            Err(e) => {
                log::warn!("completion resolve failed for {uri}: {e}");
                Ok(item)
            }
        }
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let position_params = params.text_document_position_params;
        let uri = position_params.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self
            .mode
            .do_hover(&uri, &document, position_params.position)
            .await
        {
            Ok(hover) => Ok(hover),
            Err(e) => {
                log::warn!("hover failed for {uri}: {e}");
                Ok(None)
            }
        }
    }

    async fn signature_help(&self, params: SignatureHelpParams) -> Result<Option<SignatureHelp>> {
        let position_params = params.text_document_position_params;
        let uri = position_params.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self
            .mode
            .do_signature_help(&uri, &document, position_params.position)
            .await
        {
            Ok(help) => Ok(help),
            Err(e) => {
                log::warn!("signature help failed for {uri}: {e}");
                Ok(None)
            }
        }
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let uri = params.text_document_position.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self
            .mode
            .do_rename(
                &uri,
                &document,
                params.text_document_position.position,
                &params.new_name,
            )
            .await
        {
            Ok(edit) => Ok(edit),
            Err(e) => {
                log::warn!("rename failed for {uri}: {e}");
                Ok(None)
            }
        }
    }

    async fn document_highlight(
        &self,
        params: DocumentHighlightParams,
    ) -> Result<Option<Vec<DocumentHighlight>>> {
        let position_params = params.text_document_position_params;
        let uri = position_params.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self
            .mode
            .find_document_highlight(&uri, &document, position_params.position)
            .await
        {
            Ok(highlights) => Ok(Some(highlights)),
            Err(e) => {
                log::warn!("document highlight failed for {uri}: {e}");
                Ok(None)
            }
        }
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let uri = params.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self.mode.find_document_symbols(&uri, &document).await {
            Ok(symbols) => Ok(Some(DocumentSymbolResponse::Flat(symbols))),
            Err(e) => {
                log::warn!("document symbols failed for {uri}: {e}");
                Ok(None)
            }
        }
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let position_params = params.text_document_position_params;
        let uri = position_params.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self
            .mode
            .find_definition(&uri, &document, position_params.position)
            .await
        {
            Ok(location) => Ok(location.map(GotoDefinitionResponse::Scalar)),
            Err(e) => {
                log::warn!("definition failed for {uri}: {e}");
                Ok(None)
            }
        }
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self
            .mode
            .find_references(&uri, &document, params.text_document_position.position)
            .await
        {
            Ok(locations) => Ok(Some(locations)),
            Err(e) => {
                log::warn!("references failed for {uri}: {e}");
                Ok(None)
            }
        }
    }

    async fn selection_range(
        &self,
        params: SelectionRangeParams,
    ) -> Result<Option<Vec<SelectionRange>>> {
        let uri = params.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self
            .mode
            .get_selection_range(&uri, &document, &params.positions)
            .await
        {
            Ok(ranges) => Ok(Some(ranges)),
            Err(e) => {
                log::warn!("selection range failed for {uri}: {e}");
                Ok(None)
            }
        }
    }

    async fn range_formatting(
        &self,
        params: DocumentRangeFormattingParams,
    ) -> Result<Option<Vec<TextEdit>>> {
        let uri = params.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self
            .mode
            .format(&uri, &document, params.range, &params.options)
            .await
        {
            Ok(edits) => Ok(Some(edits)),
            Err(e) => {
                log::warn!("formatting failed for {uri}: {e}");
                Ok(None)
            }
        }
    }

    async fn folding_range(&self, params: FoldingRangeParams) -> Result<Option<Vec<FoldingRange>>> {
        let uri = params.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self.mode.get_folding_ranges(&uri, &document).await {
            Ok(ranges) => Ok(Some(ranges)),
            Err(e) => {
                log::warn!("folding ranges failed for {uri}: {e}");
                Ok(None)
            }
        }
    }

    async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> Result<Option<SemanticTokensResult>> {
        let uri = params.text_document.uri;
        let Some(document) = self.document(&uri) else {
            return Ok(None);
        };
        match self.mode.get_semantic_tokens(&uri, &document).await {
            Ok(tokens) => Ok(Some(SemanticTokensResult::Tokens(tokens))),
            Err(e) => {
                log::warn!("semantic tokens failed for {uri}: {e}");
                Ok(None)
            }
        }
    }
}

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::build(Backend::new)
        .custom_method("osprey/fileSearch", Backend::handle_file_search)
        .custom_method("osprey/cancelFileSearch", Backend::handle_cancel_file_search)
        .finish();
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_configuration_nested_section() {
        let host = ScriptHost::new();
        apply_configuration(
            &host,
            &serde_json::json!({ "osprey": { "validate": false, "experimentalGlobals": true } }),
        );
        let settings = host.settings_snapshot();
        assert!(!settings.validate);
        assert!(settings.experimental_globals);
    }

    #[test]
    fn test_apply_configuration_top_level() {
        let host = ScriptHost::new();
        apply_configuration(&host, &serde_json::json!({ "validate": false }));
        assert!(!host.settings_snapshot().validate);
    }

    #[test]
    fn test_apply_configuration_ignores_unrelated_keys() {
        let host = ScriptHost::new();
        apply_configuration(&host, &serde_json::json!({ "other": { "validate": false } }));
        assert!(host.settings_snapshot().validate);
    }
}
