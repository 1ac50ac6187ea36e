use std::collections::HashMap;
use std::sync::Mutex;

use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::definition;
use crate::diagnostics;
use crate::document::Document;
use crate::hover;
use crate::symbols;

pub struct VaistoLspBackend {
    pub client: Client,
    pub documents: Mutex<HashMap<Url, Document>>,
}

impl VaistoLspBackend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            documents: Mutex::new(HashMap::new()),
        }
    }

    fn analyze_and_publish(&self, uri: Url) {
        let mut docs = self.documents.lock().unwrap();
        let doc = match docs.get_mut(&uri) {
            Some(d) => d,
            None => return,
        };

        let (analysis, diagnostics) = diagnostics::analyze(&doc.text, &doc.line_index);
        doc.analysis = Some(analysis);

        let version = doc.version;
        let client = self.client.clone();
        let uri_clone = uri.clone();

        // Drop the lock before sending diagnostics
        drop(docs);

        tokio::spawn(async move {
            client
                .publish_diagnostics(uri_clone, diagnostics, Some(version))
                .await;
        });
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for VaistoLspBackend {
    async fn initialize(&self, _: InitializeParams) -> Result<InitializeResult> {
        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                document_symbol_provider: Some(OneOf::Left(true)),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "vaisto-lsp".into(),
                version: Some(env!("CARGO_PKG_VERSION").into()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "vaisto-lsp initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri.clone();
        let doc = Document::new(params.text_document.text, params.text_document.version);
        self.documents.lock().unwrap().insert(uri.clone(), doc);
        self.analyze_and_publish(uri);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri.clone();
        // Full text sync — take the last change
        if let Some(change) = params.content_changes.into_iter().last() {
            let doc = Document::new(change.text, params.text_document.version);
            self.documents.lock().unwrap().insert(uri.clone(), doc);
            self.analyze_and_publish(uri);
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri.clone();
        if let Some(text) = params.text {
            let version = self
                .documents
                .lock()
                .unwrap()
                .get(&uri)
                .map(|d| d.version)
                .unwrap_or(0);
            let doc = Document::new(text, version);
            self.documents.lock().unwrap().insert(uri.clone(), doc);
        }
        self.analyze_and_publish(uri);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri.clone();
        self.documents.lock().unwrap().remove(&uri);

        // Clear diagnostics
        self.client.publish_diagnostics(uri, vec![], None).await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = &params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        let docs = self.documents.lock().unwrap();
        let doc = match docs.get(uri) {
            Some(d) => d,
            None => return Ok(None),
        };

        let analysis = match &doc.analysis {
            Some(a) => a,
            None => return Ok(None),
        };

        let offset = doc.line_index.position_to_offset(&doc.text, position);
        Ok(hover::hover_at(analysis, &doc.text, &doc.line_index, offset))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = &params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        let docs = self.documents.lock().unwrap();
        let doc = match docs.get(uri) {
            Some(d) => d,
            None => return Ok(None),
        };

        let analysis = match &doc.analysis {
            Some(a) => a,
            None => return Ok(None),
        };

        let offset = doc.line_index.position_to_offset(&doc.text, position);
        Ok(definition::goto_definition(
            analysis,
            &doc.text,
            &doc.line_index,
            offset,
            uri,
        ))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let uri = &params.text_document.uri;

        let docs = self.documents.lock().unwrap();
        let doc = match docs.get(uri) {
            Some(d) => d,
            None => return Ok(None),
        };

        let analysis = match &doc.analysis {
            Some(a) => a,
            None => return Ok(None),
        };

        let syms = symbols::document_symbols(analysis, &doc.text, &doc.line_index);
        Ok(Some(DocumentSymbolResponse::Nested(syms)))
    }
}
