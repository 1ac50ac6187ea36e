mod definition;
mod diagnostics;
mod document;
mod hover;
mod server;
mod symbols;

use tower_lsp::{LspService, Server};

/// Start the Vaisto LSP server on stdin/stdout.
pub async fn run_lsp() {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(server::VaistoLspBackend::new);

    Server::new(stdin, stdout, socket).serve(service).await;
}
