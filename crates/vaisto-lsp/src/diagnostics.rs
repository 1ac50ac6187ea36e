use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString};

use crate::document::{AnalysisResult, LineIndex};
use vaisto_diag::Severity;

fn to_lsp(diag: &vaisto_diag::Diagnostic, text: &str, index: &LineIndex) -> Diagnostic {
    let mut message = diag.message.clone();
    if let (Some(exp), Some(act)) = (&diag.expected, &diag.actual) {
        message.push_str(&format!(" (expected {}, found {})", exp, act));
    }
    if let Some(hint) = &diag.hint {
        message.push_str(&format!("; {}", hint));
    }
    Diagnostic {
        range: index.loc_to_range(text, diag.loc),
        severity: Some(match diag.severity {
            Severity::Error => DiagnosticSeverity::ERROR,
            Severity::Warning => DiagnosticSeverity::WARNING,
        }),
        code: Some(NumberOrString::String(diag.code.as_str().to_string())),
        source: Some("vaisto".into()),
        message,
        ..Default::default()
    }
}

/// Run the analysis pipeline (parse → elaborate) and convert every
/// accumulated diagnostic to its LSP form.
pub fn analyze(text: &str, index: &LineIndex) -> (AnalysisResult, Vec<Diagnostic>) {
    let (module, parse_errors) = vaisto_parser::parse(text);
    let elab = vaisto_elab::elaborate(&module);

    let mut diagnostics = Vec::new();
    for d in parse_errors.iter().chain(elab.diagnostics.iter()) {
        diagnostics.push(to_lsp(d, text, index));
    }

    (AnalysisResult { module, elab }, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_reports_type_errors_with_source() {
        let text = "(defn f [] (+ 1 true))";
        let index = LineIndex::new(text);
        let (_, diags) = analyze(text, &index);
        assert!(!diags.is_empty());
        assert!(diags.iter().all(|d| d.source.as_deref() == Some("vaisto")));
    }

    #[test]
    fn analyze_clean_source_has_no_diagnostics() {
        let text = "(defn f [x] (+ x 1))";
        let index = LineIndex::new(text);
        let (analysis, diags) = analyze(text, &index);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        assert!(analysis.elab.ok());
    }
}
