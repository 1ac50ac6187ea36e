use tower_lsp::lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind};

use crate::document::{AnalysisResult, LineIndex};

/// The inferred type of the smallest expression covering the offset.
pub fn hover_at(
    analysis: &AnalysisResult,
    text: &str,
    index: &LineIndex,
    offset: u32,
) -> Option<Hover> {
    let mut best: Option<(u32, vaisto_ast::ExprId)> = None;
    for (id, expr) in analysis.module.exprs.iter() {
        if expr.loc.start <= offset && offset < expr.loc.end {
            let width = expr.loc.len();
            if best.map_or(true, |(w, _)| width < w) {
                best = Some((width, id));
            }
        }
    }
    let (_, id) = best?;
    let ty = analysis.elab.expr_types.get(id)?;
    let loc = analysis.module.exprs[id].loc;
    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: format!("```vaisto\n{}\n```", ty),
        }),
        range: Some(index.loc_to_range(text, loc)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::analyze;
    use crate::document::LineIndex;

    #[test]
    fn hover_shows_inferred_type() {
        let text = "(defn f [x] (+ x 1))";
        let index = LineIndex::new(text);
        let (analysis, _) = analyze(text, &index);
        // Offset of `x` inside the body.
        let offset = text.rfind('x').unwrap() as u32;
        let hover = hover_at(&analysis, text, &index, offset).expect("a hover");
        let HoverContents::Markup(m) = hover.contents else {
            panic!("expected markup");
        };
        assert!(m.value.contains("Int"), "hover was: {}", m.value);
    }

    #[test]
    fn hover_outside_any_expr_is_none() {
        let text = "(defn f [x] x)";
        let index = LineIndex::new(text);
        let (analysis, _) = analyze(text, &index);
        assert!(hover_at(&analysis, text, &index, 0).is_none());
    }
}
