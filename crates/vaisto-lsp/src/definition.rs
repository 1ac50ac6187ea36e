use smol_str::SmolStr;
use std::collections::HashMap;
use tower_lsp::lsp_types::{GotoDefinitionResponse, Location, Url};
use vaisto_ast::{ExprKind, Item, PatternKind};
use vaisto_lexer::Loc;

use crate::document::{AnalysisResult, LineIndex};

/// Definition sites by name: functions, types, constructors, record
/// fields' owners, classes, and processes.
fn definition_index(analysis: &AnalysisResult) -> HashMap<SmolStr, Loc> {
    let mut index = HashMap::new();
    for (item, _) in &analysis.module.items {
        match item {
            Item::Defn(d) => {
                index.insert(d.name.clone(), d.name_loc);
            }
            Item::Deftype(d) => {
                index.insert(d.name.clone(), d.name_loc);
                for v in &d.variants {
                    index.insert(v.name.clone(), v.name_loc);
                }
            }
            Item::Defrecord(d) => {
                index.insert(d.name.clone(), d.name_loc);
            }
            Item::Defclass(d) => {
                index.insert(d.name.clone(), d.name_loc);
                for m in &d.methods {
                    index.insert(m.name.clone(), m.name_loc);
                }
            }
            Item::Process(d) => {
                index.insert(d.name.clone(), d.name_loc);
            }
            _ => {}
        }
    }
    index
}

/// The referenced name under the cursor, if any.
fn name_at(analysis: &AnalysisResult, offset: u32) -> Option<SmolStr> {
    let mut best: Option<(u32, SmolStr)> = None;
    for (_, expr) in analysis.module.exprs.iter() {
        if expr.loc.start <= offset && offset < expr.loc.end {
            let name = match &expr.kind {
                ExprKind::Var(name) => Some(name.clone()),
                ExprKind::Spawn { process, .. } => Some(process.clone()),
                _ => None,
            };
            if let Some(name) = name {
                let width = expr.loc.len();
                if best.as_ref().map_or(true, |(w, _)| width < *w) {
                    best = Some((width, name));
                }
            }
        }
    }
    if best.is_none() {
        for (_, pat) in analysis.module.patterns.iter() {
            if pat.loc.start <= offset && offset < pat.loc.end {
                if let PatternKind::Constructor { name, .. } = &pat.kind {
                    return Some(name.clone());
                }
            }
        }
    }
    best.map(|(_, n)| n)
}

pub fn goto_definition(
    analysis: &AnalysisResult,
    text: &str,
    index: &LineIndex,
    offset: u32,
    uri: &Url,
) -> Option<GotoDefinitionResponse> {
    let name = name_at(analysis, offset)?;
    let defs = definition_index(analysis);
    let loc = defs.get(&name)?;
    Some(GotoDefinitionResponse::Scalar(Location {
        uri: uri.clone(),
        range: index.loc_to_range(text, *loc),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::analyze;

    #[test]
    fn goto_function_definition() {
        let text = "(defn helper [] 1) (defn main [] (helper))";
        let index = LineIndex::new(text);
        let (analysis, _) = analyze(text, &index);
        let uri = Url::parse("file:///m.va").unwrap();
        let offset = text.rfind("helper").unwrap() as u32;
        let response =
            goto_definition(&analysis, text, &index, offset, &uri).expect("a definition");
        let GotoDefinitionResponse::Scalar(loc) = response else {
            panic!("expected a single location");
        };
        assert_eq!(loc.range.start.character, 6); // "(defn " prefix
    }

    #[test]
    fn goto_on_literal_is_none() {
        let text = "(defn main [] 42)";
        let index = LineIndex::new(text);
        let (analysis, _) = analyze(text, &index);
        let uri = Url::parse("file:///m.va").unwrap();
        let offset = text.find("42").unwrap() as u32;
        assert!(goto_definition(&analysis, text, &index, offset, &uri).is_none());
    }
}
