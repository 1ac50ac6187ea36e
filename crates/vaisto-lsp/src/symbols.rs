use tower_lsp::lsp_types::{DocumentSymbol, SymbolKind};
use vaisto_ast::Item;

use crate::document::{AnalysisResult, LineIndex};

#[allow(deprecated)]
fn symbol(
    name: &str,
    detail: Option<String>,
    kind: SymbolKind,
    range: tower_lsp::lsp_types::Range,
    children: Option<Vec<DocumentSymbol>>,
) -> DocumentSymbol {
    DocumentSymbol {
        name: name.to_string(),
        detail,
        kind,
        tags: None,
        deprecated: None,
        range,
        selection_range: range,
        children,
    }
}

pub fn document_symbols(
    analysis: &AnalysisResult,
    text: &str,
    index: &LineIndex,
) -> Vec<DocumentSymbol> {
    let mut out = Vec::new();
    for (item, loc) in &analysis.module.items {
        let range = index.loc_to_range(text, *loc);
        match item {
            Item::Defn(d) => {
                let detail = format!("[{}]", d.params.len());
                out.push(symbol(&d.name, Some(detail), SymbolKind::FUNCTION, range, None));
            }
            Item::Deftype(d) => {
                let children = d
                    .variants
                    .iter()
                    .map(|v| {
                        symbol(
                            &v.name,
                            None,
                            SymbolKind::ENUM_MEMBER,
                            index.loc_to_range(text, v.loc),
                            None,
                        )
                    })
                    .collect();
                out.push(symbol(&d.name, None, SymbolKind::ENUM, range, Some(children)));
            }
            Item::Defrecord(d) => {
                let children = d
                    .fields
                    .iter()
                    .map(|f| {
                        symbol(
                            &f.name,
                            None,
                            SymbolKind::FIELD,
                            index.loc_to_range(text, f.loc),
                            None,
                        )
                    })
                    .collect();
                out.push(symbol(&d.name, None, SymbolKind::STRUCT, range, Some(children)));
            }
            Item::Defclass(d) => {
                let children = d
                    .methods
                    .iter()
                    .map(|m| {
                        symbol(
                            &m.name,
                            None,
                            SymbolKind::METHOD,
                            index.loc_to_range(text, m.loc),
                            None,
                        )
                    })
                    .collect();
                out.push(symbol(&d.name, None, SymbolKind::INTERFACE, range, Some(children)));
            }
            Item::Instance(d) => {
                let name = format!("({} {})", d.class_name, d.head.name);
                out.push(symbol(&name, None, SymbolKind::OBJECT, range, None));
            }
            Item::Process(d) => {
                out.push(symbol(&d.name, None, SymbolKind::EVENT, range, None));
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::analyze;

    #[test]
    fn symbols_cover_all_item_kinds() {
        let text = "(deftype Color (Red) (Green))
                    (defrecord Point [x Int] [y Int])
                    (defn area [w h] (* w h))
                    (process counter 0 :inc (+ state 1))";
        let index = LineIndex::new(text);
        let (analysis, _) = analyze(text, &index);
        let syms = document_symbols(&analysis, text, &index);
        let names: Vec<&str> = syms.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Color", "Point", "area", "counter"]);
        assert_eq!(syms[0].children.as_ref().unwrap().len(), 2);
    }
}
