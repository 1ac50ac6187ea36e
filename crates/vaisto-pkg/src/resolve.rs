use smol_str::SmolStr;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use vaisto_ast::Item;

use crate::error::PkgError;

/// One discovered module: its name (from `(ns …)` or the file stem), its
/// source path, and the modules it imports.
#[derive(Debug, Clone)]
pub struct ModuleSource {
    pub name: SmolStr,
    pub path: PathBuf,
    pub imports: Vec<SmolStr>,
}

/// A resolved build: modules in dependency order (leaves first).
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    pub modules: Vec<ModuleSource>,
}

/// Scan a directory for `.va` files, read their headers, and order them
/// topologically. Header reading tolerates parse errors in bodies — the
/// driver reports those properly when it elaborates the module.
pub fn resolve_dir(dir: &Path) -> Result<ResolvedGraph, PkgError> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| PkgError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("va"))
        .collect();
    entries.sort();

    if entries.is_empty() {
        return Err(PkgError::NoSources(dir.to_path_buf()));
    }

    let mut modules: HashMap<SmolStr, ModuleSource> = HashMap::new();
    let mut order: Vec<SmolStr> = Vec::new();
    for path in entries {
        let source = std::fs::read_to_string(&path).map_err(|e| PkgError::Io {
            path: path.clone(),
            source: e,
        })?;
        let fallback = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("main");
        let (name, imports) = read_header(&source, fallback);
        if let Some(existing) = modules.get(&name) {
            return Err(PkgError::DuplicateModule {
                name: name.to_string(),
                first: existing.path.clone(),
                second: path,
            });
        }
        order.push(name.clone());
        modules.insert(
            name.clone(),
            ModuleSource {
                name,
                path,
                imports,
            },
        );
    }

    // Validate import edges.
    for m in modules.values() {
        for imp in &m.imports {
            if !modules.contains_key(imp) {
                return Err(PkgError::UnknownModule {
                    importer: m.name.to_string(),
                    imported: imp.to_string(),
                });
            }
        }
    }

    // Topological sort with cycle detection.
    let mut sorted = Vec::new();
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    for name in &order {
        topo_dfs(name, &modules, &mut visited, &mut in_stack, &mut sorted)?;
    }

    Ok(ResolvedGraph {
        modules: sorted
            .into_iter()
            .map(|n| modules[&n].clone())
            .collect(),
    })
}

/// Extract the module name and import list from a source file.
pub fn read_header(source: &str, fallback: &str) -> (SmolStr, Vec<SmolStr>) {
    let (module, _errors) = vaisto_parser::parse(source);
    let name = module.name.clone().unwrap_or_else(|| SmolStr::new(fallback));
    let mut imports = Vec::new();
    for (item, _) in &module.items {
        if let Item::Import(imp) = item {
            if !imports.contains(&imp.module) {
                imports.push(imp.module.clone());
            }
        }
    }
    (name, imports)
}

fn topo_dfs(
    name: &SmolStr,
    modules: &HashMap<SmolStr, ModuleSource>,
    visited: &mut HashSet<SmolStr>,
    in_stack: &mut HashSet<SmolStr>,
    out: &mut Vec<SmolStr>,
) -> Result<(), PkgError> {
    if in_stack.contains(name) {
        return Err(PkgError::DependencyCycle(name.to_string()));
    }
    if visited.contains(name) {
        return Ok(());
    }
    in_stack.insert(name.clone());
    if let Some(m) = modules.get(name) {
        for dep in &m.imports {
            topo_dfs(dep, modules, visited, in_stack, out)?;
        }
    }
    in_stack.remove(name);
    visited.insert(name.clone());
    out.push(name.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_sources(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    #[test]
    fn header_prefers_ns_over_stem() {
        let (name, imports) = read_header("(ns geometry) (import util)", "file");
        assert_eq!(name, "geometry");
        assert_eq!(imports, vec![SmolStr::new("util")]);
    }

    #[test]
    fn header_falls_back_to_stem() {
        let (name, _) = read_header("(defn f [] 1)", "widgets");
        assert_eq!(name, "widgets");
    }

    #[test]
    fn dependency_order_is_leaves_first() {
        let dir = write_sources(&[
            ("app.va", "(ns app) (import lib) (defn main [] (f))"),
            ("lib.va", "(ns lib) (defn f [] 1)"),
        ]);
        let graph = resolve_dir(dir.path()).unwrap();
        let names: Vec<&str> = graph.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["lib", "app"]);
    }

    #[test]
    fn unknown_import_is_an_error() {
        let dir = write_sources(&[("app.va", "(ns app) (import nothing)")]);
        assert!(matches!(
            resolve_dir(dir.path()),
            Err(PkgError::UnknownModule { .. })
        ));
    }

    #[test]
    fn cycle_is_detected() {
        let dir = write_sources(&[
            ("a.va", "(ns a) (import b)"),
            ("b.va", "(ns b) (import a)"),
        ]);
        assert!(matches!(
            resolve_dir(dir.path()),
            Err(PkgError::DependencyCycle(_))
        ));
    }

    #[test]
    fn empty_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_dir(dir.path()),
            Err(PkgError::NoSources(_))
        ));
    }

    #[test]
    fn duplicate_module_names_rejected() {
        let dir = write_sources(&[
            ("one.va", "(ns shared)"),
            ("two.va", "(ns shared)"),
        ]);
        assert!(matches!(
            resolve_dir(dir.path()),
            Err(PkgError::DuplicateModule { .. })
        ));
    }
}
