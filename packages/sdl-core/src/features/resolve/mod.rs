//! Call-edge resolution
//!
//! Second pass of an indexing run: binds extracted call sites to symbol ids
//! using same-file symbols, import bindings and receiver heuristics. The
//! strategy chain is fixed; a language adapter may short-circuit it through
//! its `resolve_call` hook (Python namespace imports use this).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use sdl_storage::{Edge, EdgeKind, ResolutionStrategy, Symbol, SymbolKind};

use crate::features::parsing::{AdapterResolveCtx, LanguageAdapter};
use crate::shared::models::{CallSite, CallType, ImportCandidate};

/// Import binding with its (best-effort) repo-level resolution.
#[derive(Debug, Clone)]
pub struct ResolvedImport {
    pub candidate: ImportCandidate,
    /// Repo file path the specifier resolved to, if it names an indexed file
    pub target_file: Option<String>,
    /// Target symbol in that file
    pub target_symbol_id: Option<String>,
}

/// Everything the resolver needs for one file.
pub struct FileResolveInput<'a> {
    pub file_path: &'a str,
    pub module_symbol_id: &'a str,
    /// Canonicalized symbols of this file, module symbol included
    pub symbols: &'a [Symbol],
    pub imports: &'a [ResolvedImport],
    pub calls: &'a [CallSite],
}

/// Cross-file lookups supplied by the pipeline.
pub struct ResolverLookup<'a> {
    pub adapter: Option<&'a Arc<dyn LanguageAdapter>>,
    /// Live `(name, symbol_id)` pairs for any repo file
    pub symbols_of_file: &'a dyn Fn(&str) -> Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub edges: Vec<Edge>,
    pub unresolved_count: usize,
}

const CONF_SELF_METHOD: f64 = 0.95;
const CONF_SCOPED: f64 = 0.9;
const CONF_BARE_EXACT: f64 = 0.9;
const CONF_BARE_AMBIGUOUS: f64 = 0.5;
const CONF_UNKNOWN_RECEIVER: f64 = 0.2;
const CONF_DYNAMIC: f64 = 0.1;
const CONF_IMPORT: f64 = 1.0;
const CONF_IMPORT_EXTERNAL: f64 = 0.3;

/// Resolve a module specifier against the repo's file set.
///
/// Handles relative specifiers (`./a`, `../x/y`), Python dotted paths
/// (`pkg.mod`) and bare repo-root paths. Best effort: `None` means the
/// import is external to the repo.
pub fn resolve_module_path(
    importing_file: &str,
    specifier: &str,
    known_files: &HashSet<String>,
) -> Option<String> {
    const EXTENSIONS: &[&str] = &[
        "ts", "tsx", "js", "jsx", "mts", "py", "rs", "go", "java", "kt",
    ];

    let try_candidates = |base: &str| -> Option<String> {
        if known_files.contains(base) {
            return Some(base.to_string());
        }
        for ext in EXTENSIONS {
            let with_ext = format!("{base}.{ext}");
            if known_files.contains(&with_ext) {
                return Some(with_ext);
            }
        }
        for index in ["index.ts", "index.tsx", "index.js", "__init__.py", "mod.rs"] {
            let nested = format!("{base}/{index}");
            if known_files.contains(&nested) {
                return Some(nested);
            }
        }
        None
    };

    if specifier.starts_with('.') && (specifier.contains('/') || specifier.starts_with("./")) {
        // path-relative specifier
        let dir = std::path::Path::new(importing_file)
            .parent()
            .unwrap_or_else(|| std::path::Path::new(""));
        let joined = normalize_path(&dir.join(specifier));
        return try_candidates(&joined);
    }

    if specifier.contains('.') && !specifier.contains('/') {
        // python dotted path
        let slashed = specifier.replace('.', "/");
        if let Some(hit) = try_candidates(&slashed) {
            return Some(hit);
        }
    }

    try_candidates(specifier)
}

fn normalize_path(path: &std::path::Path) -> String {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for comp in path.components() {
        match comp {
            std::path::Component::ParentDir => {
                parts.pop();
            }
            std::path::Component::CurDir => {}
            std::path::Component::Normal(p) => parts.push(p),
            _ => {}
        }
    }
    parts
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Pre-resolve a file's import candidates against the repo file set.
pub fn resolve_imports(
    file_path: &str,
    imports: &[ImportCandidate],
    known_files: &HashSet<String>,
    symbols_of_file: &dyn Fn(&str) -> Vec<(String, String)>,
) -> Vec<ResolvedImport> {
    imports
        .iter()
        .map(|candidate| {
            let target_file =
                resolve_module_path(file_path, &candidate.source, known_files);
            let target_symbol_id = target_file.as_deref().and_then(|file| {
                let symbols = symbols_of_file(file);
                if candidate.namespace || candidate.bound_name == "*" {
                    // bind the target module symbol
                    symbols
                        .iter()
                        .find(|(_, id)| id.contains(":module:"))
                        .map(|(_, id)| id.clone())
                } else {
                    let wanted = candidate
                        .imported_name
                        .as_deref()
                        .unwrap_or(&candidate.bound_name);
                    symbols
                        .iter()
                        .find(|(name, _)| name == wanted)
                        .map(|(_, id)| id.clone())
                }
            });
            ResolvedImport {
                candidate: candidate.clone(),
                target_file,
                target_symbol_id,
            }
        })
        .collect()
}

/// Import/re-export edges from the file's module symbol.
pub fn build_import_edges(repo_id: &str, input: &FileResolveInput<'_>) -> Vec<Edge> {
    let mut edges = Vec::new();
    for import in input.imports {
        let kind = if import.candidate.re_export {
            EdgeKind::ReExport
        } else {
            EdgeKind::Import
        };
        let callee = format!(
            "{}#{}",
            import.candidate.source,
            import
                .candidate
                .imported_name
                .as_deref()
                .unwrap_or(&import.candidate.bound_name)
        );
        let (resolution, confidence) = match &import.target_symbol_id {
            Some(_) => (ResolutionStrategy::Exact, CONF_IMPORT),
            None => (ResolutionStrategy::Unresolved, CONF_IMPORT_EXTERNAL),
        };
        edges.push(Edge {
            repo_id: repo_id.to_string(),
            from_symbol_id: input.module_symbol_id.to_string(),
            to_symbol_id: import.target_symbol_id.clone(),
            callee_identifier: Some(callee),
            kind,
            weight: 1.0,
            confidence,
            resolution,
            candidate_count: None,
            first_seen_version: 0,
            last_seen_version: None,
        });
    }
    edges
}

/// Resolve every call site of a file into call edges.
pub fn resolve_file_calls(
    repo_id: &str,
    input: &FileResolveInput<'_>,
    lookup: &ResolverLookup<'_>,
) -> ResolveOutcome {
    let namespace_imports: HashMap<String, String> = input
        .imports
        .iter()
        .filter(|i| i.candidate.namespace)
        .filter_map(|i| {
            i.target_file
                .as_ref()
                .map(|f| (i.candidate.bound_name.clone(), f.clone()))
        })
        .collect();

    // identity key -> edge; repeated calls to the same callee collapse,
    // keeping the highest-confidence resolution
    let mut edges: BTreeMap<String, Edge> = BTreeMap::new();
    let mut unresolved_count = 0usize;

    for site in input.calls {
        let caller_id = enclosing_symbol_id(input, site);
        let resolution = resolve_site(input, lookup, &namespace_imports, site);
        if resolution.to_symbol_id.is_none() {
            unresolved_count += 1;
        }

        let edge = Edge {
            repo_id: repo_id.to_string(),
            from_symbol_id: caller_id,
            to_symbol_id: resolution.to_symbol_id,
            callee_identifier: Some(site.callee_identifier.clone()),
            kind: EdgeKind::Call,
            weight: 1.0,
            confidence: resolution.confidence,
            resolution: resolution.strategy,
            candidate_count: resolution.candidate_count,
            first_seen_version: 0,
            last_seen_version: None,
        };
        let key = edge.identity_key();
        match edges.get(&key) {
            Some(existing) if existing.confidence >= edge.confidence => {}
            _ => {
                edges.insert(key, edge);
            }
        }
    }

    ResolveOutcome {
        edges: edges.into_values().collect(),
        unresolved_count,
    }
}

struct SiteResolution {
    to_symbol_id: Option<String>,
    confidence: f64,
    strategy: ResolutionStrategy,
    candidate_count: Option<u32>,
}

impl SiteResolution {
    fn unresolved(confidence: f64) -> Self {
        Self {
            to_symbol_id: None,
            confidence,
            strategy: ResolutionStrategy::Unresolved,
            candidate_count: None,
        }
    }

    fn exact(id: String, confidence: f64) -> Self {
        Self {
            to_symbol_id: Some(id),
            confidence,
            strategy: ResolutionStrategy::Exact,
            candidate_count: None,
        }
    }
}

/// Smallest same-file symbol range containing the call site; the module
/// symbol is the `global` fallback since it spans the whole file.
fn enclosing_symbol_id(input: &FileResolveInput<'_>, site: &CallSite) -> String {
    input
        .symbols
        .iter()
        .filter(|s| s.contains_position(site.span.start_line, site.span.start_col))
        .min_by_key(|s| (s.range_weight(), s.symbol_id.clone()))
        .map(|s| s.symbol_id.clone())
        .unwrap_or_else(|| input.module_symbol_id.to_string())
}

fn resolve_site(
    input: &FileResolveInput<'_>,
    lookup: &ResolverLookup<'_>,
    namespace_imports: &HashMap<String, String>,
    site: &CallSite,
) -> SiteResolution {
    // Adapter override hook runs first.
    if let Some(adapter) = lookup.adapter {
        let ctx = AdapterResolveCtx {
            site,
            namespace_imports,
            symbols_of_file: lookup.symbols_of_file,
        };
        if let Some(hit) = adapter.resolve_call(&ctx) {
            return SiteResolution {
                to_symbol_id: Some(hit.to_symbol_id),
                confidence: hit.confidence,
                strategy: hit.strategy,
                candidate_count: None,
            };
        }
    }

    // 5. computed / tagged template / dynamic dispatch
    if matches!(
        site.call_type,
        CallType::Dynamic | CallType::Computed | CallType::TaggedTemplate
    ) {
        return SiteResolution::unresolved(CONF_DYNAMIC);
    }

    match site.receiver.as_deref() {
        // 1. self/this/super-qualified method
        Some("self" | "this" | "super") => {
            if let Some(id) = resolve_in_enclosing_class(input, site) {
                return SiteResolution::exact(id, CONF_SELF_METHOD);
            }
            SiteResolution::unresolved(CONF_UNKNOWN_RECEIVER)
        }
        // 2. scoped/static qualifier
        Some(recv) if is_type_receiver(input, recv) => {
            if let Some(id) = resolve_scoped(input, lookup, recv, &site.callee_name) {
                return SiteResolution::exact(id, CONF_SCOPED);
            }
            SiteResolution::unresolved(CONF_UNKNOWN_RECEIVER)
        }
        // 4. member access with unknown receiver type
        Some(_) => SiteResolution::unresolved(CONF_UNKNOWN_RECEIVER),
        // 3. bare identifier
        None => resolve_bare(input, &site.callee_name),
    }
}

fn is_type_receiver(input: &FileResolveInput<'_>, receiver: &str) -> bool {
    let type_like_symbol = input.symbols.iter().any(|s| {
        s.name == receiver
            && matches!(
                s.kind,
                SymbolKind::Class | SymbolKind::Interface | SymbolKind::Type
            )
    });
    let type_like_import = input
        .imports
        .iter()
        .any(|i| i.candidate.bound_name == receiver && !i.candidate.namespace);
    let capitalized = receiver
        .chars()
        .next()
        .map_or(false, |c| c.is_uppercase());
    type_like_symbol || (capitalized && (type_like_import || !receiver.contains('.')))
}

fn resolve_in_enclosing_class(input: &FileResolveInput<'_>, site: &CallSite) -> Option<String> {
    let class = input
        .symbols
        .iter()
        .filter(|s| {
            matches!(s.kind, SymbolKind::Class | SymbolKind::Interface)
                && s.contains_position(site.span.start_line, site.span.start_col)
        })
        .min_by_key(|s| s.range_weight())?;

    let class_span = (class.start_line, class.end_line);
    input
        .symbols
        .iter()
        .filter(|s| {
            s.name == site.callee_name
                && matches!(
                    s.kind,
                    SymbolKind::Method | SymbolKind::Constructor | SymbolKind::Function
                )
                && s.start_line >= class_span.0
                && s.end_line <= class_span.1
        })
        .min_by_key(|s| s.symbol_id.clone())
        .map(|s| s.symbol_id.clone())
}

fn resolve_scoped(
    input: &FileResolveInput<'_>,
    lookup: &ResolverLookup<'_>,
    receiver: &str,
    method: &str,
) -> Option<String> {
    // receiver declared in this file: members are same-file symbols
    if let Some(class) = input.symbols.iter().find(|s| {
        s.name == receiver
            && matches!(
                s.kind,
                SymbolKind::Class | SymbolKind::Interface | SymbolKind::Type
            )
    }) {
        // members inside the declaration span, or (impl-block languages)
        // same-file methods by name
        let member = input
            .symbols
            .iter()
            .filter(|s| {
                s.name == method
                    && matches!(
                        s.kind,
                        SymbolKind::Method | SymbolKind::Constructor | SymbolKind::Function
                    )
            })
            .min_by_key(|s| {
                let inside =
                    s.start_line >= class.start_line && s.end_line <= class.end_line;
                (!inside, s.symbol_id.clone())
            });
        return member.map(|s| s.symbol_id.clone());
    }

    // receiver bound by an import: member lives in the target file
    let import = input
        .imports
        .iter()
        .find(|i| i.candidate.bound_name == receiver)?;
    let target_file = import.target_file.as_deref()?;
    let symbols = (lookup.symbols_of_file)(target_file);
    symbols
        .into_iter()
        .find(|(name, _)| name == method)
        .map(|(_, id)| id)
}

fn resolve_bare(input: &FileResolveInput<'_>, name: &str) -> SiteResolution {
    if name.is_empty() {
        return SiteResolution::unresolved(CONF_UNKNOWN_RECEIVER);
    }

    let mut candidates: Vec<String> = input
        .symbols
        .iter()
        .filter(|s| {
            s.name == name
                && matches!(
                    s.kind,
                    SymbolKind::Function
                        | SymbolKind::Method
                        | SymbolKind::Class
                        | SymbolKind::Constructor
                        | SymbolKind::Variable
                )
        })
        .map(|s| s.symbol_id.clone())
        .collect();

    for import in input.imports {
        if import.candidate.bound_name == name {
            if let Some(id) = &import.target_symbol_id {
                candidates.push(id.clone());
            }
        }
    }
    candidates.sort();
    candidates.dedup();

    match candidates.len() {
        0 => SiteResolution::unresolved(CONF_UNKNOWN_RECEIVER),
        1 => SiteResolution::exact(candidates.remove(0), CONF_BARE_EXACT),
        n => SiteResolution {
            to_symbol_id: Some(candidates.remove(0)),
            confidence: CONF_BARE_AMBIGUOUS,
            strategy: ResolutionStrategy::Heuristic,
            candidate_count: Some(n as u32),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::Span;
    use sdl_storage::{Signature, Visibility};

    fn symbol(id: &str, name: &str, kind: SymbolKind, start: u32, end: u32) -> Symbol {
        Symbol {
            symbol_id: id.to_string(),
            repo_id: "r".into(),
            file_path: "a.py".into(),
            name: name.to_string(),
            kind,
            exported: true,
            visibility: Visibility::Public,
            signature: Signature::default(),
            summary: None,
            start_line: start,
            start_col: 0,
            end_line: end,
            end_col: 999,
            ast_fingerprint: format!("fp-{id}"),
            first_seen_version: 0,
            last_seen_version: None,
        }
    }

    fn call(callee: &str, receiver: Option<&str>, name: &str, ty: CallType, line: u32) -> CallSite {
        CallSite {
            callee_identifier: callee.to_string(),
            receiver: receiver.map(Into::into),
            callee_name: name.to_string(),
            call_type: ty,
            span: Span::new(line, 4, line, 20),
        }
    }

    fn no_lookup<'a>(f: &'a dyn Fn(&str) -> Vec<(String, String)>) -> ResolverLookup<'a> {
        ResolverLookup {
            adapter: None,
            symbols_of_file: f,
        }
    }

    #[test]
    fn test_self_method_resolution() {
        let symbols = vec![
            symbol("sym:mod", "a", SymbolKind::Module, 1, 100),
            symbol("sym:cls", "Conn", SymbolKind::Class, 2, 20),
            symbol("sym:close", "close", SymbolKind::Method, 5, 8),
            symbol("sym:send", "send", SymbolKind::Method, 10, 18),
        ];
        let calls = vec![call("self.close", Some("self"), "close", CallType::Method, 12)];
        let input = FileResolveInput {
            file_path: "a.py",
            module_symbol_id: "sym:mod",
            symbols: &symbols,
            imports: &[],
            calls: &calls,
        };
        let empty = |_: &str| Vec::new();
        let outcome = resolve_file_calls("r", &input, &no_lookup(&empty));

        assert_eq!(outcome.edges.len(), 1);
        let edge = &outcome.edges[0];
        assert_eq!(edge.from_symbol_id, "sym:send");
        assert_eq!(edge.to_symbol_id.as_deref(), Some("sym:close"));
        assert_eq!(edge.confidence, 0.95);
        assert_eq!(edge.resolution, ResolutionStrategy::Exact);
    }

    #[test]
    fn test_bare_identifier_single_candidate() {
        let symbols = vec![
            symbol("sym:mod", "a", SymbolKind::Module, 1, 100),
            symbol("sym:foo", "foo", SymbolKind::Function, 2, 4),
            symbol("sym:run", "run", SymbolKind::Function, 6, 9),
        ];
        let calls = vec![call("foo", None, "foo", CallType::Function, 7)];
        let input = FileResolveInput {
            file_path: "a.py",
            module_symbol_id: "sym:mod",
            symbols: &symbols,
            imports: &[],
            calls: &calls,
        };
        let empty = |_: &str| Vec::new();
        let outcome = resolve_file_calls("r", &input, &no_lookup(&empty));

        let edge = &outcome.edges[0];
        assert_eq!(edge.to_symbol_id.as_deref(), Some("sym:foo"));
        assert_eq!(edge.confidence, 0.9);
        assert_eq!(outcome.unresolved_count, 0);
    }

    #[test]
    fn test_bare_identifier_ambiguous() {
        let symbols = vec![
            symbol("sym:mod", "a", SymbolKind::Module, 1, 100),
            symbol("sym:f1", "foo", SymbolKind::Function, 2, 4),
            symbol("sym:f2", "foo", SymbolKind::Method, 6, 8),
            symbol("sym:run", "run", SymbolKind::Function, 10, 14),
        ];
        let calls = vec![call("foo", None, "foo", CallType::Function, 11)];
        let input = FileResolveInput {
            file_path: "a.py",
            module_symbol_id: "sym:mod",
            symbols: &symbols,
            imports: &[],
            calls: &calls,
        };
        let empty = |_: &str| Vec::new();
        let outcome = resolve_file_calls("r", &input, &no_lookup(&empty));

        let edge = &outcome.edges[0];
        assert_eq!(edge.resolution, ResolutionStrategy::Heuristic);
        assert_eq!(edge.confidence, 0.5);
        assert_eq!(edge.candidate_count, Some(2));
    }

    #[test]
    fn test_unknown_receiver_unresolved() {
        let symbols = vec![symbol("sym:mod", "a", SymbolKind::Module, 1, 100)];
        let calls = vec![call("obj.send", Some("obj"), "send", CallType::Method, 5)];
        let input = FileResolveInput {
            file_path: "a.py",
            module_symbol_id: "sym:mod",
            symbols: &symbols,
            imports: &[],
            calls: &calls,
        };
        let empty = |_: &str| Vec::new();
        let outcome = resolve_file_calls("r", &input, &no_lookup(&empty));

        let edge = &outcome.edges[0];
        assert!(edge.to_symbol_id.is_none());
        assert_eq!(edge.confidence, 0.2);
        assert_eq!(edge.callee_identifier.as_deref(), Some("obj.send"));
        assert_eq!(outcome.unresolved_count, 1);
    }

    #[test]
    fn test_dynamic_call_lowest_confidence() {
        let symbols = vec![symbol("sym:mod", "a", SymbolKind::Module, 1, 100)];
        let calls = vec![call("handlers[x]", None, "", CallType::Computed, 5)];
        let input = FileResolveInput {
            file_path: "a.py",
            module_symbol_id: "sym:mod",
            symbols: &symbols,
            imports: &[],
            calls: &calls,
        };
        let empty = |_: &str| Vec::new();
        let outcome = resolve_file_calls("r", &input, &no_lookup(&empty));
        assert_eq!(outcome.edges[0].confidence, 0.1);
    }

    #[test]
    fn test_import_edge_resolution() {
        let import = ResolvedImport {
            candidate: ImportCandidate {
                bound_name: "foo".into(),
                source: "./a".into(),
                imported_name: Some("foo".into()),
                namespace: false,
                re_export: false,
                span: Span::new(1, 0, 1, 30),
            },
            target_file: Some("a.ts".into()),
            target_symbol_id: Some("sym:a:foo".into()),
        };
        let symbols = vec![symbol("sym:mod", "b", SymbolKind::Module, 1, 100)];
        let input = FileResolveInput {
            file_path: "b.ts",
            module_symbol_id: "sym:mod",
            symbols: &symbols,
            imports: std::slice::from_ref(&import),
            calls: &[],
        };
        let edges = build_import_edges("r", &input);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, EdgeKind::Import);
        assert_eq!(edges[0].to_symbol_id.as_deref(), Some("sym:a:foo"));
        assert_eq!(edges[0].resolution, ResolutionStrategy::Exact);
    }

    #[test]
    fn test_module_path_resolution() {
        let mut files = HashSet::new();
        files.insert("src/a.ts".to_string());
        files.insert("pkg/mod.py".to_string());
        files.insert("lib/index.ts".to_string());

        assert_eq!(
            resolve_module_path("src/b.ts", "./a", &files),
            Some("src/a.ts".to_string())
        );
        assert_eq!(
            resolve_module_path("main.py", "pkg.mod", &files),
            Some("pkg/mod.py".to_string())
        );
        assert_eq!(
            resolve_module_path("src/b.ts", "../lib", &files),
            Some("lib/index.ts".to_string())
        );
        assert_eq!(resolve_module_path("src/b.ts", "react", &files), None);
    }

    #[test]
    fn test_repeated_calls_collapse_to_one_edge() {
        let symbols = vec![
            symbol("sym:mod", "a", SymbolKind::Module, 1, 100),
            symbol("sym:foo", "foo", SymbolKind::Function, 2, 4),
            symbol("sym:run", "run", SymbolKind::Function, 6, 20),
        ];
        let calls = vec![
            call("foo", None, "foo", CallType::Function, 7),
            call("foo", None, "foo", CallType::Function, 9),
        ];
        let input = FileResolveInput {
            file_path: "a.py",
            module_symbol_id: "sym:mod",
            symbols: &symbols,
            imports: &[],
            calls: &calls,
        };
        let empty = |_: &str| Vec::new();
        let outcome = resolve_file_calls("r", &input, &no_lookup(&empty));
        assert_eq!(outcome.edges.len(), 1);
    }
}
