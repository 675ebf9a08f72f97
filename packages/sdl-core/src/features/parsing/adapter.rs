//! The uniform per-language extraction contract
//!
//! Trees are owned by the pipeline scope and borrowed immutably by the
//! extraction calls; positional ranges are copied into candidates so the
//! tree can drop right after extraction.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use sdl_storage::ResolutionStrategy;
use tree_sitter::Tree;

use crate::shared::models::{CallSite, FileExtraction, ImportCandidate, SymbolCandidate};

use super::language::LanguageId;

/// Sentinel caller scope when no symbol range contains a position.
pub const GLOBAL_SCOPE: &str = "global";

/// A parsed file; wraps the grammar tree plus its error state.
pub struct ParsedTree {
    pub tree: Tree,
    pub has_errors: bool,
}

/// Resolution produced by a language-specific override hook.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResolution {
    pub to_symbol_id: String,
    pub confidence: f64,
    pub strategy: ResolutionStrategy,
}

/// Context handed to `resolve_call` override hooks.
pub struct AdapterResolveCtx<'a> {
    pub site: &'a CallSite,
    /// Whole-module import bindings: bound name -> indexed file path
    pub namespace_imports: &'a HashMap<String, String>,
    /// Live `(name, symbol_id)` pairs for a file path
    pub symbols_of_file: &'a dyn Fn(&str) -> Vec<(String, String)>,
}

/// Per-language adapter contract
///
/// Implementations must tolerate syntax errors: a tree with error nodes
/// still yields partial extraction, and only a totally unusable buffer
/// returns `None` from `parse`.
pub trait LanguageAdapter: Send + Sync {
    fn language(&self) -> LanguageId;

    fn parse(&self, content: &str, file_path: &str) -> Option<ParsedTree>;

    fn extract_symbols(
        &self,
        tree: &ParsedTree,
        content: &str,
        file_path: &str,
    ) -> Vec<SymbolCandidate>;

    fn extract_imports(
        &self,
        tree: &ParsedTree,
        content: &str,
        file_path: &str,
    ) -> Vec<ImportCandidate>;

    fn extract_calls(
        &self,
        tree: &ParsedTree,
        content: &str,
        file_path: &str,
        symbols: &[SymbolCandidate],
    ) -> Vec<CallSite>;

    /// Language-specific resolution shortcut consulted before the generic
    /// strategy chain. Default: no opinion.
    fn resolve_call(&self, _ctx: &AdapterResolveCtx<'_>) -> Option<CallResolution> {
        None
    }

    /// Full extraction for one file.
    fn extract(&self, tree: &ParsedTree, content: &str, file_path: &str) -> FileExtraction {
        let symbols = self.extract_symbols(tree, content, file_path);
        let imports = self.extract_imports(tree, content, file_path);
        let calls = self.extract_calls(tree, content, file_path, &symbols);
        FileExtraction {
            file_path: file_path.to_string(),
            language: self.language().as_str().to_string(),
            symbols,
            imports,
            calls,
            parse_errors: if tree.has_errors { 1 } else { 0 },
        }
    }
}

/// Index of the smallest candidate whose range contains `(line, col)`.
///
/// The range size key is `(end_line - start_line) * 1000 +
/// (end_col - start_col)`; ties break toward the narrower column span, then
/// the earlier candidate. Callers map `None` to the module scope.
pub fn find_enclosing_symbol(
    symbols: &[SymbolCandidate],
    line: u32,
    col: u32,
) -> Option<usize> {
    symbols
        .iter()
        .enumerate()
        .filter(|(_, s)| s.span.contains_position(line, col))
        .min_by_key(|(i, s)| (s.span.weight(), s.span.col_span(), *i))
        .map(|(i, _)| i)
}

/// Dispatch table over the closed set of adapters, keyed by file extension.
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn LanguageAdapter>>,
}

impl AdapterRegistry {
    pub fn new(adapters: Vec<Arc<dyn LanguageAdapter>>) -> Self {
        Self { adapters }
    }

    /// Registry covering every built-in language.
    pub fn with_defaults() -> Self {
        let adapters = LanguageId::all()
            .iter()
            .map(|id| {
                Arc::new(super::tree_sitter::TreeSitterAdapter::new(*id))
                    as Arc<dyn LanguageAdapter>
            })
            .collect();
        Self::new(adapters)
    }

    pub fn for_language(&self, id: LanguageId) -> Option<&Arc<dyn LanguageAdapter>> {
        self.adapters.iter().find(|a| a.language() == id)
    }

    pub fn for_path(&self, path: &Path) -> Option<&Arc<dyn LanguageAdapter>> {
        let ext = path.extension()?.to_str()?;
        let id = LanguageId::for_extension(ext)?;
        self.for_language(id)
    }

    /// Extensions this registry can index, optionally restricted to a
    /// language allow-list.
    pub fn allowed_extensions(&self, allow: &[String]) -> Vec<&'static str> {
        self.adapters
            .iter()
            .filter(|a| {
                allow.is_empty()
                    || allow
                        .iter()
                        .any(|l| LanguageId::parse(l) == Some(a.language()))
            })
            .flat_map(|a| a.language().spec().extensions.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::Span;
    use sdl_storage::{Signature, SymbolKind, Visibility};

    fn candidate(name: &str, span: Span) -> SymbolCandidate {
        SymbolCandidate {
            name: name.to_string(),
            kind: SymbolKind::Function,
            exported: false,
            visibility: Visibility::Private,
            signature: Signature::default(),
            summary: None,
            span,
            ast_fingerprint: String::new(),
        }
    }

    #[test]
    fn test_find_enclosing_picks_smallest() {
        let symbols = vec![
            candidate("module", Span::new(1, 0, 100, 0)),
            candidate("outer", Span::new(10, 0, 40, 1)),
            candidate("inner", Span::new(12, 4, 15, 5)),
        ];
        assert_eq!(find_enclosing_symbol(&symbols, 13, 8), Some(2));
        assert_eq!(find_enclosing_symbol(&symbols, 30, 0), Some(1));
        assert_eq!(find_enclosing_symbol(&symbols, 80, 0), Some(0));
        assert_eq!(find_enclosing_symbol(&symbols, 200, 0), None);
    }

    #[test]
    fn test_find_enclosing_tie_breaks_on_col_span() {
        let symbols = vec![
            candidate("wide", Span::new(5, 0, 5, 80)),
            candidate("narrow", Span::new(5, 10, 5, 40)),
        ];
        assert_eq!(find_enclosing_symbol(&symbols, 5, 20), Some(1));
    }

    #[test]
    fn test_registry_dispatch_by_extension() {
        let registry = AdapterRegistry::with_defaults();
        let adapter = registry.for_path(Path::new("src/app.py")).unwrap();
        assert_eq!(adapter.language(), LanguageId::Python);
        assert!(registry.for_path(Path::new("notes.txt")).is_none());
    }

    #[test]
    fn test_allowed_extensions_respects_allowlist() {
        let registry = AdapterRegistry::with_defaults();
        let exts = registry.allowed_extensions(&["python".to_string()]);
        assert!(exts.contains(&"py"));
        assert!(!exts.contains(&"rs"));

        let all = registry.allowed_extensions(&[]);
        assert!(all.contains(&"rs"));
        assert!(all.contains(&"go"));
    }
}
