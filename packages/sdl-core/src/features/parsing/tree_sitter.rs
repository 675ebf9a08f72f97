//! Generic tree-sitter adapter
//!
//! One adapter type drives every grammar through the node-kind tables in
//! [`LanguageSpec`](super::language::LanguageSpec). Grammar-specific walkers
//! (imports mostly) branch on the language id.
//!
//! Parsing feeds the grammar through a chunked read callback with a 1 MiB
//! buffer: several grammars default to a far smaller internal limit and
//! silently fail on large files, so the override is mandatory here.

use tree_sitter::{Node, Parser, Point};

use sdl_storage::{Param, Signature, SymbolKind, Visibility};

use crate::shared::models::{CallSite, CallType, ImportCandidate, Span, SymbolCandidate};

use super::adapter::{AdapterResolveCtx, CallResolution, LanguageAdapter, ParsedTree};
use super::fingerprint::fingerprint_node;
use super::language::{kind_in, LanguageId, LanguageSpec};

/// Minimum read-buffer size fed to the grammar.
pub const PARSE_BUFFER_BYTES: usize = 1024 * 1024;

/// Cap on extracted summaries (docstrings)
const SUMMARY_MAX_CHARS: usize = 200;

/// Tree-sitter adapter for one language.
pub struct TreeSitterAdapter {
    id: LanguageId,
}

impl TreeSitterAdapter {
    pub fn new(id: LanguageId) -> Self {
        Self { id }
    }

    fn spec(&self) -> &'static LanguageSpec {
        self.id.spec()
    }
}

impl LanguageAdapter for TreeSitterAdapter {
    fn language(&self) -> LanguageId {
        self.id
    }

    fn parse(&self, content: &str, file_path: &str) -> Option<ParsedTree> {
        let mut parser = Parser::new();
        if let Err(err) = parser.set_language(&self.id.grammar()) {
            tracing::warn!(file = file_path, %err, "grammar rejected by tree-sitter runtime");
            return None;
        }

        let bytes = content.as_bytes();
        let tree = parser.parse_with(
            &mut |offset: usize, _pos: Point| -> &[u8] {
                if offset >= bytes.len() {
                    &[]
                } else {
                    let end = (offset + PARSE_BUFFER_BYTES).min(bytes.len());
                    &bytes[offset..end]
                }
            },
            None,
        )?;

        let has_errors = tree.root_node().has_error();
        Some(ParsedTree { tree, has_errors })
    }

    fn extract_symbols(
        &self,
        tree: &ParsedTree,
        content: &str,
        file_path: &str,
    ) -> Vec<SymbolCandidate> {
        let mut symbols = vec![module_symbol(tree, content, file_path)];
        let mut walker = SymbolWalker {
            spec: self.spec(),
            source: content,
            container_depth: 0,
            function_depth: 0,
            export_depth: 0,
            out: &mut symbols,
        };
        walker.walk(&tree.tree.root_node());
        symbols
    }

    fn extract_imports(
        &self,
        tree: &ParsedTree,
        content: &str,
        _file_path: &str,
    ) -> Vec<ImportCandidate> {
        let mut imports = Vec::new();
        collect_imports(self.id, &tree.tree.root_node(), content, &mut imports);
        imports
    }

    fn extract_calls(
        &self,
        tree: &ParsedTree,
        content: &str,
        _file_path: &str,
        _symbols: &[SymbolCandidate],
    ) -> Vec<CallSite> {
        let mut calls = Vec::new();
        collect_calls(self.spec(), &tree.tree.root_node(), content, &mut calls);
        calls
    }

    fn resolve_call(&self, ctx: &AdapterResolveCtx<'_>) -> Option<CallResolution> {
        if self.id != LanguageId::Python {
            return None;
        }
        // Python namespace imports: `import os.path as p; p.join(...)`
        // resolves through the bound module's own symbol table.
        let receiver = ctx.site.receiver.as_deref()?;
        let target_file = ctx.namespace_imports.get(receiver)?;
        let symbols = (ctx.symbols_of_file)(target_file);
        symbols
            .into_iter()
            .find(|(name, _)| name == &ctx.site.callee_name)
            .map(|(_, symbol_id)| CallResolution {
                to_symbol_id: symbol_id,
                confidence: 0.9,
                strategy: sdl_storage::ResolutionStrategy::Exact,
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

fn text<'a>(node: &Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn node_span(node: &Node) -> Span {
    Span::new(
        node.start_position().row as u32 + 1,
        node.start_position().column as u32,
        node.end_position().row as u32 + 1,
        node.end_position().column as u32,
    )
}

/// Synthetic whole-file module symbol; always index 0.
fn module_symbol(tree: &ParsedTree, content: &str, file_path: &str) -> SymbolCandidate {
    let name = std::path::Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path)
        .to_string();
    let line_count = content.lines().count().max(1) as u32;
    let last_len = content.lines().last().map_or(0, |l| l.len()) as u32;
    SymbolCandidate {
        name,
        kind: SymbolKind::Module,
        exported: true,
        visibility: Visibility::Public,
        signature: Signature::default(),
        summary: None,
        span: Span::new(1, 0, line_count, last_len.max(1)),
        ast_fingerprint: fingerprint_node(&tree.tree.root_node(), content),
    }
}

struct SymbolWalker<'a> {
    spec: &'static LanguageSpec,
    source: &'a str,
    container_depth: usize,
    function_depth: usize,
    export_depth: usize,
    out: &'a mut Vec<SymbolCandidate>,
}

impl SymbolWalker<'_> {
    fn walk(&mut self, node: &Node) {
        let kind = node.kind();
        let spec = self.spec;

        let symbol_kind = if kind_in(spec.constructor_kinds, kind) {
            Some(SymbolKind::Constructor)
        } else if kind_in(spec.method_kinds, kind) {
            Some(SymbolKind::Method)
        } else if kind_in(spec.function_kinds, kind) {
            if self.container_depth > 0 {
                Some(SymbolKind::Method)
            } else {
                Some(SymbolKind::Function)
            }
        } else if kind_in(spec.class_kinds, kind) {
            Some(SymbolKind::Class)
        } else if kind_in(spec.interface_kinds, kind) {
            Some(SymbolKind::Interface)
        } else if kind_in(spec.type_kinds, kind) {
            Some(SymbolKind::Type)
        } else if kind_in(spec.variable_kinds, kind) {
            // module-level values only
            if self.container_depth == 0 && self.function_depth == 0 {
                Some(SymbolKind::Variable)
            } else {
                None
            }
        } else {
            None
        };

        if let Some(base_kind) = symbol_kind {
            for (name, name_node) in declared_names(node, self.source) {
                let kind = refine_kind(spec, base_kind, &name);
                let (exported, visibility) =
                    (spec.exported_visibility)(node, self.source, &name, self.export_depth > 0);
                self.out.push(SymbolCandidate {
                    signature: extract_signature(node, self.source),
                    summary: extract_summary(spec.id, node, self.source),
                    span: span_for_declaration(node, &name_node),
                    ast_fingerprint: fingerprint_node(node, self.source),
                    name,
                    kind,
                    exported,
                    visibility,
                });
            }
        }

        let is_container = spec.is_container(kind);
        let is_function = kind_in(spec.function_kinds, kind)
            || kind_in(spec.method_kinds, kind)
            || kind_in(spec.constructor_kinds, kind);
        let is_export = kind == "export_statement";

        if is_container {
            self.container_depth += 1;
        }
        if is_function {
            self.function_depth += 1;
        }
        if is_export {
            self.export_depth += 1;
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(&child);
        }

        if is_container {
            self.container_depth -= 1;
        }
        if is_function {
            self.function_depth -= 1;
        }
        if is_export {
            self.export_depth -= 1;
        }
    }
}

fn refine_kind(spec: &LanguageSpec, kind: SymbolKind, name: &str) -> SymbolKind {
    if kind == SymbolKind::Method && kind_in(spec.constructor_names, name) {
        SymbolKind::Constructor
    } else {
        kind
    }
}

/// `(name, node-carrying-the-name)` pairs a declaration introduces.
///
/// Most declarations carry a `name` field. Multi-declarator forms
/// (`lexical_declaration`, Go `type_declaration`/`var_declaration`) descend
/// one level to their spec/declarator children.
fn declared_names<'t>(node: &Node<'t>, source: &str) -> Vec<(String, Node<'t>)> {
    if let Some(name_node) = node.child_by_field_name("name") {
        let name = text(&name_node, source).to_string();
        if name.is_empty() {
            return Vec::new();
        }
        return vec![(name, *node)];
    }

    let mut found = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if let Some(name_node) = child.child_by_field_name("name") {
            let name = text(&name_node, source).to_string();
            if !name.is_empty() {
                found.push((name, child));
            }
        }
    }
    found
}

/// Span of the declaration; multi-declarator forms narrow to the declarator.
fn span_for_declaration(outer: &Node, inner: &Node) -> Span {
    if outer.id() == inner.id() {
        node_span(outer)
    } else {
        node_span(inner)
    }
}

fn extract_signature(node: &Node, source: &str) -> Signature {
    let params_node = node
        .child_by_field_name("parameters")
        .or_else(|| find_child_kind_contains(node, "parameter"));

    let mut params = Vec::new();
    if let Some(p) = params_node {
        let mut cursor = p.walk();
        for child in p.named_children(&mut cursor) {
            if !child.is_named() || child.kind() == "comment" {
                continue;
            }
            let name = param_name(&child, source);
            if name.is_empty() || name == "self" || name == "this" {
                continue;
            }
            let type_hint = child
                .child_by_field_name("type")
                .map(|t| text(&t, source).trim_start_matches(':').trim().to_string());
            params.push(Param { name, type_hint });
        }
    }

    let returns = node
        .child_by_field_name("return_type")
        .or_else(|| node.child_by_field_name("result"))
        .map(|r| {
            text(&r, source)
                .trim_start_matches("->")
                .trim_start_matches(':')
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty());

    let generics = node
        .child_by_field_name("type_parameters")
        .map(|g| text(&g, source).to_string());

    Signature {
        params,
        returns,
        generics,
    }
}

fn param_name(node: &Node, source: &str) -> String {
    if is_identifier_kind(node.kind()) {
        return text(node, source).to_string();
    }
    if let Some(name) = node.child_by_field_name("name") {
        return text(&name, source).to_string();
    }
    if let Some(pattern) = node.child_by_field_name("pattern") {
        return text(&pattern, source).to_string();
    }
    // first identifier-ish descendant, two levels deep
    for depth in [1usize, 2] {
        if let Some(found) = find_identifier(node, depth) {
            return text(&found, source).to_string();
        }
    }
    String::new()
}

fn is_identifier_kind(kind: &str) -> bool {
    matches!(
        kind,
        "identifier"
            | "type_identifier"
            | "field_identifier"
            | "simple_identifier"
            | "property_identifier"
            | "shorthand_property_identifier"
    )
}

fn find_identifier<'t>(node: &Node<'t>, depth: usize) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if is_identifier_kind(child.kind()) {
            return Some(child);
        }
        if depth > 1 {
            if let Some(found) = find_identifier(&child, depth - 1) {
                return Some(found);
            }
        }
    }
    None
}

fn find_child_kind_contains<'t>(node: &Node<'t>, fragment: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor)
        .find(|c| c.kind().contains(fragment));
    found
}

/// Python docstrings become card summaries; other languages carry none.
fn extract_summary(id: LanguageId, node: &Node, source: &str) -> Option<String> {
    if id != LanguageId::Python {
        return None;
    }
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string_node = first.named_child(0)?;
    if string_node.kind() != "string" {
        return None;
    }
    let raw = text(&string_node, source)
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();
    let first_line = raw.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return None;
    }
    Some(first_line.chars().take(SUMMARY_MAX_CHARS).collect())
}

// ═══════════════════════════════════════════════════════════════════════════
// Imports
// ═══════════════════════════════════════════════════════════════════════════

fn collect_imports(id: LanguageId, node: &Node, source: &str, out: &mut Vec<ImportCandidate>) {
    let spec = id.spec();
    let kind = node.kind();
    if kind_in(spec.import_kinds, kind) {
        match id {
            LanguageId::Python => python_import(node, source, out),
            LanguageId::TypeScript | LanguageId::Tsx => ts_import(node, source, out),
            LanguageId::Rust => rust_import(node, source, out),
            _ => path_import(node, source, out),
        }
        return;
    }
    // TS re-exports live on export_statement, outside import_kinds.
    if matches!(id, LanguageId::TypeScript | LanguageId::Tsx)
        && kind == "export_statement"
        && node.child_by_field_name("source").is_some()
    {
        ts_re_export(node, source, out);
        // fall through: exported declarations inside are handled elsewhere
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_imports(id, &child, source, out);
    }
}

fn python_import(node: &Node, source: &str, out: &mut Vec<ImportCandidate>) {
    let span = node_span(node);
    if node.kind() == "import_statement" {
        // `import a.b` binds `a`; `import a.b as c` binds `c`
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "dotted_name" => {
                    let dotted = text(&child, source);
                    let bound = dotted.split('.').next().unwrap_or(dotted);
                    out.push(ImportCandidate {
                        bound_name: bound.to_string(),
                        source: dotted.to_string(),
                        imported_name: None,
                        namespace: true,
                        re_export: false,
                        span,
                    });
                }
                "aliased_import" => {
                    let module = child
                        .child_by_field_name("name")
                        .map(|n| text(&n, source).to_string())
                        .unwrap_or_default();
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|n| text(&n, source).to_string())
                        .unwrap_or_default();
                    out.push(ImportCandidate {
                        bound_name: alias,
                        source: module,
                        imported_name: None,
                        namespace: true,
                        re_export: false,
                        span,
                    });
                }
                _ => {}
            }
        }
        return;
    }

    // from x import a, b as c
    let module = node
        .child_by_field_name("module_name")
        .map(|n| text(&n, source).to_string())
        .unwrap_or_default();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if Some(child) == node.child_by_field_name("module_name") {
            continue;
        }
        match child.kind() {
            "dotted_name" | "identifier" => {
                let name = text(&child, source).to_string();
                out.push(ImportCandidate {
                    bound_name: name.clone(),
                    source: module.clone(),
                    imported_name: Some(name),
                    namespace: false,
                    re_export: false,
                    span,
                });
            }
            "aliased_import" => {
                let name = child
                    .child_by_field_name("name")
                    .map(|n| text(&n, source).to_string())
                    .unwrap_or_default();
                let alias = child
                    .child_by_field_name("alias")
                    .map(|n| text(&n, source).to_string())
                    .unwrap_or_default();
                out.push(ImportCandidate {
                    bound_name: alias,
                    source: module.clone(),
                    imported_name: Some(name),
                    namespace: false,
                    re_export: false,
                    span,
                });
            }
            "wildcard_import" => {
                out.push(ImportCandidate {
                    bound_name: "*".to_string(),
                    source: module.clone(),
                    imported_name: None,
                    namespace: true,
                    re_export: false,
                    span,
                });
            }
            _ => {}
        }
    }
}

fn ts_import(node: &Node, source: &str, out: &mut Vec<ImportCandidate>) {
    let span = node_span(node);
    let module = node
        .child_by_field_name("source")
        .map(|n| text(&n, source).trim_matches(|c| c == '"' || c == '\'').to_string())
        .unwrap_or_default();

    let mut cursor = node.walk();
    for clause in node.named_children(&mut cursor) {
        if clause.kind() != "import_clause" {
            continue;
        }
        let mut inner = clause.walk();
        for item in clause.named_children(&mut inner) {
            match item.kind() {
                "identifier" => out.push(ImportCandidate {
                    bound_name: text(&item, source).to_string(),
                    source: module.clone(),
                    imported_name: Some("default".to_string()),
                    namespace: false,
                    re_export: false,
                    span,
                }),
                "namespace_import" => {
                    if let Some(alias) = find_identifier(&item, 1) {
                        out.push(ImportCandidate {
                            bound_name: text(&alias, source).to_string(),
                            source: module.clone(),
                            imported_name: None,
                            namespace: true,
                            re_export: false,
                            span,
                        });
                    }
                }
                "named_imports" => {
                    let mut specs = item.walk();
                    for spec in item.named_children(&mut specs) {
                        if spec.kind() != "import_specifier" {
                            continue;
                        }
                        let name = spec
                            .child_by_field_name("name")
                            .map(|n| text(&n, source).to_string())
                            .unwrap_or_default();
                        let alias = spec
                            .child_by_field_name("alias")
                            .map(|n| text(&n, source).to_string());
                        out.push(ImportCandidate {
                            bound_name: alias.unwrap_or_else(|| name.clone()),
                            source: module.clone(),
                            imported_name: Some(name),
                            namespace: false,
                            re_export: false,
                            span,
                        });
                    }
                }
                _ => {}
            }
        }
    }
}

fn ts_re_export(node: &Node, source: &str, out: &mut Vec<ImportCandidate>) {
    let span = node_span(node);
    let module = node
        .child_by_field_name("source")
        .map(|n| text(&n, source).trim_matches(|c| c == '"' || c == '\'').to_string())
        .unwrap_or_default();
    let mut cursor = node.walk();
    for clause in node.named_children(&mut cursor) {
        if clause.kind() != "export_clause" {
            continue;
        }
        let mut specs = clause.walk();
        for spec in clause.named_children(&mut specs) {
            if spec.kind() != "export_specifier" {
                continue;
            }
            let name = spec
                .child_by_field_name("name")
                .map(|n| text(&n, source).to_string())
                .unwrap_or_default();
            let alias = spec
                .child_by_field_name("alias")
                .map(|n| text(&n, source).to_string());
            out.push(ImportCandidate {
                bound_name: alias.unwrap_or_else(|| name.clone()),
                source: module.clone(),
                imported_name: Some(name),
                namespace: false,
                re_export: true,
                span,
            });
        }
    }
}

fn rust_import(node: &Node, source: &str, out: &mut Vec<ImportCandidate>) {
    let span = node_span(node);
    if let Some(arg) = node.child_by_field_name("argument") {
        rust_use_tree(&arg, source, "", span, out);
    }
}

fn rust_use_tree(
    node: &Node,
    source: &str,
    prefix: &str,
    span: Span,
    out: &mut Vec<ImportCandidate>,
) {
    let join = |prefix: &str, rest: &str| {
        if prefix.is_empty() {
            rest.to_string()
        } else {
            format!("{prefix}::{rest}")
        }
    };
    match node.kind() {
        "identifier" | "scoped_identifier" | "crate" | "self" | "super" => {
            let path = join(prefix, text(node, source));
            let bound = path.rsplit("::").next().unwrap_or(&path).to_string();
            out.push(ImportCandidate {
                bound_name: bound,
                source: path,
                imported_name: None,
                namespace: false,
                re_export: false,
                span,
            });
        }
        "use_as_clause" => {
            let path = node
                .child_by_field_name("path")
                .map(|n| join(prefix, text(&n, source)))
                .unwrap_or_default();
            let alias = node
                .child_by_field_name("alias")
                .map(|n| text(&n, source).to_string())
                .unwrap_or_default();
            let imported = path.rsplit("::").next().map(str::to_string);
            out.push(ImportCandidate {
                bound_name: alias,
                source: path,
                imported_name: imported,
                namespace: false,
                re_export: false,
                span,
            });
        }
        "scoped_use_list" => {
            let path = node
                .child_by_field_name("path")
                .map(|n| join(prefix, text(&n, source)))
                .unwrap_or_else(|| prefix.to_string());
            if let Some(list) = node.child_by_field_name("list") {
                let mut cursor = list.walk();
                for item in list.named_children(&mut cursor) {
                    rust_use_tree(&item, source, &path, span, out);
                }
            }
        }
        "use_list" => {
            let mut cursor = node.walk();
            for item in node.named_children(&mut cursor) {
                rust_use_tree(&item, source, prefix, span, out);
            }
        }
        // `use foo::*` binds the whole module
        "use_wildcard" => {
            let path = node
                .named_child(0)
                .map(|n| join(prefix, text(&n, source)))
                .unwrap_or_else(|| prefix.to_string());
            out.push(ImportCandidate {
                bound_name: "*".to_string(),
                source: path,
                imported_name: None,
                namespace: true,
                re_export: false,
                span,
            });
        }
        _ => {}
    }
}

/// Dotted-path imports (Java, Kotlin, Go): bind the last segment.
fn path_import(node: &Node, source: &str, out: &mut Vec<ImportCandidate>) {
    let span = node_span(node);
    // Go groups import_specs under one declaration.
    let mut specs = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "import_spec" => specs.push(child),
            "import_spec_list" => {
                let mut inner = child.walk();
                for spec in child.named_children(&mut inner) {
                    if spec.kind() == "import_spec" {
                        specs.push(spec);
                    }
                }
            }
            _ => {}
        }
    }

    if !specs.is_empty() {
        for spec in specs {
            let path = spec
                .child_by_field_name("path")
                .map(|n| text(&n, source).trim_matches('"').to_string())
                .unwrap_or_default();
            let bound = spec
                .child_by_field_name("name")
                .map(|n| text(&n, source).to_string())
                .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(&path).to_string());
            out.push(ImportCandidate {
                bound_name: bound,
                source: path,
                imported_name: None,
                namespace: true,
                re_export: false,
                span,
            });
        }
        return;
    }

    // Java / Kotlin dotted identifier
    let path_node = find_child_kind_contains(node, "identifier")
        .or_else(|| node.named_child(0));
    if let Some(path_node) = path_node {
        let path = text(&path_node, source).to_string();
        let namespace = text(node, source).contains('*');
        let bound = path.rsplit('.').next().unwrap_or(&path).to_string();
        out.push(ImportCandidate {
            bound_name: bound,
            source: path,
            imported_name: None,
            namespace,
            re_export: false,
            span,
        });
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Calls
// ═══════════════════════════════════════════════════════════════════════════

fn collect_calls(spec: &LanguageSpec, node: &Node, source: &str, out: &mut Vec<CallSite>) {
    if kind_in(spec.call_kinds, node.kind()) {
        if let Some(site) = call_site(spec, node, source) {
            out.push(site);
        }
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_calls(spec, &child, source, out);
    }
}

fn call_site(spec: &LanguageSpec, node: &Node, source: &str) -> Option<CallSite> {
    let span = node_span(node);

    // Constructor forms
    if node.kind() == "new_expression" || node.kind() == "object_creation_expression" {
        let callee_node = node
            .child_by_field_name("constructor")
            .or_else(|| node.child_by_field_name("type"))?;
        let callee = text(&callee_node, source).to_string();
        let name = callee
            .rsplit(spec.scope_separator)
            .next()
            .unwrap_or(&callee)
            .to_string();
        return Some(CallSite {
            callee_identifier: callee,
            receiver: None,
            callee_name: name,
            call_type: CallType::Constructor,
            span,
        });
    }

    // Java invocations carry object/name fields directly.
    if node.kind() == "method_invocation" {
        let name = node
            .child_by_field_name("name")
            .map(|n| text(&n, source).to_string())?;
        let receiver = node
            .child_by_field_name("object")
            .map(|n| text(&n, source).to_string());
        let callee = match &receiver {
            Some(obj) => format!("{obj}.{name}"),
            None => name.clone(),
        };
        let call_type = if receiver.is_some() {
            CallType::Method
        } else {
            CallType::Function
        };
        return Some(CallSite {
            callee_identifier: callee,
            receiver,
            callee_name: name,
            call_type,
            span,
        });
    }

    let func = node
        .child_by_field_name("function")
        .or_else(|| node.named_child(0))?;

    // Tagged templates: callee followed by a template literal argument.
    if let Some(args) = node.child_by_field_name("arguments") {
        if args.kind() == "template_string" {
            return Some(CallSite {
                callee_identifier: text(&func, source).to_string(),
                receiver: None,
                callee_name: text(&func, source).to_string(),
                call_type: CallType::TaggedTemplate,
                span,
            });
        }
    }

    match func.kind() {
        k if is_identifier_kind(k) => {
            let name = text(&func, source).to_string();
            Some(CallSite {
                callee_identifier: name.clone(),
                receiver: None,
                callee_name: name,
                call_type: CallType::Function,
                span,
            })
        }
        "attribute" | "member_expression" | "field_expression" | "selector_expression"
        | "navigation_expression" => {
            let (receiver, name) = split_member(&func, source, ".");
            let callee = text(&func, source).to_string();
            Some(CallSite {
                callee_identifier: callee,
                receiver,
                callee_name: name,
                call_type: CallType::Method,
                span,
            })
        }
        "scoped_identifier" => {
            let (receiver, name) = split_member(&func, source, "::");
            let callee = text(&func, source).to_string();
            Some(CallSite {
                callee_identifier: callee,
                receiver,
                callee_name: name,
                call_type: CallType::Function,
                span,
            })
        }
        "subscript" | "subscript_expression" | "index_expression" | "element_access_expression" => {
            Some(CallSite {
                callee_identifier: text(&func, source).to_string(),
                receiver: None,
                callee_name: String::new(),
                call_type: CallType::Computed,
                span,
            })
        }
        // calling the result of another expression
        _ => Some(CallSite {
            callee_identifier: text(&func, source).to_string(),
            receiver: None,
            callee_name: String::new(),
            call_type: CallType::Dynamic,
            span,
        }),
    }
}

/// `(receiver, final name)` of a member access node.
fn split_member(node: &Node, source: &str, sep: &str) -> (Option<String>, String) {
    let name = node
        .child_by_field_name("attribute")
        .or_else(|| node.child_by_field_name("property"))
        .or_else(|| node.child_by_field_name("field"))
        .or_else(|| node.child_by_field_name("name"))
        .map(|n| text(&n, source).to_string());
    let receiver = node
        .child_by_field_name("object")
        .or_else(|| node.child_by_field_name("value"))
        .or_else(|| node.child_by_field_name("operand"))
        .or_else(|| node.child_by_field_name("path"))
        .map(|n| text(&n, source).to_string());

    match (receiver, name) {
        (recv, Some(name)) => (recv, name),
        (recv, None) => {
            let full = text(node, source);
            let name = full.rsplit(sep).next().unwrap_or(full).to_string();
            let receiver = recv.or_else(|| {
                full.rfind(sep).map(|idx| full[..idx].to_string())
            });
            (receiver, name)
        }
    }
}
