//! Language registry
//!
//! One `LanguageSpec` row per supported language: the tree-sitter grammar,
//! the node-kind tables the generic extractor walks, and the
//! export/visibility convention. Adding a language means adding a row.

use sdl_storage::Visibility;
use tree_sitter::{Language, Node};

/// Supported languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageId {
    Python,
    TypeScript,
    Tsx,
    Java,
    Kotlin,
    Rust,
    Go,
}

impl LanguageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageId::Python => "python",
            LanguageId::TypeScript => "typescript",
            LanguageId::Tsx => "tsx",
            LanguageId::Java => "java",
            LanguageId::Kotlin => "kotlin",
            LanguageId::Rust => "rust",
            LanguageId::Go => "go",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "python" => Some(LanguageId::Python),
            "typescript" | "javascript" => Some(LanguageId::TypeScript),
            "tsx" => Some(LanguageId::Tsx),
            "java" => Some(LanguageId::Java),
            "kotlin" => Some(LanguageId::Kotlin),
            "rust" => Some(LanguageId::Rust),
            "go" => Some(LanguageId::Go),
            _ => None,
        }
    }

    /// The tree-sitter grammar for this language.
    pub fn grammar(&self) -> Language {
        match self {
            LanguageId::Python => tree_sitter_python::language(),
            LanguageId::TypeScript => tree_sitter_typescript::language_typescript(),
            LanguageId::Tsx => tree_sitter_typescript::language_tsx(),
            LanguageId::Java => tree_sitter_java::language(),
            LanguageId::Kotlin => tree_sitter_kotlin::language(),
            LanguageId::Rust => tree_sitter_rust::language(),
            LanguageId::Go => tree_sitter_go::language(),
        }
    }

    /// Whether the grammar links and loads into a fresh parser; used by the
    /// environment doctor.
    pub fn grammar_loads(&self) -> bool {
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&self.grammar()).is_ok()
    }

    pub fn spec(&self) -> &'static LanguageSpec {
        match self {
            LanguageId::Python => &PYTHON,
            LanguageId::TypeScript => &TYPESCRIPT,
            LanguageId::Tsx => &TSX,
            LanguageId::Java => &JAVA,
            LanguageId::Kotlin => &KOTLIN,
            LanguageId::Rust => &RUST,
            LanguageId::Go => &GO,
        }
    }

    pub fn all() -> &'static [LanguageId] {
        &[
            LanguageId::Python,
            LanguageId::TypeScript,
            LanguageId::Tsx,
            LanguageId::Java,
            LanguageId::Kotlin,
            LanguageId::Rust,
            LanguageId::Go,
        ]
    }

    pub fn for_extension(ext: &str) -> Option<Self> {
        LanguageId::all()
            .iter()
            .copied()
            .find(|id| id.spec().extensions.iter().any(|e| *e == ext))
    }
}

/// Export flag + visibility for a definition node.
type ExportedVisibilityFn = fn(&Node, &str, &str, bool) -> (bool, Visibility);

/// Static description of how one grammar maps onto the uniform extraction
/// contract.
pub struct LanguageSpec {
    pub id: LanguageId,
    pub extensions: &'static [&'static str],
    /// Definitions mapped to `function` (or `method` inside a container)
    pub function_kinds: &'static [&'static str],
    /// Definitions always mapped to `method`
    pub method_kinds: &'static [&'static str],
    /// Definitions always mapped to `constructor`
    pub constructor_kinds: &'static [&'static str],
    /// Class-like definitions (emitted and treated as containers)
    pub class_kinds: &'static [&'static str],
    /// Containers that scope members but emit no symbol themselves
    pub container_only_kinds: &'static [&'static str],
    pub interface_kinds: &'static [&'static str],
    pub type_kinds: &'static [&'static str],
    /// Module-level value definitions mapped to `variable`
    pub variable_kinds: &'static [&'static str],
    pub import_kinds: &'static [&'static str],
    pub call_kinds: &'static [&'static str],
    /// Names that mark a method as the type's constructor
    pub constructor_names: &'static [&'static str],
    pub scope_separator: &'static str,
    pub exported_visibility: ExportedVisibilityFn,
}

/// Membership test that works for any borrowed kind string.
pub fn kind_in(list: &[&str], kind: &str) -> bool {
    list.iter().any(|k| *k == kind)
}

impl LanguageSpec {
    pub fn is_container(&self, kind: &str) -> bool {
        kind_in(self.class_kinds, kind)
            || kind_in(self.container_only_kinds, kind)
            || kind_in(self.interface_kinds, kind)
    }
}

fn modifiers_text(node: &Node, source: &str) -> String {
    let mut text = String::new();
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.kind().contains("modifier") || child.kind() == "visibility_modifier" {
                if let Ok(t) = child.utf8_text(source.as_bytes()) {
                    text.push_str(t);
                    text.push(' ');
                }
            }
        }
    }
    text
}

fn python_visibility(_node: &Node, _source: &str, name: &str, _export_ancestor: bool) -> (bool, Visibility) {
    if name.starts_with('_') {
        (false, Visibility::Private)
    } else {
        (true, Visibility::Public)
    }
}

fn ts_visibility(node: &Node, source: &str, _name: &str, export_ancestor: bool) -> (bool, Visibility) {
    let modifiers = modifiers_text(node, source);
    let visibility = if modifiers.contains("private") {
        Visibility::Private
    } else if modifiers.contains("protected") {
        Visibility::Protected
    } else {
        Visibility::Public
    };
    (export_ancestor, visibility)
}

fn java_visibility(node: &Node, source: &str, _name: &str, _export_ancestor: bool) -> (bool, Visibility) {
    let modifiers = modifiers_text(node, source);
    if modifiers.contains("private") {
        (false, Visibility::Private)
    } else if modifiers.contains("protected") {
        (false, Visibility::Protected)
    } else if modifiers.contains("public") {
        (true, Visibility::Public)
    } else {
        (false, Visibility::Internal)
    }
}

fn kotlin_visibility(node: &Node, source: &str, _name: &str, _export_ancestor: bool) -> (bool, Visibility) {
    let modifiers = modifiers_text(node, source);
    if modifiers.contains("private") {
        (false, Visibility::Private)
    } else if modifiers.contains("protected") {
        (false, Visibility::Protected)
    } else if modifiers.contains("internal") {
        (false, Visibility::Internal)
    } else {
        (true, Visibility::Public)
    }
}

fn rust_visibility(node: &Node, source: &str, _name: &str, _export_ancestor: bool) -> (bool, Visibility) {
    let mut is_pub = false;
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.kind() == "visibility_modifier" {
                let text = child.utf8_text(source.as_bytes()).unwrap_or("");
                is_pub = text.starts_with("pub");
                if text.contains("crate") || text.contains("super") {
                    return (false, Visibility::Internal);
                }
            }
        }
    }
    if is_pub {
        (true, Visibility::Public)
    } else {
        (false, Visibility::Private)
    }
}

fn go_visibility(_node: &Node, _source: &str, name: &str, _export_ancestor: bool) -> (bool, Visibility) {
    let exported = name.chars().next().map_or(false, |c| c.is_uppercase());
    if exported {
        (true, Visibility::Public)
    } else {
        (false, Visibility::Private)
    }
}

pub static PYTHON: LanguageSpec = LanguageSpec {
    id: LanguageId::Python,
    extensions: &["py", "pyi"],
    function_kinds: &["function_definition"],
    method_kinds: &[],
    constructor_kinds: &[],
    class_kinds: &["class_definition"],
    container_only_kinds: &[],
    interface_kinds: &[],
    type_kinds: &[],
    variable_kinds: &[],
    import_kinds: &["import_statement", "import_from_statement"],
    call_kinds: &["call"],
    constructor_names: &["__init__"],
    scope_separator: ".",
    exported_visibility: python_visibility,
};

pub static TYPESCRIPT: LanguageSpec = LanguageSpec {
    id: LanguageId::TypeScript,
    extensions: &["ts", "mts", "cts", "js", "mjs", "cjs"],
    function_kinds: &["function_declaration", "generator_function_declaration"],
    method_kinds: &["method_definition"],
    constructor_kinds: &[],
    class_kinds: &["class_declaration"],
    container_only_kinds: &[],
    interface_kinds: &["interface_declaration"],
    type_kinds: &["type_alias_declaration", "enum_declaration"],
    variable_kinds: &["lexical_declaration", "variable_declaration"],
    import_kinds: &["import_statement"],
    call_kinds: &["call_expression", "new_expression"],
    constructor_names: &["constructor"],
    scope_separator: ".",
    exported_visibility: ts_visibility,
};

pub static TSX: LanguageSpec = LanguageSpec {
    id: LanguageId::Tsx,
    extensions: &["tsx", "jsx"],
    function_kinds: &["function_declaration", "generator_function_declaration"],
    method_kinds: &["method_definition"],
    constructor_kinds: &[],
    class_kinds: &["class_declaration"],
    container_only_kinds: &[],
    interface_kinds: &["interface_declaration"],
    type_kinds: &["type_alias_declaration", "enum_declaration"],
    variable_kinds: &["lexical_declaration", "variable_declaration"],
    import_kinds: &["import_statement"],
    call_kinds: &["call_expression", "new_expression"],
    constructor_names: &["constructor"],
    scope_separator: ".",
    exported_visibility: ts_visibility,
};

pub static JAVA: LanguageSpec = LanguageSpec {
    id: LanguageId::Java,
    extensions: &["java"],
    function_kinds: &[],
    method_kinds: &["method_declaration"],
    constructor_kinds: &["constructor_declaration"],
    class_kinds: &["class_declaration", "enum_declaration", "record_declaration"],
    container_only_kinds: &[],
    interface_kinds: &["interface_declaration"],
    type_kinds: &[],
    variable_kinds: &[],
    import_kinds: &["import_declaration"],
    call_kinds: &["method_invocation", "object_creation_expression"],
    constructor_names: &[],
    scope_separator: ".",
    exported_visibility: java_visibility,
};

pub static KOTLIN: LanguageSpec = LanguageSpec {
    id: LanguageId::Kotlin,
    extensions: &["kt", "kts"],
    function_kinds: &["function_declaration"],
    method_kinds: &[],
    constructor_kinds: &["secondary_constructor"],
    class_kinds: &["class_declaration", "object_declaration"],
    container_only_kinds: &[],
    interface_kinds: &[],
    type_kinds: &["type_alias"],
    variable_kinds: &["property_declaration"],
    import_kinds: &["import_header"],
    call_kinds: &["call_expression"],
    constructor_names: &[],
    scope_separator: ".",
    exported_visibility: kotlin_visibility,
};

pub static RUST: LanguageSpec = LanguageSpec {
    id: LanguageId::Rust,
    extensions: &["rs"],
    function_kinds: &["function_item"],
    method_kinds: &[],
    constructor_kinds: &[],
    class_kinds: &["struct_item", "enum_item", "union_item"],
    container_only_kinds: &["impl_item"],
    interface_kinds: &["trait_item"],
    type_kinds: &["type_item"],
    variable_kinds: &["const_item", "static_item"],
    import_kinds: &["use_declaration"],
    call_kinds: &["call_expression"],
    constructor_names: &["new"],
    scope_separator: "::",
    exported_visibility: rust_visibility,
};

pub static GO: LanguageSpec = LanguageSpec {
    id: LanguageId::Go,
    extensions: &["go"],
    function_kinds: &["function_declaration"],
    method_kinds: &["method_declaration"],
    constructor_kinds: &[],
    class_kinds: &[],
    container_only_kinds: &[],
    interface_kinds: &[],
    type_kinds: &["type_declaration"],
    variable_kinds: &["const_declaration", "var_declaration"],
    import_kinds: &["import_declaration"],
    call_kinds: &["call_expression"],
    constructor_names: &[],
    scope_separator: ".",
    exported_visibility: go_visibility,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_lookup() {
        assert_eq!(LanguageId::for_extension("py"), Some(LanguageId::Python));
        assert_eq!(LanguageId::for_extension("ts"), Some(LanguageId::TypeScript));
        assert_eq!(LanguageId::for_extension("tsx"), Some(LanguageId::Tsx));
        assert_eq!(LanguageId::for_extension("rs"), Some(LanguageId::Rust));
        assert_eq!(LanguageId::for_extension("cbl"), None);
    }

    #[test]
    fn test_id_round_trip() {
        for id in LanguageId::all() {
            assert_eq!(LanguageId::parse(id.as_str()), Some(*id));
        }
        // javascript aliases to the typescript grammar
        assert_eq!(LanguageId::parse("javascript"), Some(LanguageId::TypeScript));
    }

    #[test]
    fn test_rust_containers() {
        let spec = LanguageId::Rust.spec();
        assert!(spec.is_container("impl_item"));
        assert!(spec.is_container("struct_item"));
        assert!(!spec.is_container("function_item"));
    }
}
