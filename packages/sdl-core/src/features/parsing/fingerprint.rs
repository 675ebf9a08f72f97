//! Structural AST fingerprints
//!
//! A fingerprint hashes node kinds, nesting shape and leaf text of a parsed
//! subtree. Formatting-only edits (whitespace, comment churn) leave it
//! unchanged; renames and body edits change it.

use tree_sitter::Node;

/// Hex fingerprint of one subtree.
pub fn fingerprint_node(node: &Node, source: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hash_subtree(&mut hasher, node, source);
    let hash = hasher.finalize();
    hash.to_hex()[..32].to_string()
}

/// Hex fingerprint of file content (the per-file content hash).
pub fn fingerprint_content(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

fn hash_subtree(hasher: &mut blake3::Hasher, node: &Node, source: &str) {
    if node.is_extra() {
        // comments and the like
        return;
    }
    hasher.update(node.kind().as_bytes());
    hasher.update(b"(");
    let mut cursor = node.walk();
    let mut has_named_child = false;
    for child in node.named_children(&mut cursor) {
        has_named_child = true;
        hash_subtree(hasher, &child, source);
    }
    if !has_named_child {
        if let Ok(text) = node.utf8_text(source.as_bytes()) {
            hasher.update(text.as_bytes());
        }
    }
    hasher.update(b")");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn parse_python(source: &str) -> tree_sitter::Tree {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::language())
            .unwrap();
        parser.parse(source, None).unwrap()
    }

    #[test]
    fn test_formatting_invariant() {
        let a = parse_python("def foo(x):\n    return x + 1\n");
        let b = parse_python("def foo(x):\n    return x + 1\n\n\n");
        assert_eq!(
            fingerprint_node(&a.root_node(), "def foo(x):\n    return x + 1\n"),
            fingerprint_node(&b.root_node(), "def foo(x):\n    return x + 1\n\n\n"),
        );
    }

    #[test]
    fn test_body_edit_changes_fingerprint() {
        let src_a = "def foo(x):\n    return x + 1\n";
        let src_b = "def foo(x):\n    return x + 2\n";
        let a = parse_python(src_a);
        let b = parse_python(src_b);
        assert_ne!(
            fingerprint_node(&a.root_node(), src_a),
            fingerprint_node(&b.root_node(), src_b),
        );
    }

    #[test]
    fn test_rename_changes_fingerprint() {
        let src_a = "def foo(x):\n    return x\n";
        let src_b = "def bar(x):\n    return x\n";
        let a = parse_python(src_a);
        let b = parse_python(src_b);
        assert_ne!(
            fingerprint_node(&a.root_node(), src_a),
            fingerprint_node(&b.root_node(), src_b),
        );
    }

    #[test]
    fn test_content_fingerprint_is_hex() {
        let fp = fingerprint_content(b"hello");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
