//! Parsing: the per-language AST adapter layer

pub mod adapter;
pub mod fingerprint;
pub mod language;
pub mod tree_sitter;

pub use self::adapter::{
    find_enclosing_symbol, AdapterRegistry, AdapterResolveCtx, CallResolution, LanguageAdapter,
    ParsedTree, GLOBAL_SCOPE,
};
pub use self::fingerprint::{fingerprint_content, fingerprint_node};
pub use self::language::{LanguageId, LanguageSpec};
pub use self::tree_sitter::{TreeSitterAdapter, PARSE_BUFFER_BYTES};
