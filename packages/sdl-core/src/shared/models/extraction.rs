//! Extraction outputs produced by language adapters
//!
//! Adapters emit *candidates*: positional, per-file records with no ledger
//! identity. The indexing pipeline canonicalizes candidate ids (the store is
//! authoritative) and the resolver binds call sites to symbols.

use serde::{Deserialize, Serialize};

use sdl_storage::{Signature, SymbolKind, Visibility};

use super::span::Span;

/// Candidate symbol extracted from one file
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolCandidate {
    pub name: String,
    pub kind: SymbolKind,
    pub exported: bool,
    pub visibility: Visibility,
    pub signature: Signature,
    pub summary: Option<String>,
    pub span: Span,
    /// Structural hash of the parsed subtree
    pub ast_fingerprint: String,
}

/// Candidate import binding
#[derive(Debug, Clone, PartialEq)]
pub struct ImportCandidate {
    /// Name the import binds locally
    pub bound_name: String,
    /// Module specifier as written (`./a`, `pkg.mod`, `std::fmt`)
    pub source: String,
    /// Original exported name, when it differs or is explicit; `None` for
    /// namespace and default imports
    pub imported_name: Option<String>,
    /// Whole-module binding (`import os.path as p`, `import * as ns`)
    pub namespace: bool,
    /// Re-exported from this module
    pub re_export: bool,
    pub span: Span,
}

/// Call classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallType {
    Function,
    Method,
    Constructor,
    Dynamic,
    Computed,
    TaggedTemplate,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Function => "function",
            CallType::Method => "method",
            CallType::Constructor => "constructor",
            CallType::Dynamic => "dynamic",
            CallType::Computed => "computed",
            CallType::TaggedTemplate => "tagged-template",
        }
    }
}

/// One call site
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    /// Callee as written: `foo`, `self.close`, `Type::new`, `obj.send`
    pub callee_identifier: String,
    /// Receiver text left of the last separator, when present
    pub receiver: Option<String>,
    /// Final name segment of the callee
    pub callee_name: String,
    pub call_type: CallType,
    pub span: Span,
}

/// Everything one adapter pass produced for one file
#[derive(Debug, Clone, Default)]
pub struct FileExtraction {
    pub file_path: String,
    pub language: String,
    /// Index 0 is always the synthetic module-scope symbol
    pub symbols: Vec<SymbolCandidate>,
    pub imports: Vec<ImportCandidate>,
    pub calls: Vec<CallSite>,
    /// Count of error/missing nodes observed while extracting; non-zero
    /// means a degraded (but usable) extraction
    pub parse_errors: usize,
}

impl FileExtraction {
    pub fn is_partial(&self) -> bool {
        self.parse_errors > 0
    }
}
