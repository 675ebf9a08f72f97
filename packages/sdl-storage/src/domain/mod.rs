//! Domain layer for the symbol/edge ledger
//!
//! # Core Model
//!
//! The ledger is version-addressed: every row carries a
//! `[first_seen_version, last_seen_version)` observation window, and a row is
//! *live* at version `V` when `first_seen_version <= V` and
//! `last_seen_version` is either NULL or greater than `V`. Exactly one live
//! row may exist per `(repo_id, symbol_id)`.
//!
//! # Domain Models
//!
//! - `Repository`: registered repo identity and indexing limits
//! - `LedgerVersion`: immutable, per-repo monotonic snapshot id
//! - `FileRecord`: current per-file hash and language
//! - `Symbol`: one observation of a source symbol
//! - `Edge`: one observation of a call/import/re-export relation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository ID (opaque, unique)
    pub repo_id: String,
    /// Absolute root path on disk
    pub root_path: String,
    /// Language allow-list (language ids); empty means all supported
    #[serde(default)]
    pub languages: Vec<String>,
    /// Ignore globs applied while walking the tree
    #[serde(default)]
    pub ignore: Vec<String>,
    /// Per-file size cap in bytes
    pub max_file_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(repo_id: impl Into<String>, root_path: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            root_path: root_path.into(),
            languages: Vec::new(),
            ignore: Vec::new(),
            max_file_bytes: None,
            created_at: Utc::now(),
        }
    }
}

/// How a version came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    Initial,
    Incremental,
    Full,
}

impl VersionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionKind::Initial => "initial",
            VersionKind::Incremental => "incremental",
            VersionKind::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initial" => Some(VersionKind::Initial),
            "incremental" => Some(VersionKind::Incremental),
            "full" => Some(VersionKind::Full),
            _ => None,
        }
    }
}

/// Immutable ledger version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVersion {
    pub repo_id: String,
    /// Per-repo monotonic integer
    pub version: i64,
    pub parent_version: Option<i64>,
    pub kind: VersionKind,
    pub created_at: DateTime<Utc>,
}

/// Current state of an indexed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub repo_id: String,
    pub file_path: String,
    /// blake3 content hash
    pub content_hash: String,
    pub language: String,
    pub last_indexed_version: i64,
}

/// Symbol kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Type,
    Constructor,
    Variable,
    Module,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Type => "type",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Variable => "variable",
            SymbolKind::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(SymbolKind::Function),
            "method" => Some(SymbolKind::Method),
            "class" => Some(SymbolKind::Class),
            "interface" => Some(SymbolKind::Interface),
            "type" => Some(SymbolKind::Type),
            "constructor" => Some(SymbolKind::Constructor),
            "variable" => Some(SymbolKind::Variable),
            "module" => Some(SymbolKind::Module),
            _ => None,
        }
    }
}

/// Symbol visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
    Protected,
    Internal,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Protected => "protected",
            Visibility::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "private" => Some(Visibility::Private),
            "protected" => Some(Visibility::Protected),
            "internal" => Some(Visibility::Internal),
            _ => None,
        }
    }
}

/// One signature parameter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
}

/// Ordered parameter list plus optional return type / generics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generics: Option<String>,
}

impl Signature {
    /// Compact single-line rendering used by cards and skeletons.
    pub fn render(&self, name: &str) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| match &p.type_hint {
                Some(t) => format!("{}: {}", p.name, t),
                None => p.name.clone(),
            })
            .collect();
        let generics = self.generics.as_deref().unwrap_or("");
        match &self.returns {
            Some(r) => format!("{}{}({}) -> {}", name, generics, params.join(", "), r),
            None => format!("{}{}({})", name, generics, params.join(", ")),
        }
    }
}

/// One observation of a symbol
///
/// Identity (`symbol_id`) is derived from `(repo, file, name, kind,
/// positional discriminator)`; a symbol whose identity tuple changes is a new
/// symbol. `last_seen_version = None` marks the live observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub symbol_id: String,
    pub repo_id: String,
    pub file_path: String,
    pub name: String,
    pub kind: SymbolKind,
    pub exported: bool,
    pub visibility: Visibility,
    pub signature: Signature,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// 1-indexed lines, 0-indexed columns, end-exclusive columns
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    /// Structural hash of the parsed subtree
    pub ast_fingerprint: String,
    pub first_seen_version: i64,
    pub last_seen_version: Option<i64>,
}

impl Symbol {
    pub fn is_live(&self) -> bool {
        self.last_seen_version.is_none()
    }

    /// Live at `version` under the observation-window rule.
    pub fn live_at(&self, version: i64) -> bool {
        self.first_seen_version <= version
            && self.last_seen_version.map_or(true, |v| v > version)
    }

    pub fn contains_position(&self, line: u32, col: u32) -> bool {
        if line < self.start_line || line > self.end_line {
            return false;
        }
        if line == self.start_line && col < self.start_col {
            return false;
        }
        if line == self.end_line && col >= self.end_col {
            return false;
        }
        true
    }

    /// Range-size key used for smallest-enclosing-symbol selection.
    pub fn range_weight(&self) -> u64 {
        let lines = (self.end_line - self.start_line) as u64;
        let cols = self.end_col.saturating_sub(self.start_col) as u64;
        lines * 1000 + cols
    }
}

/// Edge kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeKind {
    Call,
    Import,
    ReExport,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Call => "call",
            EdgeKind::Import => "import",
            EdgeKind::ReExport => "reExport",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(EdgeKind::Call),
            "import" => Some(EdgeKind::Import),
            "reExport" => Some(EdgeKind::ReExport),
            _ => None,
        }
    }
}

/// How a callee identifier was bound to a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Exact,
    Heuristic,
    Unresolved,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Exact => "exact",
            ResolutionStrategy::Heuristic => "heuristic",
            ResolutionStrategy::Unresolved => "unresolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(ResolutionStrategy::Exact),
            "heuristic" => Some(ResolutionStrategy::Heuristic),
            "unresolved" => Some(ResolutionStrategy::Unresolved),
            _ => None,
        }
    }
}

/// One observation of a graph edge
///
/// Unresolved edges carry `to_symbol_id = None` plus the raw
/// `callee_identifier`. Resolution upgrades keep the identity key but retire
/// the old observation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub repo_id: String,
    pub from_symbol_id: String,
    pub to_symbol_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callee_identifier: Option<String>,
    pub kind: EdgeKind,
    /// [0, 1]
    pub weight: f64,
    /// [0, 1]
    pub confidence: f64,
    pub resolution: ResolutionStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
    pub first_seen_version: i64,
    pub last_seen_version: Option<i64>,
}

impl Edge {
    /// Stable identity of the relation, independent of resolution state.
    ///
    /// Uses the callee identifier when present so that an unresolved edge and
    /// its later resolved upgrade collapse to the same key.
    pub fn identity_key(&self) -> String {
        let target = self
            .callee_identifier
            .as_deref()
            .or(self.to_symbol_id.as_deref())
            .unwrap_or("");
        format!("{}|{}|{}", self.kind.as_str(), self.from_symbol_id, target)
    }

    pub fn is_live(&self) -> bool {
        self.last_seen_version.is_none()
    }

    pub fn live_at(&self, version: i64) -> bool {
        self.first_seen_version <= version
            && self.last_seen_version.map_or(true, |v| v > version)
    }
}

/// Search hit returned by `search_symbols`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolHit {
    pub symbol_id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    /// 1.0 exact name match, 0.5 substring
    pub score: f64,
}

/// Aggregate counts for `repo.status`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCounts {
    pub file_count: u64,
    pub symbol_count: u64,
    pub edge_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(start: (u32, u32), end: (u32, u32)) -> Symbol {
        Symbol {
            symbol_id: "sym:a".into(),
            repo_id: "r".into(),
            file_path: "a.rs".into(),
            name: "a".into(),
            kind: SymbolKind::Function,
            exported: false,
            visibility: Visibility::Private,
            signature: Signature::default(),
            summary: None,
            start_line: start.0,
            start_col: start.1,
            end_line: end.0,
            end_col: end.1,
            ast_fingerprint: "fp".into(),
            first_seen_version: 1,
            last_seen_version: None,
        }
    }

    #[test]
    fn test_live_window() {
        let mut s = symbol((1, 0), (3, 0));
        assert!(s.live_at(1));
        assert!(s.live_at(99));

        s.last_seen_version = Some(4);
        assert!(s.live_at(3));
        assert!(!s.live_at(4));
        assert!(!s.live_at(5));
    }

    #[test]
    fn test_contains_position_end_exclusive() {
        let s = symbol((2, 4), (2, 10));
        assert!(s.contains_position(2, 4));
        assert!(s.contains_position(2, 9));
        assert!(!s.contains_position(2, 10));
        assert!(!s.contains_position(1, 5));
        assert!(!s.contains_position(3, 0));
    }

    #[test]
    fn test_range_weight_prefers_narrow_spans() {
        let wide = symbol((1, 0), (10, 0));
        let narrow = symbol((3, 0), (4, 20));
        assert!(narrow.range_weight() < wide.range_weight());
    }

    #[test]
    fn test_signature_render() {
        let sig = Signature {
            params: vec![
                Param {
                    name: "x".into(),
                    type_hint: Some("u32".into()),
                },
                Param {
                    name: "y".into(),
                    type_hint: None,
                },
            ],
            returns: Some("bool".into()),
            generics: None,
        };
        assert_eq!(sig.render("check"), "check(x: u32, y) -> bool");
    }

    #[test]
    fn test_edge_identity_stable_across_resolution() {
        let unresolved = Edge {
            repo_id: "r".into(),
            from_symbol_id: "sym:a".into(),
            to_symbol_id: None,
            callee_identifier: Some("foo".into()),
            kind: EdgeKind::Call,
            weight: 1.0,
            confidence: 0.2,
            resolution: ResolutionStrategy::Unresolved,
            candidate_count: None,
            first_seen_version: 1,
            last_seen_version: None,
        };
        let resolved = Edge {
            to_symbol_id: Some("sym:foo".into()),
            confidence: 0.9,
            resolution: ResolutionStrategy::Exact,
            ..unresolved.clone()
        };
        assert_eq!(unresolved.identity_key(), resolved.identity_key());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            SymbolKind::Function,
            SymbolKind::Method,
            SymbolKind::Class,
            SymbolKind::Interface,
            SymbolKind::Type,
            SymbolKind::Constructor,
            SymbolKind::Variable,
            SymbolKind::Module,
        ] {
            assert_eq!(SymbolKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SymbolKind::parse("enum"), None);
    }
}
