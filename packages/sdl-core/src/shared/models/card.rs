//! Symbol cards — the compact symbol view shipped to clients

use serde::{Deserialize, Serialize};

use sdl_storage::{Symbol, SymbolKind};

use super::span::Span;

/// Flat token-cost constant added per card on top of signature and summary.
pub const CARD_BASE_TOKENS: u32 = 5;

/// Compact symbol description for slices, deltas and `symbol.get_card`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolCard {
    pub symbol_id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    /// Rendered one-line signature
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub range: Span,
    pub exported: bool,
    pub estimated_tokens: u32,
    /// Live AST fingerprint; doubles as the card's etag
    pub etag: String,
}

impl SymbolCard {
    pub fn from_symbol(symbol: &Symbol) -> Self {
        let signature = symbol.signature.render(&symbol.name);
        let estimated_tokens = estimate_tokens(&signature, symbol.summary.as_deref());
        Self {
            symbol_id: symbol.symbol_id.clone(),
            name: symbol.name.clone(),
            kind: symbol.kind,
            file_path: symbol.file_path.clone(),
            signature,
            summary: symbol.summary.clone(),
            range: Span::new(
                symbol.start_line,
                symbol.start_col,
                symbol.end_line,
                symbol.end_col,
            ),
            exported: symbol.exported,
            estimated_tokens,
            etag: symbol.ast_fingerprint.clone(),
        }
    }
}

/// `ceil(len/4)` per text field plus the flat base cost.
pub fn estimate_tokens(signature: &str, summary: Option<&str>) -> u32 {
    let sig = (signature.len() as u32 + 3) / 4;
    let sum = summary.map_or(0, |s| (s.len() as u32 + 3) / 4);
    sig + sum + CARD_BASE_TOKENS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("", None), CARD_BASE_TOKENS);
        // 8 chars -> 2 tokens, plus base
        assert_eq!(estimate_tokens("abcdefgh", None), 2 + CARD_BASE_TOKENS);
        // 9 chars round up to 3
        assert_eq!(estimate_tokens("abcdefghi", None), 3 + CARD_BASE_TOKENS);
        assert_eq!(
            estimate_tokens("abcd", Some("efgh")),
            1 + 1 + CARD_BASE_TOKENS
        );
    }
}
