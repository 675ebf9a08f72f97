//! Skeleton rendering
//!
//! A skeleton is the signatures-only view of a file or symbol: declaration
//! lines with nesting, no bodies. It is the downgraded response when policy
//! refuses a raw code window, so it must be derivable from the ledger alone
//! (no source reads).

use serde::{Deserialize, Serialize};

use sdl_storage::{Symbol, SymbolKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    pub skeleton_text: String,
    /// blake3 of the rendered text
    pub ir_hash: String,
}

/// Render the skeleton of a whole file from its live symbols.
pub fn render_file(file_path: &str, symbols: &[Symbol]) -> Skeleton {
    let mut ordered: Vec<&Symbol> = symbols
        .iter()
        .filter(|s| s.kind != SymbolKind::Module)
        .collect();
    ordered.sort_by_key(|s| (s.start_line, s.start_col));

    let mut lines = vec![format!("// {file_path}")];
    for symbol in &ordered {
        let nested = ordered.iter().any(|outer| {
            outer.symbol_id != symbol.symbol_id
                && outer.start_line <= symbol.start_line
                && symbol.end_line <= outer.end_line
        });
        lines.push(render_line(symbol, if nested { 1 } else { 0 }));
    }
    finish(lines)
}

/// Render a single symbol (with any members its range encloses).
pub fn render_symbol(symbol: &Symbol, file_symbols: &[Symbol]) -> Skeleton {
    let mut lines = vec![format!("// {}:{}", symbol.file_path, symbol.start_line)];
    lines.push(render_line(symbol, 0));
    let mut members: Vec<&Symbol> = file_symbols
        .iter()
        .filter(|s| {
            s.symbol_id != symbol.symbol_id
                && s.kind != SymbolKind::Module
                && symbol.start_line <= s.start_line
                && s.end_line <= symbol.end_line
        })
        .collect();
    members.sort_by_key(|s| (s.start_line, s.start_col));
    for member in members {
        lines.push(render_line(member, 1));
    }
    finish(lines)
}

fn render_line(symbol: &Symbol, depth: usize) -> String {
    let indent = "  ".repeat(depth);
    let rendered = match symbol.kind {
        SymbolKind::Class | SymbolKind::Interface | SymbolKind::Type | SymbolKind::Module => {
            format!("{} {}", symbol.kind.as_str(), symbol.name)
        }
        SymbolKind::Variable => symbol.name.clone(),
        _ => symbol.signature.render(&symbol.name),
    };
    let line = format!("{indent}{} [{}:{}]", rendered, symbol.start_line, symbol.end_line);
    match &symbol.summary {
        Some(summary) => format!("{line} // {summary}"),
        None => line,
    }
}

fn finish(lines: Vec<String>) -> Skeleton {
    let skeleton_text = lines.join("\n");
    let ir_hash = blake3::hash(skeleton_text.as_bytes()).to_hex().to_string();
    Skeleton {
        skeleton_text,
        ir_hash,
    }
}
