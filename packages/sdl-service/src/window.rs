//! Policy-gated code windows
//!
//! Raw source is never persisted in the ledger; an approved window reads the
//! file from disk at request time using the symbol's recorded range. The
//! hotpath view is the downgraded form: only the lines matching the caller's
//! identifiers, with a little context.

use std::path::Path;

use serde::{Deserialize, Serialize};

use sdl_storage::{Repository, Symbol};

use crate::error::{Result, ServiceError};

/// Context lines kept around identifier hits in hotpath views.
const HOTPATH_CONTEXT: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeWindow {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub truncated: bool,
}

fn read_symbol_lines(repo: &Repository, symbol: &Symbol) -> Result<Vec<String>> {
    let abs = Path::new(&repo.root_path).join(&symbol.file_path);
    let content = std::fs::read_to_string(&abs).map_err(|err| {
        ServiceError::InvalidQuery(format!(
            "source for {} unavailable: {err}",
            symbol.file_path
        ))
    })?;
    Ok(content.lines().map(String::from).collect())
}

/// Full window over the symbol's range, capped at `max_lines`.
pub fn extract_window(repo: &Repository, symbol: &Symbol, max_lines: u32) -> Result<CodeWindow> {
    let lines = read_symbol_lines(repo, symbol)?;
    let start = symbol.start_line.max(1) as usize;
    let end = (symbol.end_line as usize).min(lines.len());
    if start > lines.len() {
        return Err(ServiceError::StaleVersion(format!(
            "recorded range of {} is beyond the current file",
            symbol.symbol_id
        )));
    }

    let wanted = end + 1 - start;
    let kept = wanted.min(max_lines as usize);
    let window: Vec<&str> = lines[start - 1..start - 1 + kept]
        .iter()
        .map(String::as_str)
        .collect();

    Ok(CodeWindow {
        file_path: symbol.file_path.clone(),
        start_line: start as u32,
        end_line: (start + kept - 1) as u32,
        content: window.join("\n"),
        truncated: kept < wanted,
    })
}

/// Hotpath view: lines inside the symbol range that mention any requested
/// identifier, each with `HOTPATH_CONTEXT` lines of context; gaps elide.
pub fn extract_hotpath(
    repo: &Repository,
    symbol: &Symbol,
    identifiers: &[String],
    max_lines: u32,
) -> Result<CodeWindow> {
    let lines = read_symbol_lines(repo, symbol)?;
    let start = symbol.start_line.max(1) as usize;
    let end = (symbol.end_line as usize).min(lines.len());
    if start > lines.len() || identifiers.is_empty() {
        return Err(ServiceError::InvalidQuery(
            "hotpath view needs identifiersToFind and a valid range".into(),
        ));
    }

    let mut keep = vec![false; end + 1 - start];
    for (offset, line) in lines[start - 1..end].iter().enumerate() {
        if identifiers.iter().any(|ident| line.contains(ident.as_str())) {
            let lo = offset.saturating_sub(HOTPATH_CONTEXT as usize);
            let hi = (offset + HOTPATH_CONTEXT as usize).min(keep.len() - 1);
            for slot in &mut keep[lo..=hi] {
                *slot = true;
            }
        }
    }

    let mut rendered: Vec<String> = Vec::new();
    let mut kept = 0u32;
    let mut truncated = false;
    let mut in_gap = false;
    for (offset, flag) in keep.iter().enumerate() {
        if !flag {
            if !in_gap && !rendered.is_empty() {
                rendered.push("  …".to_string());
            }
            in_gap = true;
            continue;
        }
        if kept >= max_lines {
            truncated = true;
            break;
        }
        in_gap = false;
        let line_no = start + offset;
        rendered.push(format!("{line_no:>5}  {}", lines[line_no - 1]));
        kept += 1;
    }

    if kept == 0 {
        rendered.push(format!(
            "// no lines in {} match the requested identifiers",
            symbol.file_path
        ));
    }

    Ok(CodeWindow {
        file_path: symbol.file_path.clone(),
        start_line: start as u32,
        end_line: end as u32,
        content: rendered.join("\n"),
        truncated,
    })
}
