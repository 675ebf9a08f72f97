//! Slice engine
//!
//! Builds a bounded subgraph ("slice") answering a task query: seed symbols
//! from explicit entries, edited files, stack-trace locations and task-text
//! keywords, expand bidirectionally with per-hop decay, and cut at the
//! card/token budget. Identical inputs against an identical ledger version
//! produce byte-identical output; ties break on symbol id.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sdl_storage::{Edge, SqliteLedgerStore, Symbol};

use crate::features::cache::EstimateSize;
use crate::shared::models::{CoreError, Result, SymbolCard};

/// Per-hop priority decay during BFS expansion.
const HOP_DECAY: f64 = 0.7;

/// Deterministic bound on traversal work: builds that visit this many
/// candidates return what they have, marked truncated. A wall-clock cap
/// would make output depend on load and break repeatable slices.
const EXPANSION_CAP: usize = 10_000;

/// Slice handle lease.
pub const LEASE_DURATION: Duration = Duration::from_secs(5 * 60);

/// Frontier entries reported past the budget cut.
const FRONTIER_LIMIT: usize = 20;

// Seed priorities, highest first.
const PRIO_ENTRY: f64 = 1.0;
const PRIO_EDITED_FILE: f64 = 0.9;
const PRIO_STACK_TRACE: f64 = 0.85;
const KEYWORD_SCALE: f64 = 0.8;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceBudget {
    pub max_cards: usize,
    pub max_estimated_tokens: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceInput {
    pub repo_id: String,
    #[serde(default)]
    pub task_text: String,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub failing_test_path: Option<String>,
    #[serde(default)]
    pub edited_files: Vec<String>,
    #[serde(default)]
    pub entry_symbols: Vec<String>,
    pub budget: SliceBudget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceEdge {
    pub from_symbol_id: String,
    pub to_symbol_id: String,
    pub kind: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub symbol_id: String,
    pub priority: f64,
    pub why: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceResult {
    pub slice_handle: String,
    pub ledger_version: i64,
    pub cards: Vec<SymbolCard>,
    pub edges: Vec<SliceEdge>,
    pub frontier: Vec<FrontierEntry>,
    pub lease: Lease,
    pub truncated: bool,
}

impl EstimateSize for SliceResult {
    fn estimated_size_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(1024)
    }
}

/// Server-side record behind an issued handle.
#[derive(Debug, Clone)]
pub struct SliceHandleRecord {
    pub repo_id: String,
    pub version: i64,
    pub input_fingerprint: String,
    pub budget: SliceBudget,
    pub card_ids: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// In-process registry of live slice handles.
#[derive(Default)]
pub struct HandleRegistry {
    handles: Mutex<HashMap<String, SliceHandleRecord>>,
}

impl HandleRegistry {
    pub fn insert(&self, handle: String, record: SliceHandleRecord) {
        let mut handles = self.handles.lock();
        handles.retain(|_, r| r.expires_at > Utc::now());
        handles.insert(handle, record);
    }

    /// Fetch a live (non-expired) handle record.
    pub fn get(&self, handle: &str) -> Option<SliceHandleRecord> {
        let handles = self.handles.lock();
        handles
            .get(handle)
            .filter(|r| r.expires_at > Utc::now())
            .cloned()
    }

    /// Extend the lease of a live handle.
    pub fn refresh_lease(&self, handle: &str) -> Option<DateTime<Utc>> {
        let mut handles = self.handles.lock();
        let record = handles.get_mut(handle)?;
        if record.expires_at <= Utc::now() {
            return None;
        }
        record.expires_at = Utc::now() + LEASE_DURATION;
        Some(record.expires_at)
    }
}

pub struct SliceEngine {
    store: Arc<SqliteLedgerStore>,
    pub handles: HandleRegistry,
}

struct Candidate {
    priority: f64,
    why: String,
}

impl SliceEngine {
    pub fn new(store: Arc<SqliteLedgerStore>) -> Self {
        Self {
            store,
            handles: HandleRegistry::default(),
        }
    }

    /// Build a slice against a pinned version.
    pub fn build(&self, input: &SliceInput, version: i64) -> Result<SliceResult> {
        let repo_id = &input.repo_id;

        if input.budget.max_cards == 0 {
            return Err(CoreError::slice("budget.max_cards must be positive"));
        }

        let symbols: BTreeMap<String, Symbol> = self
            .store
            .live_symbols(repo_id, version)?
            .into_iter()
            .map(|s| (s.symbol_id.clone(), s))
            .collect();
        let (edges_from, edges_to, slice_edges) =
            adjacency(&self.store.edges_by_repo(repo_id, version)?);

        // 1. seed selection
        let seeds = self.select_seeds(input, &symbols);

        // 2. bidirectional BFS with decay; 3. budget cut; 4. frontier
        let mut visited: HashSet<String> = HashSet::new();
        let mut included: Vec<(String, f64)> = Vec::new();
        let mut frontier: Vec<FrontierEntry> = Vec::new();
        let mut queue: BTreeMap<PriorityKey, Candidate> = BTreeMap::new();
        let mut tokens_used: u32 = 0;
        let mut truncated = false;

        for (symbol_id, candidate) in seeds {
            queue.insert(
                PriorityKey::new(candidate.priority, &symbol_id),
                candidate,
            );
        }

        while let Some((key, candidate)) = pop_first(&mut queue) {
            if visited.len() >= EXPANSION_CAP {
                truncated = true;
                break;
            }
            let symbol_id = key.symbol_id.clone();
            if visited.contains(&symbol_id) {
                continue;
            }
            let Some(symbol) = symbols.get(&symbol_id) else {
                continue;
            };
            visited.insert(symbol_id.clone());

            let card_tokens =
                crate::shared::models::estimate_tokens(&symbol.signature.render(&symbol.name), symbol.summary.as_deref());
            let over_budget = included.len() >= input.budget.max_cards
                || tokens_used + card_tokens > input.budget.max_estimated_tokens;
            if over_budget {
                // either cap ends accumulation here: admitting a cheaper,
                // lower-priority candidate after this one would break the
                // priority-prefix property
                if frontier.len() < FRONTIER_LIMIT {
                    frontier.push(FrontierEntry {
                        symbol_id: symbol_id.clone(),
                        priority: candidate.priority,
                        why: candidate.why.clone(),
                    });
                }
                break;
            }

            tokens_used += card_tokens;
            included.push((symbol_id.clone(), candidate.priority));

            // expand both directions
            let next_priority = candidate.priority * HOP_DECAY;
            let mut neighbors: Vec<(String, String)> = Vec::new();
            if let Some(outgoing) = edges_from.get(&symbol_id) {
                for (to, kind) in outgoing {
                    neighbors.push((to.clone(), format!("{kind} edge from {symbol_id}")));
                }
            }
            if let Some(incoming) = edges_to.get(&symbol_id) {
                for (from, kind) in incoming {
                    neighbors.push((from.clone(), format!("{kind} edge into {symbol_id}")));
                }
            }
            for (neighbor, why) in neighbors {
                if visited.contains(&neighbor) || !symbols.contains_key(&neighbor) {
                    continue;
                }
                let key = PriorityKey::new(next_priority, &neighbor);
                // keep the best priority per symbol
                let better_exists = queue
                    .iter()
                    .any(|(k, _)| k.symbol_id == neighbor && k.priority() >= next_priority);
                if !better_exists {
                    queue.insert(
                        key,
                        Candidate {
                            priority: next_priority,
                            why,
                        },
                    );
                }
            }
        }

        // drain the best remaining candidates into the frontier
        while frontier.len() < FRONTIER_LIMIT {
            match pop_first(&mut queue) {
                Some((key, candidate)) => {
                    if visited.contains(&key.symbol_id) || !symbols.contains_key(&key.symbol_id) {
                        continue;
                    }
                    visited.insert(key.symbol_id.clone());
                    frontier.push(FrontierEntry {
                        symbol_id: key.symbol_id,
                        priority: candidate.priority,
                        why: candidate.why,
                    });
                }
                None => break,
            }
        }

        let cards: Vec<SymbolCard> = included
            .iter()
            .map(|(id, _)| SymbolCard::from_symbol(&symbols[id]))
            .collect();

        let included_ids: HashSet<&String> = included.iter().map(|(id, _)| id).collect();
        let edges: Vec<SliceEdge> = slice_edges
            .into_iter()
            .filter(|e| {
                included_ids.contains(&e.from_symbol_id) && included_ids.contains(&e.to_symbol_id)
            })
            .collect();

        let input_fingerprint = fingerprint_input(input);
        let slice_handle = handle_id(repo_id, version, &input_fingerprint);
        let expires_at = Utc::now() + LEASE_DURATION;
        self.handles.insert(
            slice_handle.clone(),
            SliceHandleRecord {
                repo_id: repo_id.clone(),
                version,
                input_fingerprint,
                budget: input.budget.clone(),
                card_ids: cards.iter().map(|c| c.symbol_id.clone()).collect(),
                expires_at,
            },
        );

        debug!(
            repo_id,
            version,
            cards = cards.len(),
            frontier = frontier.len(),
            tokens = tokens_used,
            truncated,
            "slice built"
        );

        Ok(SliceResult {
            slice_handle,
            ledger_version: version,
            cards,
            edges,
            frontier,
            lease: Lease { expires_at },
            truncated,
        })
    }

    fn select_seeds(
        &self,
        input: &SliceInput,
        symbols: &BTreeMap<String, Symbol>,
    ) -> BTreeMap<String, Candidate> {
        let mut seeds: BTreeMap<String, Candidate> = BTreeMap::new();
        let mut add = |id: &str, priority: f64, why: String| {
            let better = seeds
                .get(id)
                .map_or(false, |existing| existing.priority >= priority);
            if !better {
                seeds.insert(id.to_string(), Candidate { priority, why });
            }
        };

        // explicit entry symbols
        for id in &input.entry_symbols {
            if symbols.contains_key(id) {
                add(id, PRIO_ENTRY, "entry symbol".to_string());
            }
        }

        // edited files (the failing test path counts as one)
        let mut edited: Vec<&String> = input.edited_files.iter().collect();
        if let Some(test) = &input.failing_test_path {
            edited.push(test);
        }
        for file in edited {
            for symbol in symbols.values().filter(|s| &s.file_path == file) {
                add(
                    &symbol.symbol_id,
                    PRIO_EDITED_FILE,
                    format!("edited file {file}"),
                );
            }
        }

        // stack trace locations
        if let Some(trace) = &input.stack_trace {
            for (file, line) in parse_stack_trace(trace) {
                for symbol in symbols.values() {
                    let file_matches = symbol.file_path == file
                        || symbol.file_path.ends_with(&format!("/{file}"))
                        || file.ends_with(&symbol.file_path);
                    if file_matches
                        && symbol.start_line <= line
                        && line <= symbol.end_line
                    {
                        add(
                            &symbol.symbol_id,
                            PRIO_STACK_TRACE,
                            format!("stack frame {file}:{line}"),
                        );
                    }
                }
            }
        }

        // task-text keywords against names and summaries
        for keyword in keywords(&input.task_text) {
            for symbol in symbols.values() {
                let name_lower = symbol.name.to_lowercase();
                let score = if name_lower == keyword {
                    1.0
                } else if name_lower.contains(&keyword)
                    || symbol
                        .summary
                        .as_deref()
                        .map_or(false, |s| s.to_lowercase().contains(&keyword))
                {
                    0.5
                } else {
                    continue;
                };
                add(
                    &symbol.symbol_id,
                    score * KEYWORD_SCALE,
                    format!("task keyword '{keyword}'"),
                );
            }
        }

        seeds
    }
}

/// Totally ordered queue key: priority descending, then symbol id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PriorityKey {
    /// negated, scaled priority so BTreeMap iterates best-first
    neg_priority_millis: i64,
    symbol_id: String,
}

impl PriorityKey {
    fn new(priority: f64, symbol_id: &str) -> Self {
        Self {
            neg_priority_millis: -(priority * 1_000_000.0).round() as i64,
            symbol_id: symbol_id.to_string(),
        }
    }

    fn priority(&self) -> f64 {
        -(self.neg_priority_millis as f64) / 1_000_000.0
    }
}

fn pop_first(queue: &mut BTreeMap<PriorityKey, Candidate>) -> Option<(PriorityKey, Candidate)> {
    let key = queue.keys().next()?.clone();
    let value = queue.remove(&key)?;
    Some((key, value))
}

type AdjacencyMaps = (
    HashMap<String, Vec<(String, String)>>,
    HashMap<String, Vec<(String, String)>>,
    Vec<SliceEdge>,
);

/// Forward/reverse lookup maps plus the resolved edge list.
fn adjacency(edges: &[Edge]) -> AdjacencyMaps {
    let mut from: HashMap<String, Vec<(String, String)>> = HashMap::new();
    let mut to: HashMap<String, Vec<(String, String)>> = HashMap::new();
    let mut resolved = Vec::new();
    for edge in edges {
        let Some(target) = &edge.to_symbol_id else {
            continue;
        };
        let kind = edge.kind.as_str().to_string();
        from.entry(edge.from_symbol_id.clone())
            .or_default()
            .push((target.clone(), kind.clone()));
        to.entry(target.clone())
            .or_default()
            .push((edge.from_symbol_id.clone(), kind.clone()));
        resolved.push(SliceEdge {
            from_symbol_id: edge.from_symbol_id.clone(),
            to_symbol_id: target.clone(),
            kind,
            confidence: edge.confidence,
        });
    }
    // deterministic neighbor order
    for list in from.values_mut().chain(to.values_mut()) {
        list.sort();
    }
    (from, to, resolved)
}

static STACK_FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\w./\\-]+\.[A-Za-z]{1,4}):(\d+)").expect("stack frame regex")
});

/// `(file, line)` pairs mentioned in a stack trace.
pub fn parse_stack_trace(trace: &str) -> Vec<(String, u32)> {
    let mut seen = HashSet::new();
    let mut frames = Vec::new();
    for cap in STACK_FRAME_RE.captures_iter(trace) {
        let file = cap[1].replace('\\', "/");
        let line: u32 = match cap[2].parse() {
            Ok(l) => l,
            Err(_) => continue,
        };
        if seen.insert((file.clone(), line)) {
            frames.push((file, line));
        }
    }
    frames
}

/// Lowercased alphanumeric task-text tokens, deduplicated, 3+ chars.
fn keywords(task_text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    task_text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(str::to_lowercase)
        .filter(|w| w.len() >= 3)
        .filter(|w| seen.insert(w.clone()))
        .take(12)
        .collect()
}

/// Canonical fingerprint of the slice inputs.
pub fn fingerprint_input(input: &SliceInput) -> String {
    let mut normalized = input.clone();
    normalized.edited_files.sort();
    normalized.entry_symbols.sort();
    let json = serde_json::to_string(&normalized).unwrap_or_default();
    blake3::hash(json.as_bytes()).to_hex().to_string()
}

fn handle_id(repo_id: &str, version: i64, input_fingerprint: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(repo_id.as_bytes());
    hasher.update(&version.to_le_bytes());
    hasher.update(input_fingerprint.as_bytes());
    format!("slice-{}", &hasher.finalize().to_hex()[..32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdl_storage::{
        Edge, EdgeKind, Repository, ResolutionStrategy, Signature, SymbolKind, VersionKind,
        Visibility,
    };

    fn seed_store(chain_len: usize) -> Arc<SqliteLedgerStore> {
        let store = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        store
            .register_repo(&Repository::new("acme", "/src/acme"))
            .unwrap();
        let mut pass = store.begin_pass("acme", None, VersionKind::Initial).unwrap();
        for i in 0..chain_len {
            let symbol = Symbol {
                symbol_id: format!("sym:{i:04}"),
                repo_id: "acme".into(),
                file_path: format!("f{}.rs", i / 10),
                name: format!("func_{i:04}"),
                kind: SymbolKind::Function,
                exported: true,
                visibility: Visibility::Public,
                signature: Signature::default(),
                summary: None,
                start_line: 1,
                start_col: 0,
                end_line: 5,
                end_col: 1,
                ast_fingerprint: format!("fp{i}"),
                first_seen_version: 0,
                last_seen_version: None,
            };
            pass.upsert_symbol(&symbol).unwrap();
            if i > 0 {
                pass.upsert_edge(&Edge {
                    repo_id: "acme".into(),
                    from_symbol_id: format!("sym:{:04}", i - 1),
                    to_symbol_id: Some(format!("sym:{i:04}")),
                    callee_identifier: Some(format!("func_{i:04}")),
                    kind: EdgeKind::Call,
                    weight: 1.0,
                    confidence: 0.9,
                    resolution: ResolutionStrategy::Exact,
                    candidate_count: None,
                    first_seen_version: 0,
                    last_seen_version: None,
                })
                .unwrap();
            }
        }
        pass.commit().unwrap();
        store
    }

    fn input(budget_cards: usize, budget_tokens: u32) -> SliceInput {
        SliceInput {
            repo_id: "acme".into(),
            task_text: String::new(),
            stack_trace: None,
            failing_test_path: None,
            edited_files: vec![],
            entry_symbols: vec!["sym:0000".into()],
            budget: SliceBudget {
                max_cards: budget_cards,
                max_estimated_tokens: budget_tokens,
            },
        }
    }

    #[test]
    fn test_budget_enforced_with_frontier() {
        let store = seed_store(500);
        let engine = SliceEngine::new(store);
        let result = engine.build(&input(30, 5000), 1).unwrap();

        assert!(result.cards.len() <= 30);
        let total: u32 = result.cards.iter().map(|c| c.estimated_tokens).sum();
        assert!(total <= 5000);
        assert!(!result.frontier.is_empty());

        // frontier priorities sit strictly below the last included card
        let last_priority = 1.0 * HOP_DECAY.powi(result.cards.len() as i32 - 1);
        for entry in &result.frontier {
            assert!(entry.priority < last_priority + 1e-9);
        }
    }

    #[test]
    fn test_token_budget_keeps_priority_prefix() {
        let store = seed_store(100);
        let engine = SliceEngine::new(store);
        // cards are 8 estimated tokens each, so the token cap binds first
        let result = engine.build(&input(100, 50), 1).unwrap();

        let total: u32 = result.cards.iter().map(|c| c.estimated_tokens).sum();
        assert!(total <= 50);
        assert!(result.cards.len() < 100);

        // the slice is exactly the head of the chain, in priority order;
        // no cheaper low-priority symbol may leapfrog a rejected one
        let got: Vec<String> = result.cards.iter().map(|c| c.symbol_id.clone()).collect();
        let expected: Vec<String> = (0..result.cards.len())
            .map(|i| format!("sym:{i:04}"))
            .collect();
        assert_eq!(got, expected);

        assert!(!result.frontier.is_empty());
        let min_included = 0.7f64.powi(result.cards.len() as i32 - 1);
        for entry in &result.frontier {
            assert!(entry.priority < min_included + 1e-9);
        }
    }

    #[test]
    fn test_deterministic_output() {
        let store = seed_store(100);
        let engine = SliceEngine::new(store);
        let a = engine.build(&input(20, 4000), 1).unwrap();
        let b = engine.build(&input(20, 4000), 1).unwrap();

        let a_json = serde_json::to_string(&a.cards).unwrap();
        let b_json = serde_json::to_string(&b.cards).unwrap();
        assert_eq!(a_json, b_json);
        assert_eq!(a.slice_handle, b.slice_handle);
        assert_eq!(
            serde_json::to_string(&a.frontier).unwrap(),
            serde_json::to_string(&b.frontier).unwrap()
        );
    }

    #[test]
    fn test_entry_seed_expands_chain() {
        let store = seed_store(10);
        let engine = SliceEngine::new(store);
        let result = engine.build(&input(10, 100_000), 1).unwrap();
        assert_eq!(result.cards.len(), 10);
        // edges between included cards are reported
        assert!(!result.edges.is_empty());
    }

    #[test]
    fn test_keyword_seeding() {
        let store = seed_store(10);
        let engine = SliceEngine::new(store);
        let mut query = input(5, 100_000);
        query.entry_symbols.clear();
        query.task_text = "crash in func_0003 handler".into();
        let result = engine.build(&query, 1).unwrap();
        assert!(result
            .cards
            .iter()
            .any(|c| c.symbol_id == "sym:0003"));
    }

    #[test]
    fn test_handle_lease_registry() {
        let store = seed_store(5);
        let engine = SliceEngine::new(store);
        let result = engine.build(&input(5, 100_000), 1).unwrap();

        let record = engine.handles.get(&result.slice_handle).unwrap();
        assert_eq!(record.version, 1);
        assert!(!record.card_ids.is_empty());
        assert!(engine.handles.refresh_lease(&result.slice_handle).is_some());
        assert!(engine.handles.get("slice-unknown").is_none());
    }

    #[test]
    fn test_stack_trace_parsing() {
        let frames = parse_stack_trace(
            "Error: boom\n    at handler (src/api/routes.ts:42)\n    at run (src/main.ts:7)\n",
        );
        assert_eq!(
            frames,
            vec![
                ("src/api/routes.ts".to_string(), 42),
                ("src/main.ts".to_string(), 7)
            ]
        );
    }
}
