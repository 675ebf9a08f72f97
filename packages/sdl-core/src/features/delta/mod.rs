//! Delta engine
//!
//! Classifies symbols between two ledger versions by their observation
//! windows: added when `first_seen_version` falls in `(from, to]`, removed
//! when `last_seen_version` does, modified when a symbol is live at both
//! endpoints with differing fingerprints. A symbol born *and* retired
//! strictly inside the range satisfies both predicates and reports in both
//! lists. On top of the changed set sits a blast-radius closure: every
//! symbol reachable within a bounded number of hops, over edges live at
//! either endpoint.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use sdl_storage::{SqliteLedgerStore, Symbol, SymbolKind};

use crate::shared::models::{CoreError, Result};

/// Default blast-radius traversal depth.
pub const BLAST_RADIUS_DEPTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaSymbol {
    pub symbol_id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub file_path: String,
}

impl DeltaSymbol {
    fn from_symbol(symbol: &Symbol) -> Self {
        Self {
            symbol_id: symbol.symbol_id.clone(),
            name: symbol.name.clone(),
            kind: symbol.kind,
            file_path: symbol.file_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaPack {
    pub repo_id: String,
    pub from_version: i64,
    pub to_version: i64,
    pub symbols_added: Vec<DeltaSymbol>,
    pub symbols_removed: Vec<DeltaSymbol>,
    pub symbols_modified: Vec<DeltaSymbol>,
    /// Symbols within `BLAST_RADIUS_DEPTH` hops of any change
    pub blast_radius: Vec<String>,
    pub not_modified: bool,
}

pub struct DeltaEngine {
    store: Arc<SqliteLedgerStore>,
}

impl DeltaEngine {
    pub fn new(store: Arc<SqliteLedgerStore>) -> Self {
        Self { store }
    }

    pub fn get(
        &self,
        repo_id: &str,
        from_version: i64,
        to_version: i64,
        max_cards: usize,
    ) -> Result<DeltaPack> {
        if from_version > to_version {
            return Err(CoreError::new(
                crate::shared::models::ErrorKind::Delta,
                format!("from_version {from_version} is newer than to_version {to_version}"),
            ));
        }
        // both endpoints must exist
        self.store.get_version(repo_id, from_version)?;
        self.store.get_version(repo_id, to_version)?;

        // full observation history, grouped per symbol id; a modified symbol
        // carries several rows (retired + reborn) under one identity
        let mut rows_by_symbol: BTreeMap<String, Vec<Symbol>> = BTreeMap::new();
        for row in self.store.dump_symbols(repo_id)? {
            rows_by_symbol
                .entry(row.symbol_id.clone())
                .or_default()
                .push(row);
        }

        let mut added: Vec<DeltaSymbol> = Vec::new();
        let mut removed: Vec<DeltaSymbol> = Vec::new();
        let mut modified: Vec<DeltaSymbol> = Vec::new();

        for rows in rows_by_symbol.values() {
            let at_from = rows.iter().find(|r| r.live_at(from_version));
            let at_to = rows.iter().find(|r| r.live_at(to_version));
            match (at_from, at_to) {
                (Some(old), Some(new)) => {
                    if old.ast_fingerprint != new.ast_fingerprint {
                        modified.push(DeltaSymbol::from_symbol(new));
                    }
                }
                (None, Some(new)) => added.push(DeltaSymbol::from_symbol(new)),
                (Some(old), None) => removed.push(DeltaSymbol::from_symbol(old)),
                (None, None) => {
                    // live at neither endpoint: report by the raw range
                    // predicates, so a life window inside (from, to] shows
                    // as both added and removed
                    let born_in_range = rows.iter().any(|r| {
                        r.first_seen_version > from_version
                            && r.first_seen_version <= to_version
                    });
                    let retired_in_range = rows.iter().any(|r| {
                        r.last_seen_version
                            .map_or(false, |v| v > from_version && v <= to_version)
                    });
                    let Some(latest) = rows.iter().max_by_key(|r| r.first_seen_version)
                    else {
                        continue;
                    };
                    if born_in_range {
                        added.push(DeltaSymbol::from_symbol(latest));
                    }
                    if retired_in_range {
                        removed.push(DeltaSymbol::from_symbol(latest));
                    }
                }
            }
        }

        added.sort_by(|a, b| a.symbol_id.cmp(&b.symbol_id));
        removed.sort_by(|a, b| a.symbol_id.cmp(&b.symbol_id));
        modified.sort_by(|a, b| a.symbol_id.cmp(&b.symbol_id));

        let not_modified = added.is_empty() && removed.is_empty() && modified.is_empty();
        let blast_radius = if not_modified {
            Vec::new()
        } else {
            let changed: BTreeSet<String> = added
                .iter()
                .chain(removed.iter())
                .chain(modified.iter())
                .map(|s| s.symbol_id.clone())
                .collect();
            self.blast_radius(repo_id, from_version, to_version, &changed, max_cards)?
        };

        debug!(
            repo_id,
            from_version,
            to_version,
            added = added.len(),
            removed = removed.len(),
            modified = modified.len(),
            blast = blast_radius.len(),
            "delta computed"
        );

        Ok(DeltaPack {
            repo_id: repo_id.to_string(),
            from_version,
            to_version,
            symbols_added: added,
            symbols_removed: removed,
            symbols_modified: modified,
            blast_radius,
            not_modified,
        })
    }

    /// BFS closure over the union of edges live at either endpoint; the
    /// changed set itself is excluded from the output.
    fn blast_radius(
        &self,
        repo_id: &str,
        from_version: i64,
        to_version: i64,
        changed: &BTreeSet<String>,
        max_cards: usize,
    ) -> Result<Vec<String>> {
        let mut neighbors: HashMap<String, BTreeSet<String>> = HashMap::new();
        for version in [from_version, to_version] {
            for edge in self.store.edges_by_repo(repo_id, version)? {
                let Some(to) = edge.to_symbol_id else { continue };
                neighbors
                    .entry(edge.from_symbol_id.clone())
                    .or_default()
                    .insert(to.clone());
                neighbors.entry(to).or_default().insert(edge.from_symbol_id);
            }
        }

        let mut reached: BTreeSet<String> = BTreeSet::new();
        let mut frontier: BTreeSet<String> = changed.clone();
        let mut visited: HashSet<String> = changed.iter().cloned().collect();

        for _ in 0..BLAST_RADIUS_DEPTH {
            let mut next = BTreeSet::new();
            for symbol_id in &frontier {
                if let Some(adjacent) = neighbors.get(symbol_id) {
                    for n in adjacent {
                        if visited.insert(n.clone()) {
                            next.insert(n.clone());
                            reached.insert(n.clone());
                            if reached.len() >= max_cards {
                                return Ok(reached.into_iter().collect());
                            }
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        Ok(reached.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdl_storage::{
        Edge, EdgeKind, Repository, ResolutionStrategy, Signature, VersionKind, Visibility,
    };

    fn symbol(id: &str, name: &str, fp: &str) -> Symbol {
        Symbol {
            symbol_id: id.to_string(),
            repo_id: "acme".into(),
            file_path: "a.ts".into(),
            name: name.to_string(),
            kind: SymbolKind::Function,
            exported: true,
            visibility: Visibility::Public,
            signature: Signature::default(),
            summary: None,
            start_line: 1,
            start_col: 0,
            end_line: 3,
            end_col: 1,
            ast_fingerprint: fp.to_string(),
            first_seen_version: 0,
            last_seen_version: None,
        }
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge {
            repo_id: "acme".into(),
            from_symbol_id: from.to_string(),
            to_symbol_id: Some(to.to_string()),
            callee_identifier: Some(to.to_string()),
            kind: EdgeKind::Call,
            weight: 1.0,
            confidence: 0.9,
            resolution: ResolutionStrategy::Exact,
            candidate_count: None,
            first_seen_version: 0,
            last_seen_version: None,
        }
    }

    fn store() -> Arc<SqliteLedgerStore> {
        let store = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        store
            .register_repo(&Repository::new("acme", "/src/acme"))
            .unwrap();
        store
    }

    #[test]
    fn test_added_removed_modified() {
        let store = store();
        let mut pass = store.begin_pass("acme", None, VersionKind::Initial).unwrap();
        pass.upsert_symbol(&symbol("sym:a", "a", "fp-a1")).unwrap();
        pass.upsert_symbol(&symbol("sym:b", "b", "fp-b1")).unwrap();
        pass.commit().unwrap();

        let mut pass = store
            .begin_pass("acme", Some(1), VersionKind::Incremental)
            .unwrap();
        pass.retire_symbol("sym:b").unwrap();
        pass.upsert_symbol(&symbol("sym:a", "a", "fp-a2")).unwrap();
        pass.upsert_symbol(&symbol("sym:c", "c", "fp-c1")).unwrap();
        pass.commit().unwrap();

        let engine = DeltaEngine::new(store);
        let pack = engine.get("acme", 1, 2, 100).unwrap();

        assert_eq!(pack.symbols_added.len(), 1);
        assert_eq!(pack.symbols_added[0].symbol_id, "sym:c");
        assert_eq!(pack.symbols_removed.len(), 1);
        assert_eq!(pack.symbols_removed[0].symbol_id, "sym:b");
        assert_eq!(pack.symbols_modified.len(), 1);
        assert_eq!(pack.symbols_modified[0].symbol_id, "sym:a");
        assert!(!pack.not_modified);
    }

    #[test]
    fn test_symbol_born_and_retired_inside_range() {
        let store = store();
        let mut pass = store.begin_pass("acme", None, VersionKind::Initial).unwrap();
        pass.upsert_symbol(&symbol("sym:a", "a", "fp-a")).unwrap();
        pass.commit().unwrap();

        // v2: b is born
        let mut pass = store
            .begin_pass("acme", Some(1), VersionKind::Incremental)
            .unwrap();
        pass.upsert_symbol(&symbol("sym:b", "b", "fp-b")).unwrap();
        pass.commit().unwrap();

        // v3: b is retired again
        let mut pass = store
            .begin_pass("acme", Some(2), VersionKind::Incremental)
            .unwrap();
        pass.retire_symbol("sym:b").unwrap();
        pass.commit().unwrap();

        // v4: unrelated churn so both endpoints sit outside b's window
        let mut pass = store
            .begin_pass("acme", Some(3), VersionKind::Incremental)
            .unwrap();
        pass.upsert_symbol(&symbol("sym:c", "c", "fp-c")).unwrap();
        pass.commit().unwrap();

        let engine = DeltaEngine::new(store);
        let pack = engine.get("acme", 1, 4, 100).unwrap();

        // b lived only inside (1, 4]: both range predicates hold
        assert!(pack.symbols_added.iter().any(|s| s.symbol_id == "sym:b"));
        assert!(pack.symbols_removed.iter().any(|s| s.symbol_id == "sym:b"));
        // endpoints unaffected: a untouched, c added normally
        assert!(!pack.symbols_removed.iter().any(|s| s.symbol_id == "sym:a"));
        assert!(pack.symbols_added.iter().any(|s| s.symbol_id == "sym:c"));
        assert!(!pack.not_modified);
    }

    #[test]
    fn test_not_modified_between_identical_versions() {
        let store = store();
        let mut pass = store.begin_pass("acme", None, VersionKind::Initial).unwrap();
        pass.upsert_symbol(&symbol("sym:a", "a", "fp-a")).unwrap();
        pass.commit().unwrap();
        store
            .begin_pass("acme", Some(1), VersionKind::Incremental)
            .unwrap()
            .commit()
            .unwrap();

        let engine = DeltaEngine::new(store);
        let pack = engine.get("acme", 1, 2, 100).unwrap();
        assert!(pack.not_modified);
        assert!(pack.blast_radius.is_empty());
    }

    #[test]
    fn test_blast_radius_includes_dependents() {
        let store = store();
        let mut pass = store.begin_pass("acme", None, VersionKind::Initial).unwrap();
        pass.upsert_symbol(&symbol("sym:a", "a", "fp-a")).unwrap();
        pass.upsert_symbol(&symbol("sym:b", "b", "fp-b")).unwrap();
        pass.upsert_symbol(&symbol("sym:c", "c", "fp-c")).unwrap();
        // c -> b -> a
        pass.upsert_edge(&edge("sym:b", "sym:a")).unwrap();
        pass.upsert_edge(&edge("sym:c", "sym:b")).unwrap();
        pass.commit().unwrap();

        // retire a
        let mut pass = store
            .begin_pass("acme", Some(1), VersionKind::Incremental)
            .unwrap();
        pass.retire_symbol("sym:a").unwrap();
        pass.retire_edges_touching("sym:a").unwrap();
        pass.commit().unwrap();

        let engine = DeltaEngine::new(store);
        let pack = engine.get("acme", 1, 2, 100).unwrap();

        assert_eq!(pack.symbols_removed[0].symbol_id, "sym:a");
        // depth 2: b (direct dependent), then c
        assert!(pack.blast_radius.contains(&"sym:b".to_string()));
        assert!(pack.blast_radius.contains(&"sym:c".to_string()));
    }

    #[test]
    fn test_blast_radius_cap() {
        let store = store();
        let mut pass = store.begin_pass("acme", None, VersionKind::Initial).unwrap();
        pass.upsert_symbol(&symbol("sym:hub", "hub", "fp")).unwrap();
        for i in 0..20 {
            let id = format!("sym:dep{i:02}");
            pass.upsert_symbol(&symbol(&id, &format!("dep{i}"), "fp")).unwrap();
            pass.upsert_edge(&edge(&id, "sym:hub")).unwrap();
        }
        pass.commit().unwrap();

        let mut pass = store
            .begin_pass("acme", Some(1), VersionKind::Incremental)
            .unwrap();
        pass.upsert_symbol(&symbol("sym:hub", "hub", "fp2")).unwrap();
        pass.commit().unwrap();

        let engine = DeltaEngine::new(store);
        let pack = engine.get("acme", 1, 2, 5).unwrap();
        assert_eq!(pack.blast_radius.len(), 5);
    }

    #[test]
    fn test_bad_version_range() {
        let store = store();
        store
            .begin_pass("acme", None, VersionKind::Initial)
            .unwrap()
            .commit()
            .unwrap();
        let engine = DeltaEngine::new(store);
        assert!(engine.get("acme", 2, 1, 10).is_err());
        assert!(engine.get("acme", 1, 9, 10).is_err());
    }
}
