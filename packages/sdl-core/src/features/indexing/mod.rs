//! Indexing pipeline
//!
//! One pass: walk the repo tree, hash in parallel, diff against the head
//! version's per-file fingerprints, extract changed files on a bounded
//! worker pool, resolve call edges, then apply every mutation in a single
//! store transaction. Individual file failures degrade (warn + preserve the
//! file's previous symbols); store errors abort the pass and the version
//! with it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use sdl_storage::{
    Edge, FileRecord, Repository, SqliteLedgerStore, Symbol, SymbolKind, VersionKind,
};

use crate::features::cache::Invalidate;
use crate::features::parsing::{fingerprint_content, AdapterRegistry, LanguageId};
use crate::features::resolve::{
    build_import_edges, resolve_file_calls, resolve_imports, FileResolveInput, ResolvedImport,
    ResolverLookup,
};
use crate::features::versioning::{compute_delta, ScanDelta};
use crate::shared::models::{CallSite, CoreError, ErrorKind, ImportCandidate, Result};
use crate::shared::models::SymbolCandidate;
use crate::shared::CancelToken;

/// Per-file size cap applied when a repo does not configure one.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Retry budget for busy / stale-parent commits.
const WRITE_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub full: bool,
    pub reason: Option<String>,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexStats {
    pub files_scanned: usize,
    pub files_changed: usize,
    pub files_removed: usize,
    pub files_failed: usize,
    pub files_partial: usize,
    pub symbols_upserted: usize,
    pub symbols_retired: usize,
    pub edges_upserted: usize,
    pub edges_retired: usize,
    pub unresolved_calls: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IndexOutcome {
    /// `None` when the scan observed no changes (no version created)
    pub version: Option<i64>,
    pub stats: IndexStats,
}

/// Canonicalized extraction for one changed file.
struct CanonFile {
    file_path: String,
    language: LanguageId,
    content_hash: String,
    /// Index 0 is the module symbol
    symbols: Vec<Symbol>,
    imports: Vec<ImportCandidate>,
    calls: Vec<CallSite>,
    partial: bool,
}

enum FileResult {
    Extracted(Box<CanonFile>),
    /// Grammar produced nothing usable; previous symbols are preserved
    ParseFailed { file_path: String },
}

pub struct IndexPipeline {
    store: Arc<SqliteLedgerStore>,
    registry: Arc<AdapterRegistry>,
    invalidators: Vec<Arc<dyn Invalidate>>,
    pool: rayon::ThreadPool,
}

impl IndexPipeline {
    pub fn new(
        store: Arc<SqliteLedgerStore>,
        registry: Arc<AdapterRegistry>,
        invalidators: Vec<Arc<dyn Invalidate>>,
        workers: usize,
    ) -> Result<Self> {
        let workers = workers.clamp(1, 8);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("sdl-index-{i}"))
            .build()
            .map_err(|e| CoreError::index(format!("worker pool: {e}")))?;
        Ok(Self {
            store,
            registry,
            invalidators,
            pool,
        })
    }

    /// Run one indexing pass. Retries stale-parent and busy conflicts with
    /// backoff; everything else propagates.
    pub fn run(&self, repo_id: &str, options: &IndexOptions) -> Result<IndexOutcome> {
        let mut attempt = 0;
        loop {
            match self.run_once(repo_id, options) {
                Err(err) if err.kind == ErrorKind::StoreContention && attempt < WRITE_RETRIES => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    warn!(repo_id, attempt, ?delay, "index pass conflicted, retrying");
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }

    fn run_once(&self, repo_id: &str, options: &IndexOptions) -> Result<IndexOutcome> {
        let started = Instant::now();
        let cancel = &options.cancel;
        let repo = self.store.get_repo(repo_id)?;
        let mut stats = IndexStats::default();

        // 1. walk + filter
        let files = self.scan_files(&repo)?;
        stats.files_scanned = files.len();
        cancel.checkpoint("index scan")?;

        // 2. parallel content hashing
        let hashed: Vec<(String, PathBuf, Option<String>)> = self.pool.install(|| {
            files
                .par_iter()
                .map(|(rel, abs)| {
                    let hash = match std::fs::read(abs) {
                        Ok(bytes) => Some(fingerprint_content(&bytes)),
                        Err(err) => {
                            warn!(file = %rel, %err, "unreadable file skipped");
                            None
                        }
                    };
                    (rel.clone(), abs.clone(), hash)
                })
                .collect()
        });
        cancel.checkpoint("index hash")?;

        let abs_paths: HashMap<String, PathBuf> = hashed
            .iter()
            .map(|(rel, abs, _)| (rel.clone(), abs.clone()))
            .collect();
        let current: BTreeMap<String, String> = hashed
            .into_iter()
            .filter_map(|(rel, _, hash)| hash.map(|h| (rel, h)))
            .collect();

        // 3. change detection against head
        let head = self.store.head_version(repo_id)?;
        let previous: HashMap<String, String> = match head {
            Some(v) => self.store.version_files(repo_id, v)?.into_iter().collect(),
            None => HashMap::new(),
        };
        let delta = compute_delta(&previous, &current);
        stats.files_changed = delta.added.len() + delta.modified.len();
        stats.files_removed = delta.removed.len();

        if delta.is_empty() && !options.full {
            debug!(repo_id, "no changed files, skipping version");
            stats.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(IndexOutcome {
                version: None,
                stats,
            });
        }

        // 4. extraction (bounded parallel)
        let to_extract: Vec<String> = if options.full {
            current.keys().cloned().collect()
        } else {
            delta.changed().cloned().collect()
        };

        let results: Vec<FileResult> = self.pool.install(|| {
            to_extract
                .par_iter()
                .filter_map(|rel| {
                    if cancel.is_canceled() {
                        return None;
                    }
                    let abs = abs_paths.get(rel)?;
                    let hash = current.get(rel)?;
                    Some(self.extract_file(&repo, rel, abs, hash))
                })
                .collect()
        });
        cancel.checkpoint("index extract")?;

        let mut extracted: BTreeMap<String, CanonFile> = BTreeMap::new();
        let mut parse_failed: HashSet<String> = HashSet::new();
        for result in results {
            match result {
                FileResult::Extracted(file) => {
                    if file.partial {
                        stats.files_partial += 1;
                    }
                    extracted.insert(file.file_path.clone(), *file);
                }
                FileResult::ParseFailed { file_path } => {
                    stats.files_failed += 1;
                    parse_failed.insert(file_path);
                }
            }
        }

        // 5. resolution + mutation plan
        let plan = self.build_plan(
            &repo, head, &delta, &current, &previous, &extracted, &parse_failed,
        )?;
        stats.unresolved_calls = plan.unresolved_calls;
        cancel.checkpoint("index plan")?;

        // No row mutations and an identical fingerprint map means nothing
        // to version (covers full-mode re-extraction and files that keep
        // failing to parse).
        let fingerprints_unchanged = plan.version_files.len() == previous.len()
            && plan
                .version_files
                .iter()
                .all(|(path, hash)| previous.get(path) == Some(hash));
        if plan.is_noop() && fingerprints_unchanged {
            debug!(repo_id, "pass observed no semantic changes");
            stats.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(IndexOutcome {
                version: None,
                stats,
            });
        }

        // 6. single-transaction apply
        let kind = match (head, options.full) {
            (None, _) => VersionKind::Initial,
            (Some(_), true) => VersionKind::Full,
            (Some(_), false) => VersionKind::Incremental,
        };
        let mut pass = self.store.begin_pass(repo_id, head, kind)?;
        for symbol in &plan.symbol_upserts {
            pass.upsert_symbol(symbol)?;
        }
        for symbol_id in &plan.symbol_retires {
            pass.retire_symbol(symbol_id)?;
            pass.retire_edges_touching(symbol_id)?;
        }
        for key in &plan.edge_retires {
            pass.retire_edge(key)?;
        }
        for edge in &plan.edge_upserts {
            pass.upsert_edge(edge)?;
        }
        for record in &plan.file_records {
            pass.record_file(record)?;
        }
        for path in &delta.removed {
            pass.remove_file(path)?;
        }
        for (path, hash) in &plan.version_files {
            pass.record_version_file(path, hash)?;
        }
        let version = pass.commit()?;

        // Flush derived state for the superseded head before acknowledging.
        if let Some(old) = head {
            for invalidator in &self.invalidators {
                invalidator.invalidate_version(old);
            }
        }

        stats.symbols_upserted = plan.symbol_upserts.len();
        stats.symbols_retired = plan.symbol_retires.len();
        stats.edges_upserted = plan.edge_upserts.len();
        stats.edges_retired = plan.edge_retires.len();
        stats.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            repo_id,
            version,
            reason = options.reason.as_deref().unwrap_or("-"),
            files_changed = stats.files_changed,
            symbols = stats.symbols_upserted,
            edges = stats.edges_upserted,
            duration_ms = stats.duration_ms,
            "index pass committed"
        );

        Ok(IndexOutcome {
            version: Some(version),
            stats,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Scan
    // ═══════════════════════════════════════════════════════════════════════

    fn scan_files(&self, repo: &Repository) -> Result<Vec<(String, PathBuf)>> {
        let root = Path::new(&repo.root_path);
        if !root.is_dir() {
            return Err(CoreError::index(format!(
                "repo {} root is not a directory: {}",
                repo.repo_id, repo.root_path
            )));
        }
        let allowed = self.registry.allowed_extensions(&repo.languages);
        let max_bytes = repo.max_file_bytes.unwrap_or(DEFAULT_MAX_FILE_BYTES);

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    warn!(repo = %repo.repo_id, %err, "walk error");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let rel = match path.strip_prefix(root) {
                Ok(r) => r.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if should_ignore(&rel, &repo.ignore) {
                continue;
            }
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !allowed.iter().any(|a| *a == ext) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if meta.len() > max_bytes {
                    debug!(file = %rel, size = meta.len(), "over size cap, skipped");
                    continue;
                }
            }
            files.push((rel, path.to_path_buf()));
        }
        files.sort();
        Ok(files)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Extraction
    // ═══════════════════════════════════════════════════════════════════════

    fn extract_file(
        &self,
        repo: &Repository,
        rel: &str,
        abs: &Path,
        content_hash: &str,
    ) -> FileResult {
        let failed = || FileResult::ParseFailed {
            file_path: rel.to_string(),
        };

        let Some(adapter) = self.registry.for_path(abs) else {
            return failed();
        };
        let content = match std::fs::read_to_string(abs) {
            Ok(c) => c,
            Err(err) => {
                warn!(file = rel, %err, "read failed, previous symbols preserved");
                return failed();
            }
        };
        let Some(tree) = adapter.parse(&content, rel) else {
            warn!(file = rel, "parse produced no tree, previous symbols preserved");
            return failed();
        };
        if tree.has_errors {
            warn!(file = rel, "syntax errors, extracting partial tree");
        }

        let extraction = adapter.extract(&tree, &content, rel);
        let symbols = canonicalize(&repo.repo_id, rel, &extraction.symbols);

        FileResult::Extracted(Box::new(CanonFile {
            file_path: rel.to_string(),
            language: adapter.language(),
            content_hash: content_hash.to_string(),
            symbols,
            imports: extraction.imports,
            calls: extraction.calls,
            partial: extraction.parse_errors > 0,
        }))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Plan
    // ═══════════════════════════════════════════════════════════════════════

    #[allow(clippy::too_many_arguments)]
    fn build_plan(
        &self,
        repo: &Repository,
        head: Option<i64>,
        delta: &ScanDelta,
        current: &BTreeMap<String, String>,
        previous: &HashMap<String, String>,
        extracted: &BTreeMap<String, CanonFile>,
        parse_failed: &HashSet<String>,
    ) -> Result<PassPlan> {
        let repo_id = &repo.repo_id;
        let mut plan = PassPlan::default();
        let known_files: HashSet<String> = current.keys().cloned().collect();

        // name/id tables for cross-file lookups; falls back to the head
        // version for files untouched this pass
        let store = self.store.clone();
        let repo_for_lookup = repo_id.clone();
        let lookup_cache: Mutex<HashMap<String, Vec<(String, String)>>> = Mutex::new(
            extracted
                .iter()
                .map(|(path, file)| {
                    (
                        path.clone(),
                        file.symbols
                            .iter()
                            .map(|s| (s.name.clone(), s.symbol_id.clone()))
                            .collect(),
                    )
                })
                .collect(),
        );
        let symbols_of_file = move |file: &str| -> Vec<(String, String)> {
            let mut cache = lookup_cache.lock();
            if let Some(hit) = cache.get(file) {
                return hit.clone();
            }
            let loaded = match head {
                Some(v) => store
                    .symbols_by_file(&repo_for_lookup, v, file)
                    .map(|symbols| {
                        symbols
                            .into_iter()
                            .map(|s| (s.name, s.symbol_id))
                            .collect()
                    })
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            cache.insert(file.to_string(), loaded.clone());
            loaded
        };

        for (path, file) in extracted {
            let module_symbol_id = file.symbols[0].symbol_id.clone();

            let resolved_imports: Vec<ResolvedImport> =
                resolve_imports(path, &file.imports, &known_files, &symbols_of_file);
            let input = FileResolveInput {
                file_path: path,
                module_symbol_id: &module_symbol_id,
                symbols: &file.symbols,
                imports: &resolved_imports,
                calls: &file.calls,
            };
            let adapter = self.registry.for_language(file.language);
            let lookup = ResolverLookup {
                adapter,
                symbols_of_file: &symbols_of_file,
            };

            let mut new_edges = build_import_edges(repo_id, &input);
            let calls = resolve_file_calls(repo_id, &input, &lookup);
            plan.unresolved_calls += calls.unresolved_count;
            new_edges.extend(calls.edges);

            self.diff_file(repo_id, head, path, file, new_edges, &mut plan)?;

            plan.file_records.push(FileRecord {
                repo_id: repo_id.clone(),
                file_path: path.clone(),
                content_hash: file.content_hash.clone(),
                language: file.language.as_str().to_string(),
                last_indexed_version: 0,
            });
        }

        // removed files: retire everything still live there
        for path in &delta.removed {
            if let Some(v) = head {
                for symbol in self.store.symbols_by_file(repo_id, v, path)? {
                    plan.symbol_retires.push(symbol.symbol_id);
                }
            }
        }

        // per-file fingerprint map for the new version
        for (path, hash) in current {
            if parse_failed.contains(path) {
                // preserve the previous fingerprint so the file is retried
                // next pass; brand-new unparsable files stay unrecorded
                if let Some(prev) = previous.get(path) {
                    plan.version_files.insert(path.clone(), prev.clone());
                }
                continue;
            }
            plan.version_files.insert(path.clone(), hash.clone());
        }

        plan.symbol_retires.sort();
        plan.symbol_retires.dedup();
        Ok(plan)
    }

    fn diff_file(
        &self,
        repo_id: &str,
        head: Option<i64>,
        path: &str,
        file: &CanonFile,
        new_edges: Vec<Edge>,
        plan: &mut PassPlan,
    ) -> Result<()> {
        let prev_symbols = match head {
            Some(v) => self.store.symbols_by_file(repo_id, v, path)?,
            None => Vec::new(),
        };
        let prev_by_id: HashMap<&str, &Symbol> = prev_symbols
            .iter()
            .map(|s| (s.symbol_id.as_str(), s))
            .collect();
        let new_ids: HashSet<&str> = file.symbols.iter().map(|s| s.symbol_id.as_str()).collect();

        for symbol in &file.symbols {
            match prev_by_id.get(symbol.symbol_id.as_str()) {
                Some(prev) if symbol_unchanged(prev, symbol) => {}
                _ => plan.symbol_upserts.push(symbol.clone()),
            }
        }
        for prev in &prev_symbols {
            if !new_ids.contains(prev.symbol_id.as_str()) {
                plan.symbol_retires.push(prev.symbol_id.clone());
            }
        }

        // previous live edges originating in this file
        let mut prev_edges: HashMap<String, Edge> = HashMap::new();
        if let Some(v) = head {
            for symbol in &prev_symbols {
                for edge in self.store.edges_from(repo_id, v, &symbol.symbol_id)? {
                    prev_edges.insert(edge.identity_key(), edge);
                }
            }
        }

        let mut new_keys = HashSet::new();
        for edge in new_edges {
            let key = edge.identity_key();
            new_keys.insert(key.clone());
            match prev_edges.get(&key) {
                Some(prev) if edge_unchanged(prev, &edge) => {}
                _ => plan.edge_upserts.push(edge),
            }
        }
        for (key, prev) in &prev_edges {
            if !new_keys.contains(key) {
                // edges from symbols retired above are swept separately
                if new_ids.contains(prev.from_symbol_id.as_str()) {
                    plan.edge_retires.push(key.clone());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PassPlan {
    symbol_upserts: Vec<Symbol>,
    symbol_retires: Vec<String>,
    edge_upserts: Vec<Edge>,
    edge_retires: Vec<String>,
    file_records: Vec<FileRecord>,
    version_files: BTreeMap<String, String>,
    unresolved_calls: usize,
}

impl PassPlan {
    fn is_noop(&self) -> bool {
        self.symbol_upserts.is_empty()
            && self.symbol_retires.is_empty()
            && self.edge_upserts.is_empty()
            && self.edge_retires.is_empty()
    }
}

/// Re-observation check: identical structure, position and shape means no
/// row mutation this pass.
fn symbol_unchanged(prev: &Symbol, new: &Symbol) -> bool {
    prev.ast_fingerprint == new.ast_fingerprint
        && prev.start_line == new.start_line
        && prev.start_col == new.start_col
        && prev.end_line == new.end_line
        && prev.end_col == new.end_col
        && prev.exported == new.exported
        && prev.signature == new.signature
        && prev.summary == new.summary
}

fn edge_unchanged(prev: &Edge, new: &Edge) -> bool {
    prev.to_symbol_id == new.to_symbol_id
        && prev.resolution == new.resolution
        && prev.confidence == new.confidence
        && prev.candidate_count == new.candidate_count
}

/// Assign canonical ids: `sym:{repo}:{file}:{kind}:{name}#{ordinal}` where
/// the ordinal is the occurrence index of `(name, kind)` within the file.
/// Line shifts keep ids stable; renames retire and re-create.
fn canonicalize(repo_id: &str, file_path: &str, candidates: &[SymbolCandidate]) -> Vec<Symbol> {
    let mut ordinals: HashMap<(String, SymbolKind), u32> = HashMap::new();
    candidates
        .iter()
        .map(|c| {
            let ordinal = ordinals
                .entry((c.name.clone(), c.kind))
                .and_modify(|n| *n += 1)
                .or_insert(0);
            Symbol {
                symbol_id: format!(
                    "sym:{repo_id}:{file_path}:{}:{}#{ordinal}",
                    c.kind.as_str(),
                    c.name
                ),
                repo_id: repo_id.to_string(),
                file_path: file_path.to_string(),
                name: c.name.clone(),
                kind: c.kind,
                exported: c.exported,
                visibility: c.visibility,
                signature: c.signature.clone(),
                summary: c.summary.clone(),
                start_line: c.span.start_line,
                start_col: c.span.start_col,
                end_line: c.span.end_line,
                end_col: c.span.end_col,
                ast_fingerprint: c.ast_fingerprint.clone(),
                first_seen_version: 0,
                last_seen_version: None,
            }
        })
        .collect()
}

/// Lightweight glob matching: `**` segments match directory components,
/// anything else matches by substring.
fn should_ignore(rel_path: &str, ignore_patterns: &[String]) -> bool {
    const BUILTIN: &[&str] = &[
        "/.git/",
        "/node_modules/",
        "/target/",
        "/__pycache__/",
        "/.venv/",
    ];
    let padded = format!("/{rel_path}");
    if BUILTIN.iter().any(|p| padded.contains(p)) {
        return true;
    }

    for pattern in ignore_patterns {
        if pattern.contains("**") {
            for part in pattern.split("**") {
                let part = part.trim_matches('/');
                if part.is_empty() {
                    continue;
                }
                if padded.contains(&format!("/{part}/")) || padded.ends_with(&format!("/{part}")) {
                    return true;
                }
            }
        } else if rel_path.contains(pattern.as_str()) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdl_storage::{EdgeKind, ResolutionStrategy};
    use std::fs;

    fn setup(root: &Path) -> (Arc<SqliteLedgerStore>, IndexPipeline) {
        let store = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        let mut repo = Repository::new("acme", root.to_string_lossy().to_string());
        repo.languages = vec![];
        store.register_repo(&repo).unwrap();
        let registry = Arc::new(AdapterRegistry::with_defaults());
        let pipeline = IndexPipeline::new(store.clone(), registry, Vec::new(), 2).unwrap();
        (store, pipeline)
    }

    #[test]
    fn test_initial_pass_new_symbol() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export function foo() {}\n").unwrap();
        let (store, pipeline) = setup(dir.path());

        let outcome = pipeline.run("acme", &IndexOptions::default()).unwrap();
        assert_eq!(outcome.version, Some(1));

        let symbols = store.symbols_by_file("acme", 1, "a.ts").unwrap();
        let foo = symbols.iter().find(|s| s.name == "foo").unwrap();
        assert_eq!(foo.kind, SymbolKind::Function);
        assert!(foo.exported);
        assert!(symbols.iter().any(|s| s.kind == SymbolKind::Module));
    }

    #[test]
    fn test_incremental_pass_import_and_call_edges() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export function foo() {}\n").unwrap();
        let (store, pipeline) = setup(dir.path());
        pipeline.run("acme", &IndexOptions::default()).unwrap();

        fs::write(
            dir.path().join("b.ts"),
            "import {foo} from './a';\nfoo();\n",
        )
        .unwrap();
        let outcome = pipeline.run("acme", &IndexOptions::default()).unwrap();
        assert_eq!(outcome.version, Some(2));

        let b_symbols = store.symbols_by_file("acme", 2, "b.ts").unwrap();
        let module = b_symbols.iter().find(|s| s.kind == SymbolKind::Module).unwrap();

        let edges = store.edges_from("acme", 2, &module.symbol_id).unwrap();
        let import = edges.iter().find(|e| e.kind == EdgeKind::Import).unwrap();
        assert_eq!(import.resolution, ResolutionStrategy::Exact);
        assert!(import.to_symbol_id.as_deref().unwrap().contains("foo"));

        let call = edges.iter().find(|e| e.kind == EdgeKind::Call).unwrap();
        assert_eq!(call.resolution, ResolutionStrategy::Exact);
        assert!(call.confidence >= 0.9);
        store.integrity_check().unwrap();
    }

    #[test]
    fn test_idempotent_reindex_creates_no_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def foo():\n    pass\n").unwrap();
        let (store, pipeline) = setup(dir.path());

        pipeline.run("acme", &IndexOptions::default()).unwrap();
        let again = pipeline.run("acme", &IndexOptions::default()).unwrap();
        assert_eq!(again.version, None);
        assert_eq!(store.head_version("acme").unwrap(), Some(1));
    }

    #[test]
    fn test_removed_file_retires_symbols_and_edges() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export function foo() {}\n").unwrap();
        fs::write(
            dir.path().join("b.ts"),
            "import {foo} from './a';\nfoo();\n",
        )
        .unwrap();
        let (store, pipeline) = setup(dir.path());
        pipeline.run("acme", &IndexOptions::default()).unwrap();

        fs::remove_file(dir.path().join("a.ts")).unwrap();
        let outcome = pipeline.run("acme", &IndexOptions::default()).unwrap();
        let v2 = outcome.version.unwrap();

        // foo retired at v2, edges to it retired with it
        assert!(store
            .symbols_by_file("acme", v2, "a.ts")
            .unwrap()
            .is_empty());
        let b_symbols = store.symbols_by_file("acme", v2, "b.ts").unwrap();
        let module = b_symbols.iter().find(|s| s.kind == SymbolKind::Module).unwrap();
        let live_edges = store.edges_from("acme", v2, &module.symbol_id).unwrap();
        assert!(live_edges.iter().all(|e| e.to_symbol_id.is_none()));
        store.integrity_check().unwrap();
    }

    #[test]
    fn test_cancellation_aborts_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def foo():\n    pass\n").unwrap();
        let (store, pipeline) = setup(dir.path());

        let options = IndexOptions::default();
        options.cancel.cancel();
        let err = pipeline.run("acme", &options).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Canceled);
        assert_eq!(store.head_version("acme").unwrap(), None);
    }

    #[test]
    fn test_should_ignore_patterns() {
        let patterns = vec!["**/generated/**".to_string(), ".min.js".to_string()];
        assert!(should_ignore("src/generated/api.ts", &patterns));
        assert!(should_ignore("dist/app.min.js", &patterns));
        assert!(should_ignore("node_modules/x/index.js", &[]));
        assert!(!should_ignore("src/app.ts", &patterns));
    }

    #[test]
    fn test_canonical_ids_stable_ordinals() {
        use crate::shared::models::{Span, SymbolCandidate};
        use sdl_storage::{Signature, Visibility};

        let candidate = |name: &str, line: u32| SymbolCandidate {
            name: name.to_string(),
            kind: SymbolKind::Function,
            exported: false,
            visibility: Visibility::Private,
            signature: Signature::default(),
            summary: None,
            span: Span::new(line, 0, line + 2, 0),
            ast_fingerprint: "fp".into(),
        };
        let symbols = canonicalize(
            "r",
            "a.py",
            &[candidate("foo", 1), candidate("foo", 10), candidate("bar", 20)],
        );
        assert_eq!(symbols[0].symbol_id, "sym:r:a.py:function:foo#0");
        assert_eq!(symbols[1].symbol_id, "sym:r:a.py:function:foo#1");
        assert_eq!(symbols[2].symbol_id, "sym:r:a.py:function:bar#0");
    }
}
