//! SQLite adapter for the symbol/edge ledger
//!
//! Single-writer, multi-reader over a WAL-mode database. The writer owns one
//! connection behind a mutex; readers draw from a small round-robin pool of
//! read-only connections. All mutations for one indexing pass go through a
//! [`PassWriter`], which wraps a single `BEGIN IMMEDIATE` transaction and
//! rolls back on drop if not committed.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::domain::{
    Edge, EdgeKind, FileRecord, LedgerVersion, RepoCounts, Repository, ResolutionStrategy, Symbol,
    SymbolHit, SymbolKind, VersionKind, Visibility,
};
use crate::error::{ErrorKind, LedgerError, Result};

/// Bumped on every incompatible schema change.
const SCHEMA_VERSION: i64 = 1;

/// Default lock-contention budget before surfacing `StoreBusy`.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default number of pooled read-only connections.
const READER_POOL_SIZE: usize = 4;

const SYMBOL_COLS: &str = "symbol_id, repo_id, file_path, name, kind, exported, visibility, \
     signature, summary, start_line, start_col, end_line, end_col, ast_fingerprint, \
     first_seen_version, last_seen_version";

const EDGE_COLS: &str = "repo_id, from_symbol_id, to_symbol_id, callee_identifier, kind, weight, \
     confidence, resolution, candidate_count, first_seen_version, last_seen_version";

/// Live-at-version predicate; bind the version twice.
const LIVE_AT: &str = "first_seen_version <= ?2 AND (last_seen_version IS NULL OR last_seen_version > ?2)";

/// SQLite-backed ledger store
pub struct SqliteLedgerStore {
    writer: Arc<Mutex<Connection>>,
    readers: Vec<Arc<Mutex<Connection>>>,
    next_reader: AtomicUsize,
}

impl SqliteLedgerStore {
    /// Open (or create) a ledger database at the given path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)?;
        Self::configure(&conn, false)?;
        let store = Self {
            writer: Arc::new(Mutex::new(conn)),
            readers: Self::open_readers(path)?,
            next_reader: AtomicUsize::new(0),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests. Readers share the writer connection since
    /// a `:memory:` database is private to its connection.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn, true)?;
        let store = Self {
            writer: Arc::new(Mutex::new(conn)),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn configure(conn: &Connection, in_memory: bool) -> Result<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if !in_memory {
            let mode: String =
                conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                warn!(mode, "WAL journal mode unavailable, durability degraded");
            }
            conn.execute_batch("PRAGMA synchronous=NORMAL")?;
        }
        conn.execute_batch("PRAGMA foreign_keys=ON")?;
        Ok(())
    }

    fn open_readers(path: &Path) -> Result<Vec<Arc<Mutex<Connection>>>> {
        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA query_only=ON")?;
            readers.push(Arc::new(Mutex::new(conn)));
        }
        Ok(readers)
    }

    /// Pick a reader connection round-robin; in-memory stores fall back to
    /// the writer connection.
    fn reader(&self) -> &Arc<Mutex<Connection>> {
        if self.readers.is_empty() {
            return &self.writer;
        }
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        &self.readers[idx]
    }

    fn lock<'a>(conn: &'a Arc<Mutex<Connection>>) -> MutexGuard<'a, Connection> {
        match conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = Self::lock(&self.writer);

        let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if user_version != 0 && user_version != SCHEMA_VERSION {
            return Err(LedgerError::new(
                ErrorKind::SchemaMismatch,
                format!("database schema v{user_version}, this build expects v{SCHEMA_VERSION}"),
            ));
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS repos (
                repo_id TEXT PRIMARY KEY,
                root_path TEXT NOT NULL,
                languages TEXT NOT NULL,
                ignore_globs TEXT NOT NULL,
                max_file_bytes INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS versions (
                repo_id TEXT NOT NULL REFERENCES repos(repo_id),
                version INTEGER NOT NULL,
                parent_version INTEGER,
                kind TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (repo_id, version)
            );

            CREATE TABLE IF NOT EXISTS version_files (
                repo_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                PRIMARY KEY (repo_id, version, file_path),
                FOREIGN KEY (repo_id, version) REFERENCES versions(repo_id, version)
            );

            CREATE TABLE IF NOT EXISTS files (
                repo_id TEXT NOT NULL REFERENCES repos(repo_id),
                file_path TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                language TEXT NOT NULL,
                last_indexed_version INTEGER NOT NULL,
                PRIMARY KEY (repo_id, file_path)
            );

            CREATE TABLE IF NOT EXISTS symbols (
                id INTEGER PRIMARY KEY,
                symbol_id TEXT NOT NULL,
                repo_id TEXT NOT NULL REFERENCES repos(repo_id),
                file_path TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                exported INTEGER NOT NULL,
                visibility TEXT NOT NULL,
                signature TEXT NOT NULL,
                summary TEXT,
                start_line INTEGER NOT NULL,
                start_col INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                end_col INTEGER NOT NULL,
                ast_fingerprint TEXT NOT NULL,
                first_seen_version INTEGER NOT NULL,
                last_seen_version INTEGER
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_symbols_live
                ON symbols(repo_id, symbol_id) WHERE last_seen_version IS NULL;
            CREATE INDEX IF NOT EXISTS idx_symbols_file
                ON symbols(repo_id, file_path, first_seen_version);
            CREATE INDEX IF NOT EXISTS idx_symbols_name
                ON symbols(repo_id, name);

            CREATE TABLE IF NOT EXISTS edges (
                id INTEGER PRIMARY KEY,
                repo_id TEXT NOT NULL REFERENCES repos(repo_id),
                identity_key TEXT NOT NULL,
                from_symbol_id TEXT NOT NULL,
                to_symbol_id TEXT,
                callee_identifier TEXT,
                kind TEXT NOT NULL,
                weight REAL NOT NULL,
                confidence REAL NOT NULL,
                resolution TEXT NOT NULL,
                candidate_count INTEGER,
                first_seen_version INTEGER NOT NULL,
                last_seen_version INTEGER
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_edges_live
                ON edges(repo_id, identity_key) WHERE last_seen_version IS NULL;
            CREATE INDEX IF NOT EXISTS idx_edges_from
                ON edges(repo_id, from_symbol_id);
            CREATE INDEX IF NOT EXISTS idx_edges_to
                ON edges(repo_id, to_symbol_id);",
        )?;

        conn.execute_batch(&format!("PRAGMA user_version={SCHEMA_VERSION}"))?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Repositories
    // ═══════════════════════════════════════════════════════════════════════

    /// Register a repository; re-registering updates settings but keeps the
    /// original creation timestamp and any indexed history.
    pub fn register_repo(&self, repo: &Repository) -> Result<()> {
        let conn = Self::lock(&self.writer);
        conn.execute(
            "INSERT INTO repos (repo_id, root_path, languages, ignore_globs, max_file_bytes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(repo_id) DO UPDATE SET
                root_path = excluded.root_path,
                languages = excluded.languages,
                ignore_globs = excluded.ignore_globs,
                max_file_bytes = excluded.max_file_bytes",
            params![
                repo.repo_id,
                repo.root_path,
                serde_json::to_string(&repo.languages)?,
                serde_json::to_string(&repo.ignore)?,
                repo.max_file_bytes.map(|v| v as i64),
                repo.created_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn get_repo(&self, repo_id: &str) -> Result<Repository> {
        let conn = Self::lock(self.reader());
        conn.query_row(
            "SELECT repo_id, root_path, languages, ignore_globs, max_file_bytes, created_at
             FROM repos WHERE repo_id = ?1",
            params![repo_id],
            repo_from_row,
        )
        .optional()?
        .ok_or_else(|| LedgerError::repo_not_found(repo_id))
    }

    pub fn list_repos(&self) -> Result<Vec<Repository>> {
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(
            "SELECT repo_id, root_path, languages, ignore_globs, max_file_bytes, created_at
             FROM repos ORDER BY repo_id",
        )?;
        let rows = stmt.query_map([], repo_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Versions
    // ═══════════════════════════════════════════════════════════════════════

    pub fn head_version(&self, repo_id: &str) -> Result<Option<i64>> {
        let conn = Self::lock(self.reader());
        let head: Option<i64> = conn.query_row(
            "SELECT MAX(version) FROM versions WHERE repo_id = ?1",
            params![repo_id],
            |row| row.get(0),
        )?;
        Ok(head)
    }

    pub fn get_version(&self, repo_id: &str, version: i64) -> Result<LedgerVersion> {
        let conn = Self::lock(self.reader());
        conn.query_row(
            "SELECT repo_id, version, parent_version, kind, created_at
             FROM versions WHERE repo_id = ?1 AND version = ?2",
            params![repo_id, version],
            version_from_row,
        )
        .optional()?
        .ok_or_else(|| LedgerError::version_not_found(repo_id, version))
    }

    pub fn list_versions(&self, repo_id: &str) -> Result<Vec<LedgerVersion>> {
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(
            "SELECT repo_id, version, parent_version, kind, created_at
             FROM versions WHERE repo_id = ?1 ORDER BY version",
        )?;
        let rows = stmt.query_map(params![repo_id], version_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Per-file content hashes recorded at `version`.
    pub fn version_files(&self, repo_id: &str, version: i64) -> Result<Vec<(String, String)>> {
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(
            "SELECT file_path, content_hash FROM version_files
             WHERE repo_id = ?1 AND version = ?2 ORDER BY file_path",
        )?;
        let rows = stmt.query_map(params![repo_id, version], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn last_indexed_at(&self, repo_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = Self::lock(self.reader());
        let ts: Option<i64> = conn.query_row(
            "SELECT MAX(created_at) FROM versions WHERE repo_id = ?1",
            params![repo_id],
            |row| row.get(0),
        )?;
        Ok(ts.map(from_timestamp))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Pass writes
    // ═══════════════════════════════════════════════════════════════════════

    /// Open the single write transaction for an indexing pass.
    ///
    /// Creates the new version row immediately; all subsequent mutations land
    /// in the same transaction and become visible atomically at commit.
    /// Fails with `StaleParent` when `parent_version` is not the current head.
    pub fn begin_pass(
        &self,
        repo_id: &str,
        parent_version: Option<i64>,
        kind: VersionKind,
    ) -> Result<PassWriter<'_>> {
        let conn = Self::lock(&self.writer);
        conn.execute_batch("BEGIN IMMEDIATE")?;

        let head: Option<i64> = match conn.query_row(
            "SELECT MAX(version) FROM versions WHERE repo_id = ?1",
            params![repo_id],
            |row| row.get(0),
        ) {
            Ok(head) => head,
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(err.into());
            }
        };

        if head != parent_version {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(LedgerError::stale_parent(repo_id, parent_version, head));
        }

        let version = head.unwrap_or(0) + 1;
        if let Err(err) = conn.execute(
            "INSERT INTO versions (repo_id, version, parent_version, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                repo_id,
                version,
                parent_version,
                kind.as_str(),
                Utc::now().timestamp()
            ],
        ) {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(err.into());
        }

        debug!(repo_id, version, kind = kind.as_str(), "pass transaction opened");
        Ok(PassWriter {
            conn,
            repo_id: repo_id.to_string(),
            version,
            committed: false,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Point-in-time reads
    // ═══════════════════════════════════════════════════════════════════════

    pub fn get_symbol(
        &self,
        repo_id: &str,
        version: i64,
        symbol_id: &str,
    ) -> Result<Option<Symbol>> {
        let conn = Self::lock(self.reader());
        let sym = conn
            .query_row(
                &format!(
                    "SELECT {SYMBOL_COLS} FROM symbols
                     WHERE repo_id = ?1 AND {LIVE_AT} AND symbol_id = ?3"
                ),
                params![repo_id, version, symbol_id],
                symbol_from_row,
            )
            .optional()?;
        Ok(sym)
    }

    pub fn symbols_by_file(
        &self,
        repo_id: &str,
        version: i64,
        file_path: &str,
    ) -> Result<Vec<Symbol>> {
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYMBOL_COLS} FROM symbols
             WHERE repo_id = ?1 AND {LIVE_AT} AND file_path = ?3
             ORDER BY start_line, start_col"
        ))?;
        let rows = stmt.query_map(params![repo_id, version, file_path], symbol_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// All symbols live at `version`, ordered by id for determinism.
    pub fn live_symbols(&self, repo_id: &str, version: i64) -> Result<Vec<Symbol>> {
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYMBOL_COLS} FROM symbols
             WHERE repo_id = ?1 AND {LIVE_AT}
             ORDER BY symbol_id"
        ))?;
        let rows = stmt.query_map(params![repo_id, version], symbol_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Case-insensitive substring search over names and summaries.
    /// Exact name matches score 1.0, everything else 0.5.
    pub fn search_symbols(
        &self,
        repo_id: &str,
        version: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SymbolHit>> {
        let needle = query.to_lowercase();
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(&format!(
            "SELECT symbol_id, name, kind, file_path,
                    CASE WHEN lower(name) = ?3 THEN 1.0 ELSE 0.5 END AS score
             FROM symbols
             WHERE repo_id = ?1 AND {LIVE_AT}
               AND (instr(lower(name), ?3) > 0
                    OR (summary IS NOT NULL AND instr(lower(summary), ?3) > 0))
             ORDER BY score DESC, symbol_id
             LIMIT ?4"
        ))?;
        let rows = stmt.query_map(
            params![repo_id, version, needle, limit as i64],
            |row| {
                let kind_s: String = row.get(2)?;
                Ok(SymbolHit {
                    symbol_id: row.get(0)?,
                    name: row.get(1)?,
                    kind: parse_col(2, &kind_s, SymbolKind::parse)?,
                    file_path: row.get(3)?,
                    score: row.get(4)?,
                })
            },
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn edges_from(&self, repo_id: &str, version: i64, symbol_id: &str) -> Result<Vec<Edge>> {
        self.edges_where(repo_id, version, "from_symbol_id = ?3", symbol_id)
    }

    pub fn edges_to(&self, repo_id: &str, version: i64, symbol_id: &str) -> Result<Vec<Edge>> {
        self.edges_where(repo_id, version, "to_symbol_id = ?3", symbol_id)
    }

    fn edges_where(
        &self,
        repo_id: &str,
        version: i64,
        clause: &str,
        symbol_id: &str,
    ) -> Result<Vec<Edge>> {
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLS} FROM edges
             WHERE repo_id = ?1 AND {LIVE_AT} AND {clause}
             ORDER BY identity_key"
        ))?;
        let rows = stmt.query_map(params![repo_id, version, symbol_id], edge_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// All edges live at `version`, ordered by identity key.
    pub fn edges_by_repo(&self, repo_id: &str, version: i64) -> Result<Vec<Edge>> {
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLS} FROM edges
             WHERE repo_id = ?1 AND {LIVE_AT}
             ORDER BY identity_key"
        ))?;
        let rows = stmt.query_map(params![repo_id, version], edge_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn file_records(&self, repo_id: &str) -> Result<Vec<FileRecord>> {
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(
            "SELECT repo_id, file_path, content_hash, language, last_indexed_version
             FROM files WHERE repo_id = ?1 ORDER BY file_path",
        )?;
        let rows = stmt.query_map(params![repo_id], |row| {
            Ok(FileRecord {
                repo_id: row.get(0)?,
                file_path: row.get(1)?,
                content_hash: row.get(2)?,
                language: row.get(3)?,
                last_indexed_version: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn counts(&self, repo_id: &str, version: i64) -> Result<RepoCounts> {
        let conn = Self::lock(self.reader());
        let file_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM version_files WHERE repo_id = ?1 AND version = ?2",
            params![repo_id, version],
            |row| row.get(0),
        )?;
        let symbol_count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM symbols WHERE repo_id = ?1 AND {LIVE_AT}"),
            params![repo_id, version],
            |row| row.get(0),
        )?;
        let edge_count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM edges WHERE repo_id = ?1 AND {LIVE_AT}"),
            params![repo_id, version],
            |row| row.get(0),
        )?;
        Ok(RepoCounts {
            file_count: file_count as u64,
            symbol_count: symbol_count as u64,
            edge_count: edge_count as u64,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Integrity
    // ═══════════════════════════════════════════════════════════════════════

    /// Verify the persisted invariants: at most one live row per
    /// `(repo, symbol_id)`, no resolved edge pointing at a symbol that was
    /// not live when the edge was first seen, and foreign-key consistency.
    pub fn integrity_check(&self) -> Result<()> {
        let conn = Self::lock(self.reader());

        let dup_live: i64 = conn.query_row(
            "SELECT COUNT(*) FROM (
                SELECT 1 FROM symbols WHERE last_seen_version IS NULL
                GROUP BY repo_id, symbol_id HAVING COUNT(*) > 1
             )",
            [],
            |row| row.get(0),
        )?;
        if dup_live > 0 {
            return Err(LedgerError::integrity(format!(
                "{dup_live} symbol id(s) with more than one live row"
            )));
        }

        let dangling: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges e
             WHERE e.to_symbol_id IS NOT NULL
               AND NOT EXISTS (
                 SELECT 1 FROM symbols s
                 WHERE s.repo_id = e.repo_id
                   AND s.symbol_id = e.to_symbol_id
                   AND s.first_seen_version <= e.first_seen_version
                   AND (s.last_seen_version IS NULL
                        OR s.last_seen_version > e.first_seen_version)
               )",
            [],
            |row| row.get(0),
        )?;
        if dangling > 0 {
            return Err(LedgerError::integrity(format!(
                "{dangling} resolved edge(s) reference symbols absent at their first version"
            )));
        }

        let fk_violations: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_foreign_key_check",
            [],
            |row| row.get(0),
        )?;
        if fk_violations > 0 {
            return Err(LedgerError::integrity(format!(
                "{fk_violations} foreign key violation(s)"
            )));
        }

        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bulk dump/restore (sync artifact)
    // ═══════════════════════════════════════════════════════════════════════

    /// All symbol observations for a repo, retired rows included.
    pub fn dump_symbols(&self, repo_id: &str) -> Result<Vec<Symbol>> {
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYMBOL_COLS} FROM symbols WHERE repo_id = ?1
             ORDER BY symbol_id, first_seen_version"
        ))?;
        let rows = stmt.query_map(params![repo_id], symbol_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// All edge observations for a repo, retired rows included.
    pub fn dump_edges(&self, repo_id: &str) -> Result<Vec<Edge>> {
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLS} FROM edges WHERE repo_id = ?1
             ORDER BY identity_key, first_seen_version"
        ))?;
        let rows = stmt.query_map(params![repo_id], edge_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// All version-file rows for a repo: `(version, path, hash)`.
    pub fn dump_version_files(&self, repo_id: &str) -> Result<Vec<(i64, String, String)>> {
        let conn = Self::lock(self.reader());
        let mut stmt = conn.prepare(
            "SELECT version, file_path, content_hash FROM version_files
             WHERE repo_id = ?1 ORDER BY version, file_path",
        )?;
        let rows = stmt.query_map(params![repo_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Replace a repo's entire ledger history in one transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn restore_repo(
        &self,
        repo: &Repository,
        versions: &[LedgerVersion],
        version_files: &[(i64, String, String)],
        files: &[FileRecord],
        symbols: &[Symbol],
        edges: &[Edge],
    ) -> Result<()> {
        let conn = Self::lock(&self.writer);
        conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = Self::restore_in_txn(&conn, repo, versions, version_files, files, symbols, edges);
        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }

    fn restore_in_txn(
        conn: &Connection,
        repo: &Repository,
        versions: &[LedgerVersion],
        version_files: &[(i64, String, String)],
        files: &[FileRecord],
        symbols: &[Symbol],
        edges: &[Edge],
    ) -> Result<()> {
        for table in ["edges", "symbols", "version_files", "files", "versions"] {
            conn.execute(
                &format!("DELETE FROM {table} WHERE repo_id = ?1"),
                params![repo.repo_id],
            )?;
        }
        conn.execute("DELETE FROM repos WHERE repo_id = ?1", params![repo.repo_id])?;
        conn.execute(
            "INSERT INTO repos (repo_id, root_path, languages, ignore_globs, max_file_bytes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                repo.repo_id,
                repo.root_path,
                serde_json::to_string(&repo.languages)?,
                serde_json::to_string(&repo.ignore)?,
                repo.max_file_bytes.map(|v| v as i64),
                repo.created_at.timestamp(),
            ],
        )?;
        for v in versions {
            conn.execute(
                "INSERT INTO versions (repo_id, version, parent_version, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    v.repo_id,
                    v.version,
                    v.parent_version,
                    v.kind.as_str(),
                    v.created_at.timestamp()
                ],
            )?;
        }
        for (version, path, hash) in version_files {
            conn.execute(
                "INSERT INTO version_files (repo_id, version, file_path, content_hash)
                 VALUES (?1, ?2, ?3, ?4)",
                params![repo.repo_id, version, path, hash],
            )?;
        }
        for f in files {
            conn.execute(
                "INSERT INTO files (repo_id, file_path, content_hash, language, last_indexed_version)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![f.repo_id, f.file_path, f.content_hash, f.language, f.last_indexed_version],
            )?;
        }
        for s in symbols {
            insert_symbol_row(conn, s)?;
        }
        for e in edges {
            insert_edge_row(conn, e)?;
        }
        Ok(())
    }
}

/// Transaction-scoped writer for one indexing pass.
///
/// Dropping without `commit()` rolls the whole pass back, including the
/// version row created by `begin_pass`.
#[derive(Debug)]
pub struct PassWriter<'a> {
    conn: MutexGuard<'a, Connection>,
    repo_id: String,
    version: i64,
    committed: bool,
}

impl PassWriter<'_> {
    /// The version id this pass writes under.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Insert a fresh observation for `symbol`, retiring any live row with
    /// the same id at this version first.
    pub fn upsert_symbol(&mut self, symbol: &Symbol) -> Result<()> {
        self.conn.execute(
            "UPDATE symbols SET last_seen_version = ?3
             WHERE repo_id = ?1 AND symbol_id = ?2 AND last_seen_version IS NULL",
            params![self.repo_id, symbol.symbol_id, self.version],
        )?;
        let observed = Symbol {
            first_seen_version: self.version,
            last_seen_version: None,
            ..symbol.clone()
        };
        insert_symbol_row(&self.conn, &observed)?;
        Ok(())
    }

    /// Retire the live row for `symbol_id` at this version, if present.
    pub fn retire_symbol(&mut self, symbol_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE symbols SET last_seen_version = ?3
             WHERE repo_id = ?1 AND symbol_id = ?2 AND last_seen_version IS NULL",
            params![self.repo_id, symbol_id, self.version],
        )?;
        Ok(())
    }

    /// Insert a fresh edge observation, retiring the live row with the same
    /// identity key first (this is how resolution upgrades land).
    pub fn upsert_edge(&mut self, edge: &Edge) -> Result<()> {
        let key = edge.identity_key();
        self.conn.execute(
            "UPDATE edges SET last_seen_version = ?3
             WHERE repo_id = ?1 AND identity_key = ?2 AND last_seen_version IS NULL",
            params![self.repo_id, key, self.version],
        )?;
        let observed = Edge {
            first_seen_version: self.version,
            last_seen_version: None,
            ..edge.clone()
        };
        insert_edge_row(&self.conn, &observed)?;
        Ok(())
    }

    pub fn retire_edge(&mut self, identity_key: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE edges SET last_seen_version = ?3
             WHERE repo_id = ?1 AND identity_key = ?2 AND last_seen_version IS NULL",
            params![self.repo_id, identity_key, self.version],
        )?;
        Ok(())
    }

    /// Retire all live edges whose source or resolved target is `symbol_id`.
    /// Keeps the non-dangling invariant when a symbol is retired.
    pub fn retire_edges_touching(&mut self, symbol_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE edges SET last_seen_version = ?3
             WHERE repo_id = ?1 AND last_seen_version IS NULL
               AND (from_symbol_id = ?2 OR to_symbol_id = ?2)",
            params![self.repo_id, symbol_id, self.version],
        )?;
        Ok(())
    }

    /// Upsert the current-state row for a file.
    pub fn record_file(&mut self, record: &FileRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO files (repo_id, file_path, content_hash, language, last_indexed_version)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(repo_id, file_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                language = excluded.language,
                last_indexed_version = excluded.last_indexed_version",
            params![
                self.repo_id,
                record.file_path,
                record.content_hash,
                record.language,
                record.last_indexed_version
            ],
        )?;
        Ok(())
    }

    pub fn remove_file(&mut self, file_path: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM files WHERE repo_id = ?1 AND file_path = ?2",
            params![self.repo_id, file_path],
        )?;
        Ok(())
    }

    /// Record one entry of this version's per-file fingerprint map.
    pub fn record_version_file(&mut self, file_path: &str, content_hash: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO version_files (repo_id, version, file_path, content_hash)
             VALUES (?1, ?2, ?3, ?4)",
            params![self.repo_id, self.version, file_path, content_hash],
        )?;
        Ok(())
    }

    pub fn commit(mut self) -> Result<i64> {
        self.conn.execute_batch("COMMIT")?;
        self.committed = true;
        debug!(repo_id = %self.repo_id, version = self.version, "pass committed");
        Ok(self.version)
    }
}

impl Drop for PassWriter<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(repo_id = %self.repo_id, %err, "pass rollback failed");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════════════════════════════════════

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn parse_col<T>(
    idx: usize,
    raw: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unrecognized value: {raw}").into(),
        )
    })
}

fn repo_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    let languages_s: String = row.get(2)?;
    let ignore_s: String = row.get(3)?;
    Ok(Repository {
        repo_id: row.get(0)?,
        root_path: row.get(1)?,
        languages: serde_json::from_str(&languages_s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        ignore: serde_json::from_str(&ignore_s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        max_file_bytes: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        created_at: from_timestamp(row.get(5)?),
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerVersion> {
    let kind_s: String = row.get(3)?;
    Ok(LedgerVersion {
        repo_id: row.get(0)?,
        version: row.get(1)?,
        parent_version: row.get(2)?,
        kind: parse_col(3, &kind_s, VersionKind::parse)?,
        created_at: from_timestamp(row.get(4)?),
    })
}

fn symbol_from_row(row: &Row<'_>) -> rusqlite::Result<Symbol> {
    let kind_s: String = row.get(4)?;
    let visibility_s: String = row.get(6)?;
    let signature_s: String = row.get(7)?;
    Ok(Symbol {
        symbol_id: row.get(0)?,
        repo_id: row.get(1)?,
        file_path: row.get(2)?,
        name: row.get(3)?,
        kind: parse_col(4, &kind_s, SymbolKind::parse)?,
        exported: row.get(5)?,
        visibility: parse_col(6, &visibility_s, Visibility::parse)?,
        signature: serde_json::from_str(&signature_s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?,
        summary: row.get(8)?,
        start_line: row.get::<_, i64>(9)? as u32,
        start_col: row.get::<_, i64>(10)? as u32,
        end_line: row.get::<_, i64>(11)? as u32,
        end_col: row.get::<_, i64>(12)? as u32,
        ast_fingerprint: row.get(13)?,
        first_seen_version: row.get(14)?,
        last_seen_version: row.get(15)?,
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<Edge> {
    let kind_s: String = row.get(4)?;
    let resolution_s: String = row.get(7)?;
    Ok(Edge {
        repo_id: row.get(0)?,
        from_symbol_id: row.get(1)?,
        to_symbol_id: row.get(2)?,
        callee_identifier: row.get(3)?,
        kind: parse_col(4, &kind_s, EdgeKind::parse)?,
        weight: row.get(5)?,
        confidence: row.get(6)?,
        resolution: parse_col(7, &resolution_s, ResolutionStrategy::parse)?,
        candidate_count: row.get::<_, Option<i64>>(8)?.map(|v| v as u32),
        first_seen_version: row.get(9)?,
        last_seen_version: row.get(10)?,
    })
}

fn insert_symbol_row(conn: &Connection, s: &Symbol) -> Result<()> {
    conn.execute(
        "INSERT INTO symbols (symbol_id, repo_id, file_path, name, kind, exported, visibility,
                              signature, summary, start_line, start_col, end_line, end_col,
                              ast_fingerprint, first_seen_version, last_seen_version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            s.symbol_id,
            s.repo_id,
            s.file_path,
            s.name,
            s.kind.as_str(),
            s.exported,
            s.visibility.as_str(),
            serde_json::to_string(&s.signature)?,
            s.summary,
            s.start_line,
            s.start_col,
            s.end_line,
            s.end_col,
            s.ast_fingerprint,
            s.first_seen_version,
            s.last_seen_version,
        ],
    )?;
    Ok(())
}

fn insert_edge_row(conn: &Connection, e: &Edge) -> Result<()> {
    conn.execute(
        "INSERT INTO edges (repo_id, identity_key, from_symbol_id, to_symbol_id,
                            callee_identifier, kind, weight, confidence, resolution,
                            candidate_count, first_seen_version, last_seen_version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            e.repo_id,
            e.identity_key(),
            e.from_symbol_id,
            e.to_symbol_id,
            e.callee_identifier,
            e.kind.as_str(),
            e.weight,
            e.confidence,
            e.resolution.as_str(),
            e.candidate_count.map(|v| v as i64),
            e.first_seen_version,
            e.last_seen_version,
        ],
    )?;
    Ok(())
}
