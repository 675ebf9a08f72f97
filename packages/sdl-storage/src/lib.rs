//! Symbol/edge ledger persistence
//!
//! Durable, crash-safe storage for the symbol graph, keyed by an append-only
//! per-repo ledger version. WAL-mode SQLite with a single writer and a pool
//! of readers; every indexing pass is one transaction.
//!
//! ## Core invariants
//!
//! 1. Exactly one live row (`last_seen_version IS NULL`) per
//!    `(repo_id, symbol_id)` — enforced by a partial unique index.
//! 2. Resolved edges never dangle: the target symbol is live at the edge's
//!    `first_seen_version`.
//! 3. Versions are strictly increasing per repo; a pass whose parent is no
//!    longer head fails with `StaleParent` and must retry.
//!
//! ## Usage
//!
//! ```rust
//! use sdl_storage::{SqliteLedgerStore, Repository, VersionKind};
//!
//! # fn main() -> sdl_storage::Result<()> {
//! let store = SqliteLedgerStore::in_memory()?;
//! store.register_repo(&Repository::new("my-repo", "/src/my-repo"))?;
//!
//! let pass = store.begin_pass("my-repo", None, VersionKind::Initial)?;
//! let version = pass.commit()?;
//! assert_eq!(version, 1);
//! # Ok(())
//! # }
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, LedgerError, Result};

pub use domain::{
    Edge, EdgeKind, FileRecord, LedgerVersion, Param, RepoCounts, Repository, ResolutionStrategy,
    Signature, Symbol, SymbolHit, SymbolKind, VersionKind, Visibility,
};
pub use infrastructure::{PassWriter, SqliteLedgerStore};
