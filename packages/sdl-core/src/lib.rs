//! sdl-core: indexing pipeline, symbol graph engines and policy gate
//!
//! The core of the Symbol Delta Ledger: language adapters extract symbol
//! candidates, the indexing pipeline diffs them into the version-addressed
//! ledger, and the slice/delta engines assemble bounded graph views on top.
//! Raw code access runs through the policy engine; read results are cached
//! under `(repo, key, version)` keys.
//!
//! Component map:
//!
//! - [`features::parsing`] — per-language AST adapters (tree-sitter)
//! - [`features::versioning`] — scan-vs-head change detection
//! - [`features::indexing`] — the pipeline (walk, hash, extract, commit)
//! - [`features::resolve`] — call-edge resolution strategies
//! - [`features::slicing`] — budgeted graph slices with frontier
//! - [`features::delta`] — version deltas and blast radius
//! - [`features::policy`] — rule pipeline gating raw code windows
//! - [`features::cache`] — version-keyed LRU
//! - [`features::watcher`] — debounced filesystem change stream

pub mod config;
pub mod features;
pub mod shared;

pub use config::SdlConfig;
pub use shared::models::{CoreError, ErrorKind, Result};
pub use shared::CancelToken;

// Re-export the storage crate so downstream callers need one dependency.
pub use sdl_storage;
