//! Sync artifact: pack/unpack one repo's ledger as a single JSON blob
//!
//! Export captures the full observation history (retired rows included) so
//! an import reproduces head version, counts and point-in-time reads
//! exactly. The artifact is versioned; mismatched formats are rejected.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use sdl_core::sdl_storage::{
    Edge, FileRecord, LedgerVersion, Repository, SqliteLedgerStore, Symbol,
};

use crate::error::{Result, ServiceError};

pub const ARTIFACT_FORMAT: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerArtifact {
    pub format_version: u32,
    pub repo: Repository,
    pub versions: Vec<LedgerVersion>,
    /// `(version, file_path, content_hash)` triples
    pub version_files: Vec<(i64, String, String)>,
    pub files: Vec<FileRecord>,
    pub symbols: Vec<Symbol>,
    pub edges: Vec<Edge>,
}

/// Pack a repo's entire ledger.
pub fn export(store: &Arc<SqliteLedgerStore>, repo_id: &str) -> Result<LedgerArtifact> {
    let repo = store
        .get_repo(repo_id)
        .map_err(|_| ServiceError::UnknownRepo(repo_id.to_string()))?;
    let artifact = LedgerArtifact {
        format_version: ARTIFACT_FORMAT,
        repo,
        versions: store.list_versions(repo_id)?,
        version_files: store.dump_version_files(repo_id)?,
        files: store.file_records(repo_id)?,
        symbols: store.dump_symbols(repo_id)?,
        edges: store.dump_edges(repo_id)?,
    };
    info!(
        repo_id,
        versions = artifact.versions.len(),
        symbols = artifact.symbols.len(),
        edges = artifact.edges.len(),
        "ledger exported"
    );
    Ok(artifact)
}

/// Restore a repo's ledger, replacing any existing history for that repo.
pub fn import(store: &Arc<SqliteLedgerStore>, artifact: &LedgerArtifact) -> Result<()> {
    if artifact.format_version != ARTIFACT_FORMAT {
        return Err(ServiceError::InvalidQuery(format!(
            "artifact format v{} not supported (expected v{ARTIFACT_FORMAT})",
            artifact.format_version
        )));
    }
    store.restore_repo(
        &artifact.repo,
        &artifact.versions,
        &artifact.version_files,
        &artifact.files,
        &artifact.symbols,
        &artifact.edges,
    )?;
    store.integrity_check()?;
    info!(repo_id = %artifact.repo.repo_id, "ledger imported");
    Ok(())
}

/// Stable fingerprint over a repo's status: head version plus live counts.
/// Identical before export and after import.
pub fn status_fingerprint(store: &Arc<SqliteLedgerStore>, repo_id: &str) -> Result<String> {
    let head = store.head_version(repo_id)?;
    let counts = match head {
        Some(v) => store.counts(repo_id, v)?,
        None => Default::default(),
    };
    let payload = format!(
        "{repo_id}|{:?}|{}|{}|{}",
        head, counts.file_count, counts.symbol_count, counts.edge_count
    );
    Ok(blake3::hash(payload.as_bytes()).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdl_core::sdl_storage::{Signature, SymbolKind, VersionKind, Visibility};

    fn populated_store() -> Arc<SqliteLedgerStore> {
        let store = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        store
            .register_repo(&Repository::new("acme", "/src/acme"))
            .unwrap();
        let mut pass = store.begin_pass("acme", None, VersionKind::Initial).unwrap();
        pass.upsert_symbol(&Symbol {
            symbol_id: "sym:a".into(),
            repo_id: "acme".into(),
            file_path: "a.rs".into(),
            name: "a".into(),
            kind: SymbolKind::Function,
            exported: true,
            visibility: Visibility::Public,
            signature: Signature::default(),
            summary: None,
            start_line: 1,
            start_col: 0,
            end_line: 2,
            end_col: 1,
            ast_fingerprint: "fp".into(),
            first_seen_version: 0,
            last_seen_version: None,
        })
        .unwrap();
        pass.record_version_file("a.rs", "h1").unwrap();
        pass.commit().unwrap();
        store
    }

    #[test]
    fn test_round_trip_preserves_fingerprint() {
        let source = populated_store();
        let artifact = export(&source, "acme").unwrap();
        let before = status_fingerprint(&source, "acme").unwrap();

        let target = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        import(&target, &artifact).unwrap();
        let after = status_fingerprint(&target, "acme").unwrap();

        assert_eq!(before, after);
        assert_eq!(target.head_version("acme").unwrap(), Some(1));
    }

    #[test]
    fn test_format_mismatch_rejected() {
        let source = populated_store();
        let mut artifact = export(&source, "acme").unwrap();
        artifact.format_version = 99;

        let target = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        let err = import(&target, &artifact).unwrap_err();
        assert_eq!(err.code(), "InvalidQuery");
    }

    #[test]
    fn test_export_unknown_repo() {
        let store = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        assert_eq!(export(&store, "ghost").unwrap_err().code(), "UnknownRepo");
    }

    #[test]
    fn test_artifact_serde_round_trip() {
        let source = populated_store();
        let artifact = export(&source, "acme").unwrap();
        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: LedgerArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.symbols.len(), artifact.symbols.len());
    }
}
