//! Error types for sdl-storage

use std::fmt;
use thiserror::Error;

/// Ledger error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// SQLite-level errors
    Database,
    /// Lock contention beyond the busy timeout (retriable)
    StoreBusy,
    /// Version creation observed a parent that is no longer head (retriable)
    StaleParent,
    /// A persisted invariant no longer holds (fatal)
    IntegrityViolation,
    /// On-disk schema does not match this build (fatal)
    SchemaMismatch,
    /// Repository not found
    RepoNotFound,
    /// Version not found
    VersionNotFound,
    /// Symbol not found
    SymbolNotFound,
    /// Serialization/deserialization errors
    Serialization,
    /// I/O errors
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::StoreBusy => "store_busy",
            ErrorKind::StaleParent => "stale_parent",
            ErrorKind::IntegrityViolation => "integrity_violation",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::RepoNotFound => "repo_not_found",
            ErrorKind::VersionNotFound => "version_not_found",
            ErrorKind::SymbolNotFound => "symbol_not_found",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Io => "io",
        }
    }

    /// Whether callers may retry the failed operation as-is.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorKind::StoreBusy | ErrorKind::StaleParent)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct LedgerError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl LedgerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreBusy, message)
    }

    pub fn stale_parent(repo_id: &str, expected: Option<i64>, actual: Option<i64>) -> Self {
        Self::new(
            ErrorKind::StaleParent,
            format!(
                "repo {repo_id}: parent version {expected:?} is stale (head is {actual:?})"
            ),
        )
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IntegrityViolation, message)
    }

    pub fn repo_not_found(repo_id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RepoNotFound,
            format!("repository not found: {}", repo_id.into()),
        )
    }

    pub fn version_not_found(repo_id: &str, version: i64) -> Self {
        Self::new(
            ErrorKind::VersionNotFound,
            format!("repo {repo_id}: version {version} not found"),
        )
    }

    pub fn symbol_not_found(symbol_id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::SymbolNotFound,
            format!("symbol not found: {}", symbol_id.into()),
        )
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        // SQLITE_BUSY / SQLITE_LOCKED surface as the retriable StoreBusy kind.
        let busy = matches!(
            &err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
        );
        if busy {
            LedgerError::busy(format!("SQLite busy: {err}")).with_source(err)
        } else {
            LedgerError::database(format!("SQLite error: {err}")).with_source(err)
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::serialization(format!("JSON error: {err}")).with_source(err)
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::new(ErrorKind::Io, format!("I/O error: {err}")).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LedgerError::repo_not_found("acme");
        let msg = format!("{}", err);
        assert!(msg.contains("repo_not_found"));
        assert!(msg.contains("acme"));
    }

    #[test]
    fn test_stale_parent_is_retriable() {
        let err = LedgerError::stale_parent("acme", Some(3), Some(4));
        assert_eq!(err.kind, ErrorKind::StaleParent);
        assert!(err.kind.is_retriable());
        assert!(err.message.contains("head is Some(4)"));
    }

    #[test]
    fn test_busy_detection() {
        let sqlite_err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        let err: LedgerError = sqlite_err.into();
        assert_eq!(err.kind, ErrorKind::StoreBusy);
        assert!(err.kind.is_retriable());
    }

    #[test]
    fn test_integrity_is_fatal() {
        let err = LedgerError::integrity("two live rows for sym:a");
        assert!(!err.kind.is_retriable());
    }

    #[test]
    fn test_result_propagation() {
        fn inner() -> Result<()> {
            Err(LedgerError::version_not_found("acme", 9))
        }

        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }

        let err = outer().unwrap_err();
        assert_eq!(err.kind, ErrorKind::VersionNotFound);
    }
}
