//! Unified error type for the core crate
//!
//! Categorized by subsystem, with optional file/line context and source
//! chaining. Store-layer errors convert in while keeping their retriability
//! visible through `is_retriable`.

use std::fmt;

use sdl_storage::LedgerError;

/// Error kind categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Parsing errors
    Parse,
    /// Symbol/import/call extraction errors
    Extract,
    /// Indexing pipeline errors
    Index,
    /// Call resolution errors
    Resolve,
    /// Slice engine errors
    Slice,
    /// Delta engine errors
    Delta,
    /// Policy evaluation errors
    Policy,
    /// Cache errors
    Cache,
    /// Watcher errors
    Watch,
    /// Configuration errors (fatal)
    Config,
    /// Ledger store errors
    Store,
    /// A retriable store conflict (busy / stale parent) that outlived its
    /// retry budget
    StoreContention,
    /// Operation canceled via its cancellation token
    Canceled,
    /// IO errors
    Io,
    /// Internal errors (bugs)
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Extract => "extract",
            ErrorKind::Index => "index",
            ErrorKind::Resolve => "resolve",
            ErrorKind::Slice => "slice",
            ErrorKind::Delta => "delta",
            ErrorKind::Policy => "policy",
            ErrorKind::Cache => "cache",
            ErrorKind::Watch => "watch",
            ErrorKind::Config => "config",
            ErrorKind::Store => "store",
            ErrorKind::StoreContention => "store_contention",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Unified error type
#[derive(Debug)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub file_path: Option<String>,
    pub line: Option<u32>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file_path: None,
            line: None,
            source: None,
        }
    }

    pub fn with_file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, message)
    }

    pub fn slice(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Slice, message)
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Policy, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn watch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Watch, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)?;
        if let Some(ref file) = self.file_path {
            write!(f, " in {}", file)?;
            if let Some(line) = self.line {
                write!(f, ":{}", line)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<LedgerError> for CoreError {
    fn from(err: LedgerError) -> Self {
        let kind = if err.kind.is_retriable() {
            ErrorKind::StoreContention
        } else {
            ErrorKind::Store
        };
        CoreError::new(kind, err.to_string()).with_source(err)
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::new(ErrorKind::Io, format!("I/O error: {err}")).with_source(err)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::new(ErrorKind::Internal, format!("JSON error: {err}")).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::parse("unexpected token")
            .with_file("test.py")
            .with_line(42);

        let msg = format!("{}", err);
        assert!(msg.contains("parse"));
        assert!(msg.contains("unexpected token"));
        assert!(msg.contains("test.py"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_retriable_store_errors_keep_their_kind() {
        let busy = LedgerError::busy("locked");
        let err: CoreError = busy.into();
        assert_eq!(err.kind, ErrorKind::StoreContention);

        let fatal = LedgerError::integrity("dup live rows");
        let err: CoreError = fatal.into();
        assert_eq!(err.kind, ErrorKind::Store);
    }
}
