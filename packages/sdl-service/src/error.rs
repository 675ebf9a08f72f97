//! Service-level errors
//!
//! Input errors carry machine-readable codes for the transport layer;
//! store and core errors convert in via `#[from]`.

use thiserror::Error;

use sdl_core::CoreError;
use sdl_storage::LedgerError;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("unknown repo: {0}")]
    UnknownRepo(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("repo {0} has no indexed version yet")]
    NotIndexed(String),

    #[error("stale version: {0}")]
    StaleVersion(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    /// Machine-readable code for transports.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::UnknownRepo(_) => "UnknownRepo",
            ServiceError::UnknownSymbol(_) => "UnknownSymbol",
            ServiceError::NotIndexed(_) => "NotIndexed",
            ServiceError::StaleVersion(_) => "StaleVersion",
            ServiceError::BudgetExceeded(_) => "BudgetExceeded",
            ServiceError::InvalidQuery(_) => "InvalidQuery",
            ServiceError::Ledger(err) => match err.kind {
                sdl_storage::ErrorKind::StoreBusy => "StoreBusy",
                sdl_storage::ErrorKind::StaleParent => "StaleParent",
                sdl_storage::ErrorKind::IntegrityViolation => "IntegrityViolation",
                sdl_storage::ErrorKind::SchemaMismatch => "SchemaMismatch",
                _ => "StoreError",
            },
            ServiceError::Core(err) => match err.kind {
                sdl_core::ErrorKind::Config => "ConfigInvalid",
                sdl_core::ErrorKind::Canceled => "Canceled",
                sdl_core::ErrorKind::StoreContention => "StoreBusy",
                _ => "InternalError",
            },
            ServiceError::Io(_) => "IoError",
            ServiceError::Serialization(_) => "SerializationError",
        }
    }

    /// CLI exit code: 1 config/usage, 2 environment, 3 store.
    pub fn exit_code(&self) -> i32 {
        match self {
            ServiceError::Ledger(_) => 3,
            ServiceError::Core(err) if err.kind == sdl_core::ErrorKind::Store => 3,
            ServiceError::Core(err) if err.kind == sdl_core::ErrorKind::StoreContention => 3,
            _ => 1,
        }
    }
}
