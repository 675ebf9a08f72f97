//! Shared model types

pub mod card;
pub mod error;
pub mod extraction;
pub mod span;

pub use card::{estimate_tokens, SymbolCard, CARD_BASE_TOKENS};
pub use error::{CoreError, ErrorKind, Result};
pub use extraction::{CallSite, CallType, FileExtraction, ImportCandidate, SymbolCandidate};
pub use span::Span;
