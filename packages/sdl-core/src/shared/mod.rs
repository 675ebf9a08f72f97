//! Shared types used across features

pub mod cancel;
pub mod models;

pub use cancel::CancelToken;
