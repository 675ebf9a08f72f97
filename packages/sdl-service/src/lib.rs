//! sdl-service: operation facade, sync artifact and CLI plumbing
//!
//! Sits on top of `sdl-core`, exposing the service operations the transport
//! layers call, plus the supplemental surfaces: ledger export/import, the
//! environment doctor, skeleton/window rendering and the stdio serve loop.

pub mod artifact;
pub mod doctor;
pub mod error;
pub mod serve;
pub mod service;
pub mod skeleton;
pub mod window;

pub use error::{Result, ServiceError};
pub use service::{
    CardResponse, PolicyPatch, RefreshOutcome, RegisterRepoRequest, RepoStatus, SdlService,
    SkeletonRequest, SliceRefreshResponse, WindowRequest, WindowResponse,
};
