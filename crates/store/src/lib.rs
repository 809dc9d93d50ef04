//! tagscope store: the result cache, pagination state and the controller that owns them.
//!
//! Consumers never mutate results directly. They send intents through a
//! [`ControllerHandle`] and read immutable [`ViewSnapshot`]s published after every
//! processed event.

#![forbid(unsafe_code)]

use tagscope_api::ApiError;
use tagscope_core::{EngineStatus, FieldGroup, Tag};

mod actor;
mod cache;
pub mod controller;
mod debounce;
mod pagination;
mod scroll;

pub use actor::{spawn_controller, ControllerHandle, ViewHandle};
pub use cache::ResultCache;
pub use controller::{Controller, ControllerConfig, FetchError, FetchKind, FetchOutcome, FetchTicket};
pub use debounce::Debouncer;
pub use pagination::PaginationState;
pub use scroll::ScrollPosition;

/// Immutable copy of everything a view renders.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub epoch: u64,
    /// Filter/sort generation the displayed results belong to.
    pub generation: u64,
    pub tags: Vec<Tag>,
    pub fields: Vec<FieldGroup>,
    pub cache: ResultCache,
    pub pagination: PaginationState,
    /// Latest failure, cleared by the next successful fetch.
    pub last_error: Option<ApiError>,
    pub engine: Option<EngineStatus>,
}
