//! Shared types for the Gobby daemon.
//!
//! `gobby-core` holds the vocabulary every other crate speaks: typed ids,
//! the unified hook event/response model, machine identity, project
//! context discovery, and the `~/.gobby` directory layout. It depends on
//! nothing else in the workspace so that the hook pipeline, the store and
//! the boundary can all reference the same types without cycles.

pub mod dirs;
pub mod error;
pub mod event;
pub mod ids;
pub mod machine;
pub mod project;

pub use error::{CoreError, CoreResult};
pub use event::{Decision, HookEvent, HookEventType, HookResponse, SessionSource};
pub use ids::{ProjectId, SessionId, TaskId, WorktreeId};
pub use machine::machine_id;
pub use project::ProjectContext;
