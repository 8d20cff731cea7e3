//! Quill Engine
//!
//! Drives multi-stage workflows against the remote task service.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repository: Trait seam over the HTTP client (start stage, fetch status)
//! - Store: Single owner of the pipeline instance and its task records
//! - Scheduler: Task poller and the pipeline sequencer that walks the stages
//! - Session: Save and load the resumable part of a pipeline instance
//!
//! Everything runs on the caller's task. The sequencer is the only writer of
//! the store and polling timers report back to it over a channel, so no locks
//! are involved.

pub mod config;
pub mod error;
pub mod repository;
pub mod scheduler;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{OrchestratorError, Result};
pub use repository::{HttpTaskRepository, TaskRepository};
pub use scheduler::{PollEvent, Sequencer, TaskPoller};
pub use store::{OrchestrationStore, PipelineSnapshot, ProjectSeed};
