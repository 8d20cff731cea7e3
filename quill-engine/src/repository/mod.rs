//! Repository layer
//!
//! Repositories are stateless adapters over the task service. They provide a
//! narrow interface (start a stage, fetch a status) without any business logic.
//!
//! The trait seam lets the store and sequencer be exercised against scripted
//! fakes in tests.

mod tasks;

pub use tasks::{HttpTaskRepository, TaskRepository};
