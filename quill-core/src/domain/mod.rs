//! Core domain types
//!
//! This module contains the core domain structures used across Quill crates.
//! These types describe the static shape of a workflow (stages and pipeline
//! definitions) and the observed state of the remote tasks that back each stage.

pub mod pipeline;
pub mod stage;
pub mod task;
