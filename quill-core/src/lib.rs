//! Quill Core
//!
//! Core types and abstractions for the Quill stage orchestrator.
//!
//! This crate contains:
//! - Domain types: Stages, pipeline definitions, task records and the pipeline state machine
//! - DTOs: Wire types exchanged with the remote task service
//! - Progress: Pure aggregation of stage and task state into an overall percentage and ETA

pub mod domain;
pub mod dto;
pub mod progress;
