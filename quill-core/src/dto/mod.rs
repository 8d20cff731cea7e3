//! Data Transfer Objects
//!
//! This module contains DTOs exchanged with the remote task service and the
//! shape of a saved session. DTOs are lightweight representations of domain
//! entities optimized for network transfer and storage.

pub mod session;
pub mod task;
