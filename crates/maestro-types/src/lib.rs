//! Shared domain types for Maestro.
//!
//! This crate contains the data the workflow engine passes around:
//! workflow and step definitions, tasks, agent results, checkpoints,
//! configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod task;
pub mod workflow;
