//! Workflow execution engine and port traits for Maestro.
//!
//! This crate defines the ports (`AgentRunner`, `PromptBuilder`,
//! `CheckpointStore`) that callers and the infrastructure layer implement,
//! and the engine that drives workflows through them. It depends only on
//! `maestro-types` -- never on `maestro-infra` or any database crate.

pub mod agent;
pub mod repository;
pub mod workflow;
