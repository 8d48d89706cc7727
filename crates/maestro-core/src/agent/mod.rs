//! Agent ports for Maestro.
//!
//! - `AgentRunner`: performs the actual work of a task
//! - `PromptBuilder`: renders the prompt a task would send (used for cache fingerprints)
//! - `BoxAgentRunner` / `BoxPromptBuilder`: type-erased wrappers so the engine is not generic

pub mod box_runner;
pub mod runner;
