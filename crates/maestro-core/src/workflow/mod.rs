//! Workflow execution: step resolution, caching, retry, checkpointing and
//! the engine that drives them.

pub mod cache;
pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod group;
pub mod retry;
pub mod shutdown;
pub mod task_executor;

#[cfg(test)]
pub(crate) mod testing;
