//! Filesystem adapters for Maestro.

pub mod checkpoint_store;

pub use checkpoint_store::FileCheckpointStore;
