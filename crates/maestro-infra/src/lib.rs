//! Infrastructure layer for Maestro.
//!
//! Contains implementations of the ports defined in `maestro-core`: checkpoint
//! stores backed by JSON files and SQLite, and the `config.toml` loader.

pub mod config;
pub mod filesystem;
pub mod sqlite;
