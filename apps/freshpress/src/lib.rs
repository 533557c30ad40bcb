//! # FreshPress Application Library
//!
//! HTTP server, CLI, configuration and snapshot handling around
//! `freshpress-core`. The binary in `main.rs` is a thin wrapper so the
//! router can be exercised from integration tests.

pub mod api;
pub mod cli;
pub mod config;
pub mod snapshot;
