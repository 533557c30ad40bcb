//! # Formats
//!
//! Byte-level encodings of the reference store. File I/O lives in the app.

pub mod persistence;

pub use persistence::{SnapshotHeader, store_from_bytes, store_to_bytes};
