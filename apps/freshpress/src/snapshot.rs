//! # Snapshot Files
//!
//! File I/O around the core snapshot codec. Writes go to a sibling
//! temporary file that is renamed over the target.

use freshpress_core::{FreshPressError, MemoryStore, store_from_bytes, store_to_bytes};
use std::path::Path;

/// Largest snapshot file read from disk (256 MB).
const MAX_SNAPSHOT_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Read a snapshot, or start an empty store rooted at `home` when the file
/// does not exist yet.
pub fn load_or_create_store(path: &Path, home: &str) -> Result<MemoryStore, FreshPressError> {
    if !path.exists() {
        tracing::info!(event = "snapshot_missing", path = %path.display(), "Starting with an empty store");
        return Ok(MemoryStore::new(home));
    }
    load_store(path)
}

pub fn load_store(path: &Path) -> Result<MemoryStore, FreshPressError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| FreshPressError::IoError(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > MAX_SNAPSHOT_FILE_SIZE {
        return Err(FreshPressError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_SNAPSHOT_FILE_SIZE
        )));
    }
    let bytes = std::fs::read(path)
        .map_err(|e| FreshPressError::IoError(format!("Failed to read '{}': {}", path.display(), e)))?;
    store_from_bytes(&bytes)
}

pub fn save_store(path: &Path, store: &MemoryStore) -> Result<(), FreshPressError> {
    let bytes = store_to_bytes(store)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, &bytes)
        .map_err(|e| FreshPressError::IoError(format!("Failed to write snapshot: {}", e)))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| FreshPressError::IoError(format!("Failed to replace snapshot: {}", e)))?;
    tracing::debug!(event = "snapshot_saved", path = %path.display(), bytes = bytes.len());
    Ok(())
}
