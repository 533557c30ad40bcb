//! # Snapshot Format
//!
//! Binary snapshot of a [`MemoryStore`].
//!
//! Format: Header (5 bytes) + postcard-serialized store.
//! - 4 bytes: Magic ("FRSH")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is decoded.

use crate::store::MemoryStore;
use crate::types::FreshPressError;

/// Magic bytes opening every snapshot.
pub const MAGIC_BYTES: &[u8; 4] = b"FRSH";

/// Current snapshot version.
pub const FORMAT_VERSION: u8 = 1;

/// Upper bound on snapshot size, checked before decoding.
pub const MAX_SNAPSHOT_SIZE: usize = 256 * 1024 * 1024; // 256 MB

const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), FreshPressError> {
        if &self.magic != MAGIC_BYTES {
            return Err(FreshPressError::SerializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(FreshPressError::SerializationError(format!(
                "Unsupported snapshot version: {} (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FreshPressError> {
        let Some(header) = bytes.get(..HEADER_SIZE) else {
            return Err(FreshPressError::SerializationError(
                "Header too short".to_string(),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        Ok(Self {
            magic,
            version: header[4],
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

/// Encode a store as header + payload.
pub fn store_to_bytes(store: &MemoryStore) -> Result<Vec<u8>, FreshPressError> {
    let payload = postcard::to_stdvec(store)
        .map_err(|e| FreshPressError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&SnapshotHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Decode a snapshot produced by [`store_to_bytes`].
pub fn store_from_bytes(bytes: &[u8]) -> Result<MemoryStore, FreshPressError> {
    if bytes.len() > MAX_SNAPSHOT_SIZE {
        return Err(FreshPressError::SerializationError(format!(
            "Snapshot size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_SIZE
        )));
    }
    let header = SnapshotHeader::from_bytes(bytes)?;
    header.validate()?;

    postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        FreshPressError::SerializationError(format!("Failed to decode snapshot: {e}"))
    })
}

// =============================================================================
// TESTS
// =============================================================================
