//! Snapshot stream header

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, Result};
use crate::stream::{SnapshotSink, SnapshotSource};
use crate::{SNAPSHOT_MAGIC, SNAPSHOT_VERSION};

/// Size of the encoded header in bytes
pub const HEADER_SIZE: usize = SNAPSHOT_MAGIC.len() + 4 + 4;

/// Fixed-size header at the start of every snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Format version the stream was written with
    pub version: u32,
    /// Chunk capacity (in slots) used for the `NextChunk` protocol
    pub chunk_capacity: u32,
}

impl SnapshotHeader {
    /// Header for the current format version
    pub fn new(chunk_capacity: u32) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            chunk_capacity,
        }
    }

    /// Write the header
    pub fn write(&self, sink: &mut SnapshotSink) {
        sink.put_raw(&SNAPSHOT_MAGIC);
        sink.put_u32(self.version);
        sink.put_u32(self.chunk_capacity);
    }

    /// Read and validate the header
    pub fn read(source: &mut SnapshotSource<'_>) -> Result<Self> {
        if source.remaining() < HEADER_SIZE {
            return Err(FormatError::TruncatedStream {
                offset: source.position(),
                needed: HEADER_SIZE,
            });
        }

        if source.get_raw(SNAPSHOT_MAGIC.len())? != SNAPSHOT_MAGIC {
            return Err(FormatError::InvalidMagic);
        }

        let version = source.get_u32()?;
        if version != SNAPSHOT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let chunk_capacity = source.get_u32()?;
        Ok(Self {
            version,
            chunk_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut sink = SnapshotSink::new();
        SnapshotHeader::new(4096).write(&mut sink);
        assert_eq!(sink.position(), HEADER_SIZE);

        let mut source = SnapshotSource::new(sink.data());
        let header = SnapshotHeader::read(&mut source).unwrap();
        assert_eq!(header.version, SNAPSHOT_VERSION);
        assert_eq!(header.chunk_capacity, 4096);
    }

    #[test]
    fn test_invalid_magic() {
        let bytes = b"INVALID\0........";
        let result = SnapshotHeader::read(&mut SnapshotSource::new(bytes));
        assert_eq!(result, Err(FormatError::InvalidMagic));
    }

    #[test]
    fn test_version_mismatch() {
        let mut sink = SnapshotSink::new();
        SnapshotHeader {
            version: SNAPSHOT_VERSION + 1,
            chunk_capacity: 16,
        }
        .write(&mut sink);
        let result = SnapshotHeader::read(&mut SnapshotSource::new(sink.data()));
        assert_eq!(result, Err(FormatError::UnsupportedVersion(SNAPSHOT_VERSION + 1)));
    }

    #[test]
    fn test_short_header() {
        let result = SnapshotHeader::read(&mut SnapshotSource::new(&SNAPSHOT_MAGIC));
        assert!(matches!(result, Err(FormatError::TruncatedStream { offset: 0, .. })));
    }
}
