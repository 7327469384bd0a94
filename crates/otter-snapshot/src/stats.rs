//! Session statistics and serializer output

use otter_snapshot_format::{NUMBER_OF_SPACES, Space};
use serde::{Deserialize, Serialize};

/// Counters collected by one serialize or deserialize session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Objects allocated per space, indexed by space id
    pub objects: [u32; NUMBER_OF_SPACES],
    /// Backreferences emitted or followed
    pub backreferences: u32,
    /// Hot-object references
    pub hot_hits: u32,
    /// Root array references
    pub root_references: u32,
    /// Forward references registered
    pub forward_references: u32,
    /// Objects whose body was deferred
    pub deferred_objects: u32,
    /// Repeat bytecodes
    pub repeats: u32,
    /// Raw words copied
    pub raw_words: u64,
    /// Stream length in bytes
    pub bytes: usize,
}

impl SnapshotStats {
    /// Objects allocated in `space`
    #[inline]
    pub fn objects_in(&self, space: Space) -> u32 {
        self.objects[space.index()]
    }

    /// Objects allocated in all spaces
    pub fn total_objects(&self) -> u32 {
        self.objects.iter().sum()
    }

    /// Render as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A serialized snapshot
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Encoded stream
    pub data: Vec<u8>,
    /// Offsets of the synchronization markers, in stream order
    pub checkpoints: Vec<usize>,
    /// Encoder statistics
    pub stats: SnapshotStats,
}
