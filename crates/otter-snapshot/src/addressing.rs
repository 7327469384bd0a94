//! Space and backreference addressing
//!
//! Objects are numbered per space in allocation order. The encoder maps
//! object identity to `(space, ordinal)`; the decoder maps the pair back to
//! the object it placed. Chunk accounting runs on both sides in stream order.

use otter_snapshot_format::{NUMBER_OF_SPACES, Space};
use rustc_hash::FxHashMap;

use crate::error::{Result, SnapshotError};
use crate::heap::ObjectId;

/// Position of an object in its space's allocation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackReference {
    /// Allocation space
    pub space: Space,
    /// Creation order within the space
    pub ordinal: u32,
}

/// Encoder side: object identity to backreference
#[derive(Debug, Default)]
pub struct BackReferenceMap {
    counters: [u32; NUMBER_OF_SPACES],
    map: FxHashMap<ObjectId, BackReference>,
}

impl BackReferenceMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next ordinal of `space` to `object`
    pub fn allocate(&mut self, space: Space, object: ObjectId) -> BackReference {
        let counter = &mut self.counters[space.index()];
        let reference = BackReference {
            space,
            ordinal: *counter,
        };
        *counter += 1;
        self.map.insert(object, reference);
        reference
    }

    /// Backreference of an already allocated object
    #[inline]
    pub fn lookup(&self, object: ObjectId) -> Option<BackReference> {
        self.map.get(&object).copied()
    }

    /// Objects allocated in `space` so far
    #[inline]
    pub fn count(&self, space: Space) -> u32 {
        self.counters[space.index()]
    }
}

/// Decoder side: backreference to placed object
#[derive(Debug, Default)]
pub struct BackReferenceTable {
    spaces: [Vec<ObjectId>; NUMBER_OF_SPACES],
}

impl BackReferenceTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next object of `space`
    pub fn push(&mut self, space: Space, object: ObjectId) -> BackReference {
        let objects = &mut self.spaces[space.index()];
        objects.push(object);
        BackReference {
            space,
            ordinal: objects.len() as u32 - 1,
        }
    }

    /// Resolve a backreference
    pub fn get(&self, space: Space, ordinal: u32) -> Result<ObjectId> {
        self.spaces[space.index()]
            .get(ordinal as usize)
            .copied()
            .ok_or(SnapshotError::ReferenceOutOfRange {
                kind: space.name(),
                index: ordinal,
            })
    }

    /// Objects recorded in `space` so far
    #[inline]
    pub fn count(&self, space: Space) -> u32 {
        self.spaces[space.index()].len() as u32
    }
}

/// Per-space chunk fill levels
#[derive(Debug, Clone)]
pub struct ChunkTracker {
    capacity: usize,
    used: [usize; NUMBER_OF_SPACES],
}

impl ChunkTracker {
    /// Tracker with `capacity` slots per chunk
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: [0; NUMBER_OF_SPACES],
        }
    }

    /// Chunk capacity in slots
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `size` more slots need a fresh chunk of `space`
    pub fn needs_new_chunk(&self, space: Space, size: usize) -> bool {
        let used = self.used[space.index()];
        space != Space::LargeObject && used > 0 && used + size > self.capacity
    }

    /// Start the next chunk of `space`
    pub fn advance(&mut self, space: Space) {
        self.used[space.index()] = 0;
    }

    /// Account `size` slots in the current chunk of `space`.
    ///
    /// Large objects get a chunk of their own and are never accounted.
    pub fn reserve(&mut self, space: Space, size: usize) -> Result<()> {
        if space == Space::LargeObject {
            return Ok(());
        }
        let used = &mut self.used[space.index()];
        match used.checked_add(size) {
            Some(total) if total <= self.capacity => {
                *used = total;
                Ok(())
            }
            _ => Err(SnapshotError::ChunkOverflow { space, size }),
        }
    }
}
