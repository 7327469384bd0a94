//! Allocation capability used by the deserializer
//!
//! The deserializer never touches heap storage directly. It places objects,
//! fills their slots, and advances chunks through this trait, so a loader can
//! target any heap that implements it.

use otter_snapshot_format::{Alignment, Space};

use crate::error::{Result, SnapshotError};
use crate::heap::{BackingStoreId, Heap, ObjectId, Slot};

/// Parameters of one object placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Target space
    pub space: Space,
    /// Requested alignment
    pub alignment: Alignment,
    /// Size in slots, including the map
    pub size: usize,
    /// Map of the new object; `None` places a meta map that is its own map
    pub map: Option<ObjectId>,
}

/// Heap placement capability
pub trait Allocator {
    /// Place an object. Body slots start as `Slot::Raw(0)`.
    fn allocate(&mut self, request: AllocationRequest) -> Result<ObjectId>;

    /// Write one slot of a placed object
    fn write_slot(&mut self, object: ObjectId, index: usize, slot: Slot) -> Result<()>;

    /// Start the next reserved chunk of a space
    fn next_chunk(&mut self, space: Space) -> Result<()>;

    /// Store an off-heap byte buffer
    fn add_backing_store(&mut self, bytes: Vec<u8>) -> BackingStoreId;

    /// Drop an object placed by an aborted session
    fn release(&mut self, object: ObjectId);

    /// Drop a backing store created by an aborted session
    fn release_backing_store(&mut self, store: BackingStoreId);
}

impl Allocator for Heap {
    fn allocate(&mut self, request: AllocationRequest) -> Result<ObjectId> {
        if request.size == 0 {
            return Err(SnapshotError::AllocationFailed {
                space: request.space,
                size: request.size,
            });
        }
        if request.map.is_none() && request.space != Space::Map {
            return Err(SnapshotError::AllocationFailed {
                space: request.space,
                size: request.size,
            });
        }
        Ok(self.allocate_zeroed(request.space, request.alignment, request.map, request.size))
    }

    fn write_slot(&mut self, object: ObjectId, index: usize, slot: Slot) -> Result<()> {
        self.set_slot(object, index, slot)
    }

    fn next_chunk(&mut self, space: Space) -> Result<()> {
        self.advance_chunk(space);
        Ok(())
    }

    fn add_backing_store(&mut self, bytes: Vec<u8>) -> BackingStoreId {
        Heap::add_backing_store(self, bytes)
    }

    fn release(&mut self, object: ObjectId) {
        Heap::release(self, object);
    }

    fn release_backing_store(&mut self, store: BackingStoreId) {
        Heap::release_backing_store(self, store);
    }
}
