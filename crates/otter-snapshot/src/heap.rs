//! Arena heap holding snapshot object graphs
//!
//! Objects are addressed by [`ObjectId`], an index into the arena. Objects
//! never move once placed, so ids stay valid for the whole life of a
//! serialize or deserialize session.

use std::fmt;

use otter_snapshot_format::{Alignment, NUMBER_OF_SPACES, Space};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapshotError};

/// Native address or callback pointer
pub type Address = u64;

/// Size of one slot in bytes
pub const SLOT_SIZE: usize = 8;

/// Handle of an object in a [`Heap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Create a new object id
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get arena index
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle of an off-heap backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BackingStoreId(pub u32);

/// Value of one object field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// Untagged data word
    Raw(u64),
    /// Strong reference
    Strong(ObjectId),
    /// Weak reference
    Weak(ObjectId),
    /// Weak reference whose target was reclaimed
    ClearedWeak,
    /// Native address from the external reference table
    External {
        /// The address
        address: Address,
        /// Stored as a sandboxed external pointer
        sandboxed: bool,
    },
    /// Byte offset into the holder's own body
    InternalReference(u32),
    /// Index of an off-heap builtin entry
    OffHeapTarget(u32),
    /// Off-heap byte buffer
    BackingStore(BackingStoreId),
    /// Opaque embedder value, serialized through embedder callbacks
    EmbedderField(u64),
    /// Placeholder for a pending forward reference; only exists while a
    /// snapshot is being loaded
    Unresolved(u32),
}

/// A heap object: allocation space, alignment, and its slots.
///
/// Slot 0 is always the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapObject {
    space: Space,
    alignment: Alignment,
    slots: Vec<Slot>,
}

impl HeapObject {
    /// Object whose map is `map`, followed by `body`
    pub fn new(space: Space, map: ObjectId, body: Vec<Slot>) -> Self {
        let mut slots = Vec::with_capacity(body.len() + 1);
        slots.push(Slot::Strong(map));
        slots.extend(body);
        Self {
            space,
            alignment: Alignment::Tagged,
            slots,
        }
    }

    /// Allocation space
    #[inline]
    pub fn space(&self) -> Space {
        self.space
    }

    /// Requested alignment
    #[inline]
    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Map of this object
    pub fn map(&self) -> Option<ObjectId> {
        match self.slots.first() {
            Some(Slot::Strong(map)) => Some(*map),
            _ => None,
        }
    }

    /// Size in slots, including the map
    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Size in bytes
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.slots.len() * SLOT_SIZE
    }

    /// All slots, map first
    #[inline]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

/// Arena of heap objects and off-heap backing stores
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Option<HeapObject>>,
    backing_stores: Vec<Option<Box<[u8]>>>,
    chunks: [u32; NUMBER_OF_SPACES],
    live: usize,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> ObjectId {
        ObjectId(self.objects.len() as u32)
    }

    fn push(&mut self, object: HeapObject) -> ObjectId {
        let id = self.next_id();
        self.objects.push(Some(object));
        self.live += 1;
        id
    }

    /// Place the meta map: a map-space object that is its own map
    pub fn allocate_meta_map(&mut self, body: Vec<Slot>) -> ObjectId {
        let id = self.next_id();
        self.push(HeapObject::new(Space::Map, id, body))
    }

    /// Place a new object
    pub fn allocate_object(&mut self, space: Space, map: ObjectId, body: Vec<Slot>) -> ObjectId {
        self.push(HeapObject::new(space, map, body))
    }

    /// Place a new object with a non-default alignment
    pub fn allocate_aligned(
        &mut self,
        space: Space,
        alignment: Alignment,
        map: ObjectId,
        body: Vec<Slot>,
    ) -> ObjectId {
        let mut object = HeapObject::new(space, map, body);
        object.alignment = alignment;
        self.push(object)
    }

    /// Place an object with `size` slots, all but the map zeroed
    pub(crate) fn allocate_zeroed(
        &mut self,
        space: Space,
        alignment: Alignment,
        map: Option<ObjectId>,
        size: usize,
    ) -> ObjectId {
        let id = self.next_id();
        let mut object = HeapObject::new(space, map.unwrap_or(id), vec![Slot::Raw(0); size - 1]);
        object.alignment = alignment;
        self.push(object)
    }

    /// Get an object
    #[inline]
    pub fn get(&self, id: ObjectId) -> Option<&HeapObject> {
        self.objects.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Whether `id` names a live object
    #[inline]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Read a slot; pending forward references cannot be read
    pub fn read_slot(&self, id: ObjectId, index: usize) -> Result<Slot> {
        let object = self.get(id).ok_or(SnapshotError::ReferenceOutOfRange {
            kind: "object",
            index: id.0,
        })?;
        match object.slots.get(index) {
            Some(Slot::Unresolved(reservation)) => {
                Err(SnapshotError::UnresolvedForwardReference(*reservation))
            }
            Some(slot) => Ok(*slot),
            None => Err(SnapshotError::ObjectOverflow {
                object: id,
                size: object.size(),
            }),
        }
    }

    /// Overwrite a slot
    pub fn set_slot(&mut self, id: ObjectId, index: usize, slot: Slot) -> Result<()> {
        let object = self
            .objects
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(SnapshotError::ReferenceOutOfRange {
                kind: "object",
                index: id.0,
            })?;
        let size = object.slots.len();
        let target = object
            .slots
            .get_mut(index)
            .ok_or(SnapshotError::ObjectOverflow { object: id, size })?;
        *target = slot;
        Ok(())
    }

    /// Drop an object. Trailing released ids are returned to the arena.
    pub fn release(&mut self, id: ObjectId) {
        if let Some(entry) = self.objects.get_mut(id.0 as usize) {
            if entry.take().is_some() {
                self.live -= 1;
            }
        }
        while matches!(self.objects.last(), Some(None)) {
            self.objects.pop();
        }
    }

    /// Store an off-heap byte buffer
    pub fn add_backing_store(&mut self, bytes: Vec<u8>) -> BackingStoreId {
        let id = BackingStoreId(self.backing_stores.len() as u32);
        self.backing_stores.push(Some(bytes.into_boxed_slice()));
        id
    }

    /// Get an off-heap byte buffer
    pub fn backing_store(&self, id: BackingStoreId) -> Option<&[u8]> {
        self.backing_stores
            .get(id.0 as usize)
            .and_then(|store| store.as_deref())
    }

    /// Drop an off-heap byte buffer
    pub fn release_backing_store(&mut self, id: BackingStoreId) {
        if let Some(entry) = self.backing_stores.get_mut(id.0 as usize) {
            *entry = None;
        }
        while matches!(self.backing_stores.last(), Some(None)) {
            self.backing_stores.pop();
        }
    }

    /// Number of live objects
    #[inline]
    pub fn live_objects(&self) -> usize {
        self.live
    }

    /// Number of live backing stores
    pub fn live_backing_stores(&self) -> usize {
        self.backing_stores.iter().flatten().count()
    }

    /// Iterate over live objects in id order
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &HeapObject)> {
        self.objects
            .iter()
            .enumerate()
            .filter_map(|(i, object)| object.as_ref().map(|o| (ObjectId(i as u32), o)))
    }

    /// Number of chunks started in a space
    pub fn chunk_count(&self, space: Space) -> u32 {
        self.chunks[space.index()]
    }

    pub(crate) fn advance_chunk(&mut self, space: Space) {
        self.chunks[space.index()] += 1;
    }
}
