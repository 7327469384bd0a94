//! Reference tables shared by both directions
//!
//! Objects that live outside the snapshot (caches, attached objects) and
//! native addresses are never written out. Both sides hold the same tables
//! and the stream only carries indices into them.

use rustc_hash::FxHashMap;

use crate::error::{Result, SnapshotError};
use crate::heap::{Address, ObjectId};

/// Indexed list of objects with reverse lookup
#[derive(Debug, Clone, Default)]
pub struct ObjectTable {
    objects: Vec<ObjectId>,
    index: FxHashMap<ObjectId, u32>,
}

impl ObjectTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an object; the first index of a repeated object wins lookups
    pub fn push(&mut self, object: ObjectId) -> u32 {
        let index = self.objects.len() as u32;
        self.objects.push(object);
        self.index.entry(object).or_insert(index);
        index
    }

    /// Object at `index`
    #[inline]
    pub fn get(&self, index: u32) -> Option<ObjectId> {
        self.objects.get(index as usize).copied()
    }

    /// Index of `object`
    #[inline]
    pub fn index_of(&self, object: ObjectId) -> Option<u32> {
        self.index.get(&object).copied()
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl FromIterator<ObjectId> for ObjectTable {
    fn from_iter<I: IntoIterator<Item = ObjectId>>(iter: I) -> Self {
        let mut table = Self::new();
        for object in iter {
            table.push(object);
        }
        table
    }
}

/// Where an external address was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalReference {
    /// Isolate external reference table
    Isolate(u32),
    /// Embedder API reference list
    Api(u32),
}

/// Native addresses the snapshot may refer to by index
#[derive(Debug, Clone, Default)]
pub struct ExternalReferenceTable {
    references: Vec<Address>,
    api_references: Vec<Address>,
    off_heap_targets: Vec<Address>,
    reverse: FxHashMap<Address, ExternalReference>,
}

impl ExternalReferenceTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an isolate external reference
    pub fn add_reference(&mut self, address: Address) -> u32 {
        let index = self.references.len() as u32;
        self.references.push(address);
        self.reverse
            .entry(address)
            .or_insert(ExternalReference::Isolate(index));
        index
    }

    /// Register an embedder API reference
    pub fn add_api_reference(&mut self, address: Address) -> u32 {
        let index = self.api_references.len() as u32;
        self.api_references.push(address);
        self.reverse
            .entry(address)
            .or_insert(ExternalReference::Api(index));
        index
    }

    /// Register an off-heap builtin entry
    pub fn add_off_heap_target(&mut self, address: Address) -> u32 {
        let index = self.off_heap_targets.len() as u32;
        self.off_heap_targets.push(address);
        index
    }

    /// Table entry for an address
    #[inline]
    pub fn lookup(&self, address: Address) -> Option<ExternalReference> {
        self.reverse.get(&address).copied()
    }

    /// Isolate external reference by index
    pub fn reference(&self, index: u32) -> Result<Address> {
        self.references
            .get(index as usize)
            .copied()
            .ok_or(SnapshotError::ExternalIndexOutOfRange {
                kind: "external reference",
                index,
            })
    }

    /// Embedder API reference by index
    pub fn api_reference(&self, index: u32) -> Result<Address> {
        self.api_references
            .get(index as usize)
            .copied()
            .ok_or(SnapshotError::ExternalIndexOutOfRange {
                kind: "api reference",
                index,
            })
    }

    /// Validate an off-heap builtin index
    pub fn off_heap_target(&self, index: u32) -> Result<Address> {
        self.off_heap_targets
            .get(index as usize)
            .copied()
            .ok_or(SnapshotError::ExternalIndexOutOfRange {
                kind: "off-heap target",
                index,
            })
    }
}

/// Everything a session can refer to without writing it out
#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    /// Objects supplied by the embedder at load time
    pub attached: ObjectTable,
    /// Read-only object cache
    pub read_only_cache: ObjectTable,
    /// Startup object cache
    pub startup_cache: ObjectTable,
    /// Native addresses
    pub external: ExternalReferenceTable,
}

/// Embedder hooks for opaque embedder fields
pub trait EmbedderFieldCallbacks {
    /// Serialize one embedder field value
    fn serialize_field(&mut self, value: u64) -> Vec<u8>;

    /// Rebuild one embedder field value; `None` rejects the data
    fn deserialize_field(&mut self, data: &[u8]) -> Option<u64>;
}

/// Default callbacks: the value as 8 little-endian bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEmbedderFields;

impl EmbedderFieldCallbacks for RawEmbedderFields {
    fn serialize_field(&mut self, value: u64) -> Vec<u8> {
        value.to_le_bytes().to_vec()
    }

    fn deserialize_field(&mut self, data: &[u8]) -> Option<u64> {
        let bytes: [u8; 8] = data.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_table_first_index_wins() {
        let mut table = ObjectTable::new();
        table.push(ObjectId(9));
        table.push(ObjectId(4));
        table.push(ObjectId(9));
        assert_eq!(table.index_of(ObjectId(9)), Some(0));
        assert_eq!(table.get(2), Some(ObjectId(9)));
        assert_eq!(table.get(3), None);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_external_lookup() {
        let mut table = ExternalReferenceTable::new();
        table.add_reference(0x1000);
        table.add_api_reference(0x2000);
        table.add_api_reference(0x1000);
        assert_eq!(table.lookup(0x1000), Some(ExternalReference::Isolate(0)));
        assert_eq!(table.lookup(0x2000), Some(ExternalReference::Api(0)));
        assert_eq!(table.lookup(0x3000), None);
        assert_eq!(table.api_reference(1).unwrap(), 0x1000);
        assert!(matches!(
            table.reference(1),
            Err(SnapshotError::ExternalIndexOutOfRange { index: 1, .. })
        ));
    }

    #[test]
    fn test_raw_embedder_fields() {
        let mut callbacks = RawEmbedderFields;
        let data = callbacks.serialize_field(0xdead_beef);
        assert_eq!(data.len(), 8);
        assert_eq!(callbacks.deserialize_field(&data), Some(0xdead_beef));
        assert_eq!(callbacks.deserialize_field(&data[..4]), None);
    }
}
