//! # Otter Snapshot
//!
//! Heap snapshot serializer and deserializer.
//!
//! A snapshot replays a pre-built object graph instead of re-running the code
//! that built it. The serializer walks the graph from the roots once; the
//! deserializer consumes the stream once and rebuilds an isomorphic graph
//! through an [`Allocator`].
//!
//! ## Design
//!
//! - **Addressing**: later references to an object use a hot-object slot,
//!   a root index, a cache index or a per-space backreference
//! - **Forward references**: slots that refer to an object whose header was
//!   written but which is not allocated yet are patched after allocation
//! - **Checkpoints**: a synchronization marker after every root list detects
//!   producer/consumer mismatch
//! - **All or nothing**: a failed load releases everything it allocated

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod addressing;
pub mod allocator;
pub mod config;
pub mod deserializer;
pub mod error;
pub mod forward_refs;
pub mod heap;
pub mod hot_objects;
pub mod references;
pub mod roots;
pub mod serializer;
pub mod stats;

pub use allocator::{AllocationRequest, Allocator};
pub use config::SnapshotConfig;
pub use deserializer::Deserializer;
pub use error::{Result, SnapshotError};
pub use heap::{Address, BackingStoreId, Heap, HeapObject, ObjectId, Slot};
pub use references::{
    EmbedderFieldCallbacks, ExternalReferenceTable, ObjectTable, RawEmbedderFields,
    ReferenceTables,
};
pub use roots::{RootIndex, RootVisitor, Roots, SyncTag};
pub use serializer::Serializer;
pub use stats::{Snapshot, SnapshotStats};

pub use otter_snapshot_format::{Alignment, Space};

/// Serialize everything reachable from `roots` with default embedder callbacks
pub fn serialize(
    heap: &Heap,
    roots: &Roots,
    tables: &ReferenceTables,
    config: SnapshotConfig,
) -> Result<Snapshot> {
    Serializer::new(heap, tables, config)?.serialize(roots)
}

/// Load a snapshot into `heap`, filling `roots` on success
pub fn deserialize(
    data: &[u8],
    heap: &mut Heap,
    roots: &mut Roots,
    tables: &ReferenceTables,
) -> Result<SnapshotStats> {
    Deserializer::new(data, heap, tables).deserialize(roots)
}
