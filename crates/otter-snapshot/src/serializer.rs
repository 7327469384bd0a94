//! Snapshot serializer
//!
//! Walks the object graph from the roots in a single depth-first pass and
//! writes one bytecode stream. Each object is written once; later references
//! use the cheapest addressing that both sides can reconstruct:
//! hot object, root, cache, attached reference, backreference, and finally
//! a forward reference for objects whose header is written but which are not
//! allocated yet.

use std::collections::VecDeque;

use otter_snapshot_format::bytecode::ROOT_ARRAY_CONSTANTS_COUNT;
use otter_snapshot_format::encoding::{
    encode_variable_repeat_count, is_fixed_raw_data_size, is_fixed_repeat_count,
};
use otter_snapshot_format::{Bytecode, SnapshotHeader, SnapshotSink, Space};
use rustc_hash::FxHashMap;

use crate::addressing::{BackReferenceMap, ChunkTracker};
use crate::config::SnapshotConfig;
use crate::error::{Result, SnapshotError};
use crate::forward_refs::PendingObjects;
use crate::heap::{BackingStoreId, Heap, ObjectId, Slot};
use crate::hot_objects::HotObjects;
use crate::references::{
    EmbedderFieldCallbacks, ExternalReference, RawEmbedderFields, ReferenceTables,
};
use crate::roots::{self, RootIndex, RootVisitor, Roots, SyncTag};
use crate::stats::{Snapshot, SnapshotStats};

/// Where a reference is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Root,
    Map,
    Body,
}

fn to_int(value: usize, object: Option<ObjectId>) -> Result<u32> {
    u32::try_from(value).map_err(|_| SnapshotError::Unserializable {
        object,
        reason: "length does not fit in 32 bits",
    })
}

/// Serializes a heap object graph into a snapshot stream
pub struct Serializer<'a> {
    heap: &'a Heap,
    tables: &'a ReferenceTables,
    config: SnapshotConfig,
    embedder: Box<dyn EmbedderFieldCallbacks + 'a>,
    sink: SnapshotSink,
    hot_objects: HotObjects,
    backrefs: BackReferenceMap,
    pending: PendingObjects,
    chunks: ChunkTracker,
    root_index: FxHashMap<ObjectId, u32>,
    backing_stores: FxHashMap<BackingStoreId, u32>,
    deferred: VecDeque<ObjectId>,
    checkpoints: Vec<usize>,
    stats: SnapshotStats,
}

impl<'a> Serializer<'a> {
    /// Create a serializer over `heap`
    pub fn new(heap: &'a Heap, tables: &'a ReferenceTables, config: SnapshotConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            heap,
            tables,
            chunks: ChunkTracker::new(config.chunk_capacity as usize),
            config,
            embedder: Box::new(RawEmbedderFields),
            sink: SnapshotSink::with_capacity(4096),
            hot_objects: HotObjects::new(),
            backrefs: BackReferenceMap::new(),
            pending: PendingObjects::new(),
            root_index: FxHashMap::default(),
            backing_stores: FxHashMap::default(),
            deferred: VecDeque::new(),
            checkpoints: Vec::new(),
            stats: SnapshotStats::default(),
        })
    }

    /// Use custom embedder field callbacks
    pub fn with_embedder(mut self, embedder: impl EmbedderFieldCallbacks + 'a) -> Self {
        self.embedder = Box::new(embedder);
        self
    }

    /// Serialize everything reachable from `roots`
    pub fn serialize(mut self, roots: &Roots) -> Result<Snapshot> {
        tracing::debug!(
            target: "otter::snapshot",
            roots = roots.len(),
            heap_objects = self.heap.live_objects(),
            "Serialization starting"
        );

        SnapshotHeader::new(self.config.chunk_capacity).write(&mut self.sink);

        let mut roots = roots.clone();
        roots::iterate(&mut roots, &mut self)?;
        self.serialize_deferred()?;

        while self.sink.position() % self.config.padding != 0 {
            self.sink.put_bytecode(Bytecode::Nop)?;
        }

        self.stats.forward_references = self.pending.registered();
        self.stats.bytes = self.sink.position();

        tracing::debug!(
            target: "otter::snapshot",
            objects = self.stats.total_objects(),
            bytes = self.stats.bytes,
            forward_references = self.stats.forward_references,
            deferred = self.stats.deferred_objects,
            "Serialization complete"
        );

        Ok(Snapshot {
            data: self.sink.into_inner(),
            checkpoints: self.checkpoints,
            stats: self.stats,
        })
    }

    fn put(&mut self, bytecode: Bytecode) -> Result<()> {
        self.sink.put_bytecode(bytecode)?;
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.checkpoints.push(self.sink.position());
        self.put(Bytecode::Synchronize)
    }

    /// Write a reference to `object`, serializing it first if it is new
    fn serialize_object(&mut self, object: ObjectId, depth: usize, position: Position) -> Result<()> {
        if self.config.use_hot_objects {
            if let Some(slot) = self.hot_objects.find(object) {
                self.stats.hot_hits += 1;
                return self.put(Bytecode::HotObject(slot));
            }
        }

        if let Some(&index) = self.root_index.get(&object) {
            self.stats.root_references += 1;
            if index < ROOT_ARRAY_CONSTANTS_COUNT as u32 {
                return self.put(Bytecode::RootArrayConstant(index as u8));
            }
            self.put(Bytecode::RootArray)?;
            self.sink.put_int(index);
            return Ok(());
        }

        let tables = self.tables;
        let cached = [
            (Bytecode::ReadOnlyObjectCache, &tables.read_only_cache),
            (Bytecode::StartupObjectCache, &tables.startup_cache),
            (Bytecode::AttachedReference, &tables.attached),
        ];
        for (bytecode, table) in cached {
            if let Some(index) = table.index_of(object) {
                self.put(bytecode)?;
                self.sink.put_int(index);
                return Ok(());
            }
        }

        if let Some(reference) = self.backrefs.lookup(object) {
            self.put(Bytecode::Backref(reference.space))?;
            self.sink.put_int(reference.ordinal);
            self.hot_objects.add(object);
            self.stats.backreferences += 1;
            return Ok(());
        }

        if self.pending.is_pending(object) {
            if position != Position::Body {
                return Err(SnapshotError::Unserializable {
                    object: Some(object),
                    reason: "map refers to an object under construction",
                });
            }
            // Resolution is emitted when the object gets allocated.
            self.pending.register(object);
            return self.put(Bytecode::RegisterPendingForwardRef);
        }

        self.serialize_new_object(object, depth)
    }

    fn serialize_new_object(&mut self, object: ObjectId, depth: usize) -> Result<()> {
        let heap = self.heap;
        let value = heap.get(object).ok_or(SnapshotError::ReferenceOutOfRange {
            kind: "object",
            index: object.index(),
        })?;
        let space = value.space();
        let size = value.size();
        let map = value.map().ok_or(SnapshotError::Unserializable {
            object: Some(object),
            reason: "map slot is not a strong reference",
        })?;
        if depth >= self.config.max_nesting_depth {
            return Err(SnapshotError::Unserializable {
                object: Some(object),
                reason: "object graph nested too deeply",
            });
        }
        if size > self.config.max_object_slots {
            return Err(SnapshotError::Unserializable {
                object: Some(object),
                reason: "object larger than max_object_slots",
            });
        }

        if self.chunks.needs_new_chunk(space, size) {
            self.put(Bytecode::NextChunk)?;
            self.sink.put(space.id());
            self.chunks.advance(space);
        }
        self.chunks.reserve(space, size)?;

        if value.alignment().needs_prefix() {
            self.put(Bytecode::AlignmentPrefix(value.alignment()))?;
        }

        if map == object {
            if space != Space::Map {
                return Err(SnapshotError::Unserializable {
                    object: Some(object),
                    reason: "self-referencing map outside the map space",
                });
            }
            self.put(Bytecode::NewMetaMap)?;
            self.sink.put_int(to_int(size, Some(object))?);
            self.on_allocated(object, space)?;
        } else {
            self.put(Bytecode::NewObject(space))?;
            self.sink.put_int(to_int(size, Some(object))?);
            self.pending.begin(object);
            self.serialize_object(map, depth + 1, Position::Map)?;
            self.on_allocated(object, space)?;
        }

        if depth > self.config.max_recursion_depth && space != Space::Map && size > 1 {
            tracing::trace!(target: "otter::snapshot", %object, depth, "Deferring object body");
            self.put(Bytecode::Deferred)?;
            self.deferred.push_back(object);
            self.stats.deferred_objects += 1;
            return Ok(());
        }

        self.serialize_body(object, depth)
    }

    fn on_allocated(&mut self, object: ObjectId, space: Space) -> Result<()> {
        self.backrefs.allocate(space, object);
        self.hot_objects.add(object);
        self.stats.objects[space.index()] += 1;
        for id in self.pending.complete(object) {
            self.put(Bytecode::ResolvePendingForwardRef)?;
            self.sink.put_int(id);
        }
        Ok(())
    }

    /// Whether `object` can be referenced without serializing it
    fn has_compact_reference(&self, object: ObjectId) -> bool {
        self.backrefs.lookup(object).is_some()
            || self.root_index.contains_key(&object)
            || self.tables.read_only_cache.index_of(object).is_some()
            || self.tables.startup_cache.index_of(object).is_some()
            || self.tables.attached.index_of(object).is_some()
    }

    fn serialize_body(&mut self, object: ObjectId, depth: usize) -> Result<()> {
        let heap = self.heap;
        let Some(value) = heap.get(object) else {
            return Err(SnapshotError::ReferenceOutOfRange {
                kind: "object",
                index: object.index(),
            });
        };
        let code = value.space() == Space::Code;
        let slots = value.slots();

        let mut index = 1;
        while index < slots.len() {
            match slots[index] {
                Slot::Raw(_) => {
                    let end = slots[index..]
                        .iter()
                        .position(|slot| !matches!(slot, Slot::Raw(_)))
                        .map_or(slots.len(), |run| index + run);
                    let words: Vec<u64> = slots[index..end]
                        .iter()
                        .filter_map(|slot| match slot {
                            Slot::Raw(word) => Some(*word),
                            _ => None,
                        })
                        .collect();
                    self.put_raw_run(&words, code, object)?;
                    index = end;
                }
                Slot::Strong(target) if self.config.use_repeats => {
                    let count = slots[index..]
                        .iter()
                        .take_while(|slot| **slot == Slot::Strong(target))
                        .count();
                    if count >= 2 && self.has_compact_reference(target) {
                        self.put_repeat(count, object)?;
                        self.serialize_object(target, depth + 1, Position::Body)?;
                        index += count;
                    } else {
                        self.serialize_object(target, depth + 1, Position::Body)?;
                        index += 1;
                    }
                }
                slot => {
                    self.serialize_slot(Some(object), slot, depth)?;
                    index += 1;
                }
            }
        }
        Ok(())
    }

    fn put_raw_run(&mut self, words: &[u64], code: bool, object: ObjectId) -> Result<()> {
        let len = to_int(words.len(), Some(object))?;
        if code {
            self.put(Bytecode::VariableRawCode)?;
            self.sink.put_int(len);
        } else if is_fixed_raw_data_size(len) {
            self.put(Bytecode::FixedRawData(len as u8))?;
        } else {
            self.put(Bytecode::VariableRawData)?;
            self.sink.put_int(len);
        }
        self.sink.put_words(words);
        self.stats.raw_words += words.len() as u64;
        Ok(())
    }

    fn put_repeat(&mut self, count: usize, object: ObjectId) -> Result<()> {
        let count = to_int(count, Some(object))?;
        if is_fixed_repeat_count(count) {
            self.put(Bytecode::FixedRepeat(count as u8))?;
        } else {
            self.put(Bytecode::VariableRepeat)?;
            self.sink.put_int(encode_variable_repeat_count(count));
        }
        self.stats.repeats += 1;
        Ok(())
    }

    /// Write one non-raw slot. `holder` is `None` for root slots.
    fn serialize_slot(&mut self, holder: Option<ObjectId>, slot: Slot, depth: usize) -> Result<()> {
        let position = if holder.is_some() {
            Position::Body
        } else {
            Position::Root
        };

        match slot {
            Slot::Raw(word) => {
                self.put(Bytecode::FixedRawData(1))?;
                self.sink.put_words(&[word]);
                self.stats.raw_words += 1;
            }
            Slot::Strong(target) => self.serialize_object(target, depth + 1, position)?,
            Slot::Weak(target) if self.heap.contains(target) => {
                self.put(Bytecode::WeakPrefix)?;
                self.serialize_object(target, depth + 1, position)?;
            }
            Slot::Weak(_) | Slot::ClearedWeak => self.put(Bytecode::ClearedWeakReference)?,
            Slot::External { address, sandboxed } => {
                let reference = self
                    .tables
                    .external
                    .lookup(address)
                    .ok_or(SnapshotError::UnknownExternalReference(address))?;
                let (bytecode, index) = match (reference, sandboxed) {
                    (ExternalReference::Isolate(index), false) => (Bytecode::ExternalReference, index),
                    (ExternalReference::Isolate(index), true) => {
                        (Bytecode::SandboxedExternalReference, index)
                    }
                    (ExternalReference::Api(index), false) => (Bytecode::ApiReference, index),
                    (ExternalReference::Api(index), true) => (Bytecode::SandboxedApiReference, index),
                };
                self.put(bytecode)?;
                self.sink.put_int(index);
            }
            Slot::InternalReference(offset) => {
                let size = holder
                    .and_then(|holder| self.heap.get(holder))
                    .map(|object| object.byte_size());
                if size.is_none_or(|size| offset as usize >= size) {
                    return Err(SnapshotError::Unserializable {
                        object: holder,
                        reason: "internal reference outside its holder",
                    });
                }
                self.put(Bytecode::InternalReference)?;
                self.sink.put_int(offset);
            }
            Slot::OffHeapTarget(index) => {
                self.tables.external.off_heap_target(index)?;
                self.put(Bytecode::OffHeapTarget)?;
                self.sink.put_int(index);
            }
            Slot::BackingStore(store) => {
                self.put(Bytecode::OffHeapBackingStore)?;
                if let Some(&index) = self.backing_stores.get(&store) {
                    self.sink.put_int(index + 1);
                } else {
                    let bytes = self.heap.backing_store(store).ok_or(SnapshotError::Unserializable {
                        object: holder,
                        reason: "backing store was released",
                    })?;
                    let index = self.backing_stores.len() as u32;
                    self.backing_stores.insert(store, index);
                    self.sink.put_int(0);
                    self.sink.put_int(to_int(bytes.len(), holder)?);
                    self.sink.put_raw(bytes);
                }
            }
            Slot::EmbedderField(value) => {
                let data = self.embedder.serialize_field(value);
                self.put(Bytecode::EmbedderFieldsData)?;
                self.sink.put_int(to_int(data.len(), holder)?);
                self.sink.put_raw(&data);
            }
            Slot::Unresolved(_) => {
                return Err(SnapshotError::Unserializable {
                    object: holder,
                    reason: "slot holds an unresolved forward reference",
                });
            }
        }
        Ok(())
    }

    fn serialize_deferred(&mut self) -> Result<()> {
        while let Some(object) = self.deferred.pop_front() {
            let reference = self
                .backrefs
                .lookup(object)
                .ok_or(SnapshotError::IncompleteObject(object))?;
            self.put(Bytecode::Backref(reference.space))?;
            self.sink.put_int(reference.ordinal);
            self.serialize_body(object, 0)?;
        }
        tracing::trace!(target: "otter::snapshot", offset = self.sink.position(), "Deferred section complete");
        self.checkpoint()
    }
}

impl RootVisitor for Serializer<'_> {
    fn visit_root(&mut self, _tag: SyncTag, index: RootIndex, slot: &mut Slot) -> Result<()> {
        match *slot {
            Slot::Strong(object) => {
                self.serialize_object(object, 0, Position::Root)?;
                self.root_index.entry(object).or_insert(index.0);
                Ok(())
            }
            other => self.serialize_slot(None, other, 0),
        }
    }

    fn synchronize(&mut self, tag: SyncTag) -> Result<()> {
        tracing::trace!(target: "otter::snapshot", ?tag, offset = self.sink.position(), "Checkpoint");
        self.checkpoint()
    }
}
