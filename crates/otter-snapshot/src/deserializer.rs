//! Snapshot deserializer
//!
//! Consumes a snapshot stream linearly and rebuilds the object graph through
//! an [`Allocator`]. Every structure the serializer maintains (hot objects,
//! per-space ordinals, forward references, chunk fill levels) is rebuilt in
//! the same order, so indices in the stream resolve to the same objects.
//!
//! A failed load releases every object and backing store it created and
//! leaves the caller's roots untouched.

use otter_snapshot_format::bytecode::{RESOLVE_PENDING_FORWARD_REF, SYNCHRONIZE};
use otter_snapshot_format::encoding::decode_variable_repeat_count;
use otter_snapshot_format::{Alignment, Bytecode, SnapshotHeader, SnapshotSource, Space};
use rustc_hash::FxHashMap;

use crate::addressing::{BackReferenceTable, ChunkTracker};
use crate::allocator::{AllocationRequest, Allocator};
use crate::config::SnapshotConfig;
use crate::error::{Result, SnapshotError};
use crate::forward_refs::{ForwardReferences, PendingLocation};
use crate::heap::{BackingStoreId, ObjectId, SLOT_SIZE, Slot};
use crate::hot_objects::HotObjects;
use crate::references::{EmbedderFieldCallbacks, ObjectTable, RawEmbedderFields, ReferenceTables};
use crate::roots::{self, RootIndex, RootVisitor, Roots, SyncTag};
use crate::stats::SnapshotStats;

/// Where a decoded slot is going to be stored
#[derive(Debug, Clone, Copy)]
enum Context {
    Root,
    Map,
    Body {
        object: ObjectId,
        index: usize,
        size: usize,
    },
}

impl Context {
    fn describe(self) -> &'static str {
        match self {
            Self::Root => "in a root slot",
            Self::Map => "as an object map",
            Self::Body { .. } => "in an object body",
        }
    }
}

/// Rebuilds an object graph from a snapshot stream
pub struct Deserializer<'a, A: Allocator + ?Sized> {
    allocator: &'a mut A,
    tables: &'a ReferenceTables,
    embedder: Box<dyn EmbedderFieldCallbacks + 'a>,
    source: SnapshotSource<'a>,
    hot_objects: HotObjects,
    backrefs: BackReferenceTable,
    forward_refs: ForwardReferences,
    chunks: ChunkTracker,
    root_objects: Vec<Option<ObjectId>>,
    backing_stores: Vec<BackingStoreId>,
    deferred: FxHashMap<ObjectId, (Space, usize)>,
    allocated: Vec<ObjectId>,
    max_object_slots: usize,
    max_nesting_depth: usize,
    depth: usize,
    stats: SnapshotStats,
}

impl<'a, A: Allocator + ?Sized> Deserializer<'a, A> {
    /// Create a deserializer reading `data` into `allocator`
    pub fn new(data: &'a [u8], allocator: &'a mut A, tables: &'a ReferenceTables) -> Self {
        let limits = SnapshotConfig::default();
        Self {
            allocator,
            tables,
            embedder: Box::new(RawEmbedderFields),
            source: SnapshotSource::new(data),
            hot_objects: HotObjects::new(),
            backrefs: BackReferenceTable::new(),
            forward_refs: ForwardReferences::new(),
            chunks: ChunkTracker::new(0),
            root_objects: Vec::new(),
            backing_stores: Vec::new(),
            deferred: FxHashMap::default(),
            allocated: Vec::new(),
            max_object_slots: limits.max_object_slots,
            max_nesting_depth: limits.max_nesting_depth,
            depth: 0,
            stats: SnapshotStats::default(),
        }
    }

    /// Take object size and nesting limits from `config`
    pub fn with_config(mut self, config: &SnapshotConfig) -> Self {
        self.max_object_slots = config.max_object_slots;
        self.max_nesting_depth = config.max_nesting_depth;
        self
    }

    /// Use custom embedder field callbacks
    pub fn with_embedder(mut self, embedder: impl EmbedderFieldCallbacks + 'a) -> Self {
        self.embedder = Box::new(embedder);
        self
    }

    /// Load the snapshot, filling `roots` on success.
    ///
    /// `roots` must have the list layout the snapshot was written with;
    /// [`Roots::empty_like`] builds one from the source roots.
    pub fn deserialize(mut self, roots: &mut Roots) -> Result<SnapshotStats> {
        tracing::debug!(
            target: "otter::snapshot",
            bytes = self.source.remaining(),
            roots = roots.len(),
            "Deserialization starting"
        );

        let mut scratch = roots.clone();
        match self.run(&mut scratch) {
            Ok(()) => {
                *roots = scratch;
                tracing::debug!(
                    target: "otter::snapshot",
                    objects = self.stats.total_objects(),
                    forward_references = self.stats.forward_references,
                    deferred = self.stats.deferred_objects,
                    "Deserialization complete"
                );
                Ok(self.stats)
            }
            Err(error) => {
                tracing::warn!(
                    target: "otter::snapshot",
                    %error,
                    offset = self.source.position(),
                    released = self.allocated.len(),
                    "Deserialization failed, rolling back"
                );
                self.rollback();
                Err(error)
            }
        }
    }

    fn run(&mut self, roots: &mut Roots) -> Result<()> {
        let header = SnapshotHeader::read(&mut self.source)?;
        self.chunks = ChunkTracker::new(header.chunk_capacity as usize);

        roots::iterate(roots, self)?;
        self.deserialize_deferred()?;

        while self.source.has_more() {
            let offset = self.source.position();
            match self.source.get_bytecode()? {
                Bytecode::Nop => {}
                other => {
                    return Err(SnapshotError::MisplacedBytecode {
                        name: other.name(),
                        offset,
                        context: "after the final checkpoint",
                    });
                }
            }
        }

        self.forward_refs.finish()?;
        if let Some(object) = self.deferred.keys().min() {
            return Err(SnapshotError::IncompleteObject(*object));
        }

        self.stats.forward_references = self.forward_refs.registered();
        self.stats.bytes = self.source.position();
        Ok(())
    }

    fn rollback(&mut self) {
        for object in self.allocated.drain(..).rev() {
            self.allocator.release(object);
        }
        for store in self.backing_stores.drain(..).rev() {
            self.allocator.release_backing_store(store);
        }
    }

    fn next(&mut self) -> Result<(Bytecode, usize)> {
        let offset = self.source.position();
        Ok((self.source.get_bytecode()?, offset))
    }

    fn misplaced(bytecode: Bytecode, offset: usize, context: &'static str) -> SnapshotError {
        SnapshotError::MisplacedBytecode {
            name: bytecode.name(),
            offset,
            context,
        }
    }

    /// Decode one slot value starting at `bytecode`, consuming its prefixes
    fn read_slot(&mut self, mut bytecode: Bytecode, mut offset: usize, context: Context) -> Result<Slot> {
        let mut alignment = None;
        let mut weak = false;
        loop {
            match bytecode {
                Bytecode::NextChunk => {
                    let space = Space::try_from(self.source.get()?)?;
                    self.chunks.advance(space);
                    self.allocator.next_chunk(space)?;
                }
                Bytecode::AlignmentPrefix(value) if alignment.is_none() => alignment = Some(value),
                Bytecode::WeakPrefix if !weak => weak = true,
                _ => break,
            }
            (bytecode, offset) = self.next()?;
        }

        if alignment.is_some() && !matches!(bytecode, Bytecode::NewObject(_) | Bytecode::NewMetaMap) {
            return Err(Self::misplaced(bytecode, offset, "after an alignment prefix"));
        }

        let tables = self.tables;
        let slot = match bytecode {
            Bytecode::NewObject(space) => Slot::Strong(
                self.nested(offset, |this| this.read_new_object(space, alignment, offset))?,
            ),
            Bytecode::NewMetaMap => {
                Slot::Strong(self.nested(offset, |this| this.read_meta_map(alignment, offset))?)
            }
            Bytecode::Backref(space) => {
                let ordinal = self.source.get_int()?;
                let object = self.backrefs.get(space, ordinal)?;
                self.hot_objects.add(object);
                self.stats.backreferences += 1;
                Slot::Strong(object)
            }
            Bytecode::HotObject(index) => {
                self.stats.hot_hits += 1;
                Slot::Strong(self.hot_objects.get(index).ok_or(SnapshotError::ReferenceOutOfRange {
                    kind: "hot object",
                    index: index as u32,
                })?)
            }
            Bytecode::RootArrayConstant(index) => Slot::Strong(self.root(index as u32)?),
            Bytecode::RootArray => {
                let index = self.source.get_int()?;
                Slot::Strong(self.root(index)?)
            }
            Bytecode::ReadOnlyObjectCache => {
                Slot::Strong(self.cached(&tables.read_only_cache, "read-only cache")?)
            }
            Bytecode::StartupObjectCache => {
                Slot::Strong(self.cached(&tables.startup_cache, "startup cache")?)
            }
            Bytecode::AttachedReference => {
                Slot::Strong(self.cached(&tables.attached, "attached reference")?)
            }
            Bytecode::RegisterPendingForwardRef => match context {
                Context::Body { object, index, .. } => {
                    let id = self.forward_refs.register(PendingLocation { object, index, weak });
                    return Ok(Slot::Unresolved(id));
                }
                _ => return Err(Self::misplaced(bytecode, offset, context.describe())),
            },
            Bytecode::ClearedWeakReference if !weak => Slot::ClearedWeak,
            Bytecode::ExternalReference
            | Bytecode::SandboxedExternalReference
            | Bytecode::ApiReference
            | Bytecode::SandboxedApiReference
                if !weak =>
            {
                let index = self.source.get_int()?;
                let external = &tables.external;
                let address = match bytecode {
                    Bytecode::ExternalReference | Bytecode::SandboxedExternalReference => {
                        external.reference(index)?
                    }
                    _ => external.api_reference(index)?,
                };
                let sandboxed = matches!(
                    bytecode,
                    Bytecode::SandboxedExternalReference | Bytecode::SandboxedApiReference
                );
                Slot::External { address, sandboxed }
            }
            Bytecode::InternalReference if !weak => {
                let value = self.source.get_int()?;
                match context {
                    Context::Body { size, .. } if (value as usize) < size * SLOT_SIZE => {
                        Slot::InternalReference(value)
                    }
                    Context::Body { .. } => {
                        return Err(SnapshotError::ReferenceOutOfRange {
                            kind: "internal reference",
                            index: value,
                        });
                    }
                    _ => return Err(Self::misplaced(bytecode, offset, context.describe())),
                }
            }
            Bytecode::OffHeapTarget if !weak => {
                let index = self.source.get_int()?;
                tables.external.off_heap_target(index)?;
                Slot::OffHeapTarget(index)
            }
            Bytecode::OffHeapBackingStore if !weak => Slot::BackingStore(self.read_backing_store()?),
            Bytecode::EmbedderFieldsData if !weak => {
                let len = self.source.get_int()? as usize;
                let data = self.source.get_raw(len)?;
                let value = self
                    .embedder
                    .deserialize_field(data)
                    .ok_or(SnapshotError::InvalidEmbedderData)?;
                Slot::EmbedderField(value)
            }
            // Registrations only ever resolve right after an allocation.
            Bytecode::ResolvePendingForwardRef if !weak => {
                let id = self.source.get_int()?;
                return Err(SnapshotError::DoubleOrMissingResolution(id));
            }
            Bytecode::FixedRawData(1) if !weak && matches!(context, Context::Root) => {
                let words = self.source.get_words(1)?;
                self.stats.raw_words += 1;
                Slot::Raw(words[0])
            }
            other => {
                let context = if weak { "after a weak prefix" } else { context.describe() };
                return Err(Self::misplaced(other, offset, context));
            }
        };

        match slot {
            Slot::Strong(object) if weak => Ok(Slot::Weak(object)),
            slot => Ok(slot),
        }
    }

    fn root(&mut self, index: u32) -> Result<ObjectId> {
        self.stats.root_references += 1;
        self.root_objects
            .get(index as usize)
            .copied()
            .flatten()
            .ok_or(SnapshotError::ReferenceOutOfRange { kind: "root", index })
    }

    fn cached(&mut self, table: &ObjectTable, kind: &'static str) -> Result<ObjectId> {
        let index = self.source.get_int()?;
        table
            .get(index)
            .ok_or(SnapshotError::ReferenceOutOfRange { kind, index })
    }

    fn read_backing_store(&mut self) -> Result<BackingStoreId> {
        let tag = self.source.get_int()?;
        if tag == 0 {
            let len = self.source.get_int()? as usize;
            let bytes = self.source.get_raw(len)?.to_vec();
            let store = self.allocator.add_backing_store(bytes);
            self.backing_stores.push(store);
            return Ok(store);
        }
        self.backing_stores
            .get(tag as usize - 1)
            .copied()
            .ok_or(SnapshotError::ReferenceOutOfRange {
                kind: "backing store",
                index: tag,
            })
    }

    fn nested<T>(&mut self, offset: usize, read: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= self.max_nesting_depth {
            return Err(SnapshotError::NestingTooDeep {
                limit: self.max_nesting_depth,
                offset,
            });
        }
        self.depth += 1;
        let result = read(self);
        self.depth -= 1;
        result
    }

    fn read_size(&mut self, offset: usize) -> Result<usize> {
        let size = self.source.get_int()? as usize;
        if size == 0 || size > self.max_object_slots {
            return Err(SnapshotError::InvalidObjectSize { size, offset });
        }
        Ok(size)
    }

    fn read_new_object(
        &mut self,
        space: Space,
        alignment: Option<Alignment>,
        offset: usize,
    ) -> Result<ObjectId> {
        let size = self.read_size(offset)?;
        self.chunks.reserve(space, size)?;

        let (bytecode, map_offset) = self.next()?;
        let map = match self.read_slot(bytecode, map_offset, Context::Map)? {
            Slot::Strong(map) => map,
            _ => return Err(Self::misplaced(bytecode, map_offset, Context::Map.describe())),
        };

        let object = self.allocator.allocate(AllocationRequest {
            space,
            alignment: alignment.unwrap_or_default(),
            size,
            map: Some(map),
        })?;
        self.on_allocated(object, space)?;
        self.read_body(object, space, size, true)?;
        Ok(object)
    }

    fn read_meta_map(&mut self, alignment: Option<Alignment>, offset: usize) -> Result<ObjectId> {
        let size = self.read_size(offset)?;
        self.chunks.reserve(Space::Map, size)?;
        let object = self.allocator.allocate(AllocationRequest {
            space: Space::Map,
            alignment: alignment.unwrap_or_default(),
            size,
            map: None,
        })?;
        self.on_allocated(object, Space::Map)?;
        self.read_body(object, Space::Map, size, false)?;
        Ok(object)
    }

    fn on_allocated(&mut self, object: ObjectId, space: Space) -> Result<()> {
        self.allocated.push(object);
        self.backrefs.push(space, object);
        self.hot_objects.add(object);
        self.stats.objects[space.index()] += 1;

        while self.source.has_more() && self.source.peek()? == RESOLVE_PENDING_FORWARD_REF {
            self.source.get()?;
            let id = self.source.get_int()?;
            let location = self.forward_refs.resolve(id)?;
            let slot = if location.weak {
                Slot::Weak(object)
            } else {
                Slot::Strong(object)
            };
            self.allocator.write_slot(location.object, location.index, slot)?;
        }
        Ok(())
    }

    /// Fill slots `1..size` of `object`
    fn read_body(&mut self, object: ObjectId, space: Space, size: usize, allow_deferred: bool) -> Result<()> {
        let mut index = 1;
        while index < size {
            let (bytecode, offset) = self.next()?;
            match bytecode {
                Bytecode::Nop => {}
                Bytecode::Deferred if allow_deferred && index == 1 => {
                    tracing::trace!(target: "otter::snapshot", %object, "Object body deferred");
                    self.deferred.insert(object, (space, size));
                    self.stats.deferred_objects += 1;
                    return Ok(());
                }
                Bytecode::FixedRawData(words) => {
                    index = self.read_raw(object, index, size, words as usize)?;
                }
                Bytecode::VariableRawData => {
                    let words = self.source.get_int()? as usize;
                    index = self.read_raw(object, index, size, words)?;
                }
                Bytecode::VariableRawCode if space == Space::Code => {
                    let words = self.source.get_int()? as usize;
                    index = self.read_raw(object, index, size, words)?;
                }
                Bytecode::VariableRawCode => {
                    return Err(Self::misplaced(bytecode, offset, "outside a code object"));
                }
                Bytecode::FixedRepeat(_) | Bytecode::VariableRepeat => {
                    let count = match bytecode {
                        Bytecode::FixedRepeat(count) => count as usize,
                        _ => decode_variable_repeat_count(self.source.get_int()?) as usize,
                    };
                    if index + count > size {
                        return Err(SnapshotError::ObjectOverflow { object, size });
                    }
                    let (next, next_offset) = self.next()?;
                    let slot = self.read_slot(next, next_offset, Context::Body { object, index, size })?;
                    if matches!(slot, Slot::Unresolved(_)) {
                        return Err(Self::misplaced(next, next_offset, "after a repeat"));
                    }
                    for i in index..index + count {
                        self.allocator.write_slot(object, i, slot)?;
                    }
                    self.stats.repeats += 1;
                    index += count;
                }
                Bytecode::Deferred => {
                    return Err(Self::misplaced(bytecode, offset, "after the first body slot"));
                }
                other => {
                    let slot = self.read_slot(other, offset, Context::Body { object, index, size })?;
                    self.allocator.write_slot(object, index, slot)?;
                    index += 1;
                }
            }
        }
        Ok(())
    }

    fn read_raw(&mut self, object: ObjectId, index: usize, size: usize, words: usize) -> Result<usize> {
        if words > size - index {
            return Err(SnapshotError::ObjectOverflow { object, size });
        }
        for (i, word) in self.source.get_words(words)?.into_iter().enumerate() {
            self.allocator.write_slot(object, index + i, Slot::Raw(word))?;
        }
        self.stats.raw_words += words as u64;
        Ok(index + words)
    }

    /// Next byte at a checkpoint, `None` at end of stream
    fn checkpoint_byte(&mut self) -> Result<(usize, Option<u8>)> {
        let offset = self.source.position();
        let found = self.source.has_more().then(|| self.source.get()).transpose()?;
        Ok((offset, found))
    }

    fn deserialize_deferred(&mut self) -> Result<()> {
        loop {
            let (offset, found) = self.checkpoint_byte()?;
            let header = match found {
                Some(SYNCHRONIZE) => {
                    tracing::trace!(target: "otter::snapshot", offset, "Deferred section complete");
                    return Ok(());
                }
                Some(byte) if !self.deferred.is_empty() => Bytecode::from_byte(byte),
                _ => None,
            };
            let Some(Bytecode::Backref(space)) = header else {
                return Err(SnapshotError::FormatMismatch { offset, found });
            };
            let ordinal = self.source.get_int()?;
            let object = self.backrefs.get(space, ordinal)?;
            let Some((space, size)) = self.deferred.remove(&object) else {
                return Err(SnapshotError::MisplacedBytecode {
                    name: "Backref",
                    offset,
                    context: "to an object that is not deferred",
                });
            };
            self.read_body(object, space, size, false)?;
        }
    }
}

impl<A: Allocator + ?Sized> RootVisitor for Deserializer<'_, A> {
    fn visit_root(&mut self, _tag: SyncTag, index: RootIndex, slot: &mut Slot) -> Result<()> {
        debug_assert_eq!(index.0 as usize, self.root_objects.len());
        let (bytecode, offset) = self.next()?;
        let value = self.read_slot(bytecode, offset, Context::Root)?;
        self.root_objects.push(match value {
            Slot::Strong(object) => Some(object),
            _ => None,
        });
        *slot = value;
        Ok(())
    }

    fn synchronize(&mut self, tag: SyncTag) -> Result<()> {
        let (offset, found) = self.checkpoint_byte()?;
        if found != Some(SYNCHRONIZE) {
            return Err(SnapshotError::FormatMismatch { offset, found });
        }
        tracing::trace!(target: "otter::snapshot", ?tag, offset, "Checkpoint");
        Ok(())
    }
}
