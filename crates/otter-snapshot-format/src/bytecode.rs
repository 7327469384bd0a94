//! Snapshot bytecodes
//!
//! Every byte value has exactly one meaning: a bytecode (possibly carrying an
//! embedded parameter in its low bits) or a reserved code. Decoding goes
//! through a single 256-entry table built at compile time, so the vocabulary
//! cannot change while a process runs.

use serde::{Deserialize, Serialize};

use crate::encoding::{
    decode_fixed_raw_data_size, decode_fixed_repeat_count, encode_fixed_raw_data_size,
    encode_fixed_repeat, is_fixed_raw_data_size, is_fixed_repeat_count,
};
use crate::error::{FormatError, Result};
use crate::space::{Alignment, NUMBER_OF_SPACES, Space};

// ==================== Region-merged (0x00..0x0f) ====================

/// 0x00..0x05 Allocate new object in the space given by the low bits
pub const NEW_OBJECT: u8 = 0x00;
/// 0x08..0x0d Reference to a previous object of the space given by the low bits
pub const BACKREF: u8 = 0x08;
/// Low bits available to region-merged bytecodes
pub const SPACE_MASK: u8 = 0x07;

// ==================== Single purpose (0x10..0x2a) ====================

/// Object in the startup object cache
pub const STARTUP_OBJECT_CACHE: u8 = 0x10;
/// Root array item addressed by an out-of-band index
pub const ROOT_ARRAY: u8 = 0x11;
/// Object supplied in the attached reference list
pub const ATTACHED_REFERENCE: u8 = 0x12;
/// Object in the read-only object cache
pub const READ_ONLY_OBJECT_CACHE: u8 = 0x13;
/// Padding
pub const NOP: u8 = 0x14;
/// Move to the next reserved chunk of a space
pub const NEXT_CHUNK: u8 = 0x15;
/// Object body follows later in the deferred section
pub const DEFERRED: u8 = 0x16;
/// 0x17..0x19 Alignment prefixes for the next new object
pub const ALIGNMENT_PREFIX: u8 = 0x17;
/// Structural checkpoint; producer and consumer must agree on its position
pub const SYNCHRONIZE: u8 = 0x1a;
/// Repeat with an out-of-band count
pub const VARIABLE_REPEAT: u8 = 0x1b;
/// Off-heap backing store bytes
pub const OFF_HEAP_BACKING_STORE: u8 = 0x1c;
/// Embedder-provided serialization data for an embedder field
pub const EMBEDDER_FIELDS_DATA: u8 = 0x1d;
/// Raw words of a code object, out-of-band length
pub const VARIABLE_RAW_CODE: u8 = 0x1e;
/// Raw words, out-of-band length
pub const VARIABLE_RAW_DATA: u8 = 0x1f;
/// Embedder API reference by index
pub const API_REFERENCE: u8 = 0x20;
/// External reference by index
pub const EXTERNAL_REFERENCE: u8 = 0x21;
/// API reference stored as a sandboxed external pointer
pub const SANDBOXED_API_REFERENCE: u8 = 0x22;
/// External reference stored as a sandboxed external pointer
pub const SANDBOXED_EXTERNAL_REFERENCE: u8 = 0x23;
/// Reference into the holder's own body
pub const INTERNAL_REFERENCE: u8 = 0x24;
/// Weak reference whose target was reclaimed
pub const CLEARED_WEAK_REFERENCE: u8 = 0x25;
/// The following reference is weak
pub const WEAK_PREFIX: u8 = 0x26;
/// Off-heap builtin entry
pub const OFF_HEAP_TARGET: u8 = 0x27;
/// Record the current slot as a pending forward reference
pub const REGISTER_PENDING_FORWARD_REF: u8 = 0x28;
/// Point a pending forward reference at the object just allocated
pub const RESOLVE_PENDING_FORWARD_REF: u8 = 0x29;
/// Allocate the meta map and install it as its own map
pub const NEW_META_MAP: u8 = 0x2a;

// ==================== Parameter ranges (0x40..0x97) ====================

/// 0x40..0x5f First 32 root array items
pub const ROOT_ARRAY_CONSTANTS: u8 = 0x40;
/// Number of root array items with a one-byte form
pub const ROOT_ARRAY_CONSTANTS_COUNT: u8 = 0x20;
/// 0x60..0x7f Raw runs of 1..=32 words
pub const FIXED_RAW_DATA: u8 = 0x60;
/// Number of fixed raw data lengths
pub const FIXED_RAW_DATA_COUNT: u8 = 0x20;
/// 0x80..0x8f Repeats of 2..=17
pub const FIXED_REPEAT: u8 = 0x80;
/// Number of fixed repeat counts
pub const FIXED_REPEAT_COUNT: u8 = 0x10;
/// 0x90..0x97 Hot object slots
pub const HOT_OBJECT: u8 = 0x90;
/// Number of hot object slots
pub const HOT_OBJECT_COUNT: u8 = 8;
/// Number of alignment prefixes
pub const ALIGNMENT_PREFIX_COUNT: u8 = 3;

const _: () = assert!(NEW_OBJECT & SPACE_MASK == 0);
const _: () = assert!(BACKREF & SPACE_MASK == 0);
const _: () = assert!(NUMBER_OF_SPACES <= SPACE_MASK as usize + 1);
const _: () = assert!(HOT_OBJECT_COUNT.is_power_of_two());

/// Merge a space id into a region-merged base bytecode
pub const fn bytecode_with_space(base: u8, space: Space) -> u8 {
    assert!(base & SPACE_MASK == 0, "region-merged base has low bits set");
    base + space.id()
}

/// A decoded snapshot bytecode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bytecode {
    /// Allocate a new object in a space
    NewObject(Space),
    /// Reference an earlier object of a space by ordinal
    Backref(Space),
    /// Startup object cache entry
    StartupObjectCache,
    /// Root array entry by index
    RootArray,
    /// Attached reference by index
    AttachedReference,
    /// Read-only object cache entry
    ReadOnlyObjectCache,
    /// Padding
    Nop,
    /// Advance to the next chunk of a space
    NextChunk,
    /// Body of the current object is deferred
    Deferred,
    /// Alignment of the next new object
    AlignmentPrefix(Alignment),
    /// Synchronization checkpoint
    Synchronize,
    /// Repeat with out-of-band count
    VariableRepeat,
    /// Off-heap backing store
    OffHeapBackingStore,
    /// Embedder field data
    EmbedderFieldsData,
    /// Raw code words with out-of-band length
    VariableRawCode,
    /// Raw data words with out-of-band length
    VariableRawData,
    /// API reference by index
    ApiReference,
    /// External reference by index
    ExternalReference,
    /// Sandboxed API reference by index
    SandboxedApiReference,
    /// Sandboxed external reference by index
    SandboxedExternalReference,
    /// Internal reference by byte offset
    InternalReference,
    /// Cleared weak reference
    ClearedWeakReference,
    /// Weak prefix
    WeakPrefix,
    /// Off-heap builtin target by index
    OffHeapTarget,
    /// Register a pending forward reference
    RegisterPendingForwardRef,
    /// Resolve a pending forward reference
    ResolvePendingForwardRef,
    /// Allocate the meta map
    NewMetaMap,
    /// Root array entry 0..=31
    RootArrayConstant(u8),
    /// Raw run of 1..=32 words
    FixedRawData(u8),
    /// Repeat 2..=17 times
    FixedRepeat(u8),
    /// Hot object slot 0..=7
    HotObject(u8),
}

const fn classify(byte: u8) -> Option<Bytecode> {
    match byte {
        0x00..=0x07 => match Space::from_id(byte & SPACE_MASK) {
            Some(space) => Some(Bytecode::NewObject(space)),
            None => None,
        },
        0x08..=0x0f => match Space::from_id(byte & SPACE_MASK) {
            Some(space) => Some(Bytecode::Backref(space)),
            None => None,
        },
        STARTUP_OBJECT_CACHE => Some(Bytecode::StartupObjectCache),
        ROOT_ARRAY => Some(Bytecode::RootArray),
        ATTACHED_REFERENCE => Some(Bytecode::AttachedReference),
        READ_ONLY_OBJECT_CACHE => Some(Bytecode::ReadOnlyObjectCache),
        NOP => Some(Bytecode::Nop),
        NEXT_CHUNK => Some(Bytecode::NextChunk),
        DEFERRED => Some(Bytecode::Deferred),
        0x17..=0x19 => match Alignment::from_prefix(byte - ALIGNMENT_PREFIX + 1) {
            Some(alignment) => Some(Bytecode::AlignmentPrefix(alignment)),
            None => None,
        },
        SYNCHRONIZE => Some(Bytecode::Synchronize),
        VARIABLE_REPEAT => Some(Bytecode::VariableRepeat),
        OFF_HEAP_BACKING_STORE => Some(Bytecode::OffHeapBackingStore),
        EMBEDDER_FIELDS_DATA => Some(Bytecode::EmbedderFieldsData),
        VARIABLE_RAW_CODE => Some(Bytecode::VariableRawCode),
        VARIABLE_RAW_DATA => Some(Bytecode::VariableRawData),
        API_REFERENCE => Some(Bytecode::ApiReference),
        EXTERNAL_REFERENCE => Some(Bytecode::ExternalReference),
        SANDBOXED_API_REFERENCE => Some(Bytecode::SandboxedApiReference),
        SANDBOXED_EXTERNAL_REFERENCE => Some(Bytecode::SandboxedExternalReference),
        INTERNAL_REFERENCE => Some(Bytecode::InternalReference),
        CLEARED_WEAK_REFERENCE => Some(Bytecode::ClearedWeakReference),
        WEAK_PREFIX => Some(Bytecode::WeakPrefix),
        OFF_HEAP_TARGET => Some(Bytecode::OffHeapTarget),
        REGISTER_PENDING_FORWARD_REF => Some(Bytecode::RegisterPendingForwardRef),
        RESOLVE_PENDING_FORWARD_REF => Some(Bytecode::ResolvePendingForwardRef),
        NEW_META_MAP => Some(Bytecode::NewMetaMap),
        0x40..=0x5f => Some(Bytecode::RootArrayConstant(byte - ROOT_ARRAY_CONSTANTS)),
        0x60..=0x7f => Some(Bytecode::FixedRawData(decode_fixed_raw_data_size(byte) as u8)),
        0x80..=0x8f => Some(Bytecode::FixedRepeat(decode_fixed_repeat_count(byte) as u8)),
        0x90..=0x97 => Some(Bytecode::HotObject(byte - HOT_OBJECT)),
        _ => None,
    }
}

const fn build_table() -> [Option<Bytecode>; 256] {
    let mut table = [None; 256];
    let mut byte = 0;
    while byte < 256 {
        table[byte] = classify(byte as u8);
        byte += 1;
    }
    table
}

/// Process-wide decode table, one entry per byte value
static BYTECODE_TABLE: [Option<Bytecode>; 256] = build_table();

impl Bytecode {
    /// Decode a raw byte, `None` for reserved codes
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        BYTECODE_TABLE[byte as usize]
    }

    /// Whether a byte is reserved (has no meaning in this format version)
    #[inline]
    pub fn is_reserved(byte: u8) -> bool {
        Self::from_byte(byte).is_none()
    }

    /// Encode into a single byte
    pub fn encode(self) -> Result<u8> {
        let byte = match self {
            Self::NewObject(space) => bytecode_with_space(NEW_OBJECT, space),
            Self::Backref(space) => bytecode_with_space(BACKREF, space),
            Self::StartupObjectCache => STARTUP_OBJECT_CACHE,
            Self::RootArray => ROOT_ARRAY,
            Self::AttachedReference => ATTACHED_REFERENCE,
            Self::ReadOnlyObjectCache => READ_ONLY_OBJECT_CACHE,
            Self::Nop => NOP,
            Self::NextChunk => NEXT_CHUNK,
            Self::Deferred => DEFERRED,
            Self::AlignmentPrefix(alignment) => {
                if !alignment.needs_prefix() {
                    return Err(FormatError::OutOfRangeParameter {
                        what: "alignment prefix",
                        value: alignment as u32,
                    });
                }
                ALIGNMENT_PREFIX + alignment as u8 - 1
            }
            Self::Synchronize => SYNCHRONIZE,
            Self::VariableRepeat => VARIABLE_REPEAT,
            Self::OffHeapBackingStore => OFF_HEAP_BACKING_STORE,
            Self::EmbedderFieldsData => EMBEDDER_FIELDS_DATA,
            Self::VariableRawCode => VARIABLE_RAW_CODE,
            Self::VariableRawData => VARIABLE_RAW_DATA,
            Self::ApiReference => API_REFERENCE,
            Self::ExternalReference => EXTERNAL_REFERENCE,
            Self::SandboxedApiReference => SANDBOXED_API_REFERENCE,
            Self::SandboxedExternalReference => SANDBOXED_EXTERNAL_REFERENCE,
            Self::InternalReference => INTERNAL_REFERENCE,
            Self::ClearedWeakReference => CLEARED_WEAK_REFERENCE,
            Self::WeakPrefix => WEAK_PREFIX,
            Self::OffHeapTarget => OFF_HEAP_TARGET,
            Self::RegisterPendingForwardRef => REGISTER_PENDING_FORWARD_REF,
            Self::ResolvePendingForwardRef => RESOLVE_PENDING_FORWARD_REF,
            Self::NewMetaMap => NEW_META_MAP,
            Self::RootArrayConstant(index) => {
                if index >= ROOT_ARRAY_CONSTANTS_COUNT {
                    return Err(FormatError::OutOfRangeParameter {
                        what: "root array constant",
                        value: index as u32,
                    });
                }
                ROOT_ARRAY_CONSTANTS + index
            }
            Self::FixedRawData(size) => {
                if !is_fixed_raw_data_size(size as u32) {
                    return Err(FormatError::OutOfRangeParameter {
                        what: "fixed raw data",
                        value: size as u32,
                    });
                }
                encode_fixed_raw_data_size(size as u32)
            }
            Self::FixedRepeat(count) => {
                if !is_fixed_repeat_count(count as u32) {
                    return Err(FormatError::OutOfRangeParameter {
                        what: "fixed repeat",
                        value: count as u32,
                    });
                }
                encode_fixed_repeat(count as u32)
            }
            Self::HotObject(index) => {
                if index >= HOT_OBJECT_COUNT {
                    return Err(FormatError::OutOfRangeParameter {
                        what: "hot object",
                        value: index as u32,
                    });
                }
                HOT_OBJECT + index
            }
        };
        Ok(byte)
    }

    /// Get the name of this bytecode
    pub const fn name(self) -> &'static str {
        match self {
            Self::NewObject(_) => "NewObject",
            Self::Backref(_) => "Backref",
            Self::StartupObjectCache => "StartupObjectCache",
            Self::RootArray => "RootArray",
            Self::AttachedReference => "AttachedReference",
            Self::ReadOnlyObjectCache => "ReadOnlyObjectCache",
            Self::Nop => "Nop",
            Self::NextChunk => "NextChunk",
            Self::Deferred => "Deferred",
            Self::AlignmentPrefix(_) => "AlignmentPrefix",
            Self::Synchronize => "Synchronize",
            Self::VariableRepeat => "VariableRepeat",
            Self::OffHeapBackingStore => "OffHeapBackingStore",
            Self::EmbedderFieldsData => "EmbedderFieldsData",
            Self::VariableRawCode => "VariableRawCode",
            Self::VariableRawData => "VariableRawData",
            Self::ApiReference => "ApiReference",
            Self::ExternalReference => "ExternalReference",
            Self::SandboxedApiReference => "SandboxedApiReference",
            Self::SandboxedExternalReference => "SandboxedExternalReference",
            Self::InternalReference => "InternalReference",
            Self::ClearedWeakReference => "ClearedWeakReference",
            Self::WeakPrefix => "WeakPrefix",
            Self::OffHeapTarget => "OffHeapTarget",
            Self::RegisterPendingForwardRef => "RegisterPendingForwardRef",
            Self::ResolvePendingForwardRef => "ResolvePendingForwardRef",
            Self::NewMetaMap => "NewMetaMap",
            Self::RootArrayConstant(_) => "RootArrayConstant",
            Self::FixedRawData(_) => "FixedRawData",
            Self::FixedRepeat(_) => "FixedRepeat",
            Self::HotObject(_) => "HotObject",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_merged_bytecodes() {
        assert_eq!(Bytecode::NewObject(Space::Old).encode(), Ok(0x02));
        assert_eq!(Bytecode::Backref(Space::LargeObject).encode(), Ok(0x0d));
        assert_eq!(Bytecode::from_byte(0x04), Some(Bytecode::NewObject(Space::Map)));
        assert_eq!(Bytecode::from_byte(0x0b), Some(Bytecode::Backref(Space::Code)));
    }

    #[test]
    fn test_reserved_region_slots() {
        for byte in [0x06, 0x07, 0x0e, 0x0f] {
            assert!(Bytecode::is_reserved(byte));
        }
    }

    #[test]
    fn test_single_purpose_block() {
        assert_eq!(Bytecode::from_byte(0x1a), Some(Bytecode::Synchronize));
        assert_eq!(Bytecode::from_byte(0x2a), Some(Bytecode::NewMetaMap));
        assert_eq!(
            Bytecode::from_byte(0x18),
            Some(Bytecode::AlignmentPrefix(Alignment::DoubleUnaligned))
        );
        assert!(Bytecode::is_reserved(0x2b));
    }

    #[test]
    fn test_out_of_range_parameters() {
        assert!(matches!(
            Bytecode::HotObject(8).encode(),
            Err(FormatError::OutOfRangeParameter { what: "hot object", value: 8 })
        ));
        assert!(Bytecode::RootArrayConstant(32).encode().is_err());
        assert!(Bytecode::FixedRawData(0).encode().is_err());
        assert!(Bytecode::FixedRawData(33).encode().is_err());
        assert!(Bytecode::FixedRepeat(18).encode().is_err());
        assert!(Bytecode::AlignmentPrefix(Alignment::Tagged).encode().is_err());
    }

    #[test]
    #[should_panic(expected = "region-merged base has low bits set")]
    fn test_bytecode_with_space_rejects_unaligned_base() {
        bytecode_with_space(0x11, Space::Old);
    }

    #[test]
    fn test_bytecode_name() {
        assert_eq!(Bytecode::HotObject(3).name(), "HotObject");
        assert_eq!(Bytecode::NewMetaMap.name(), "NewMetaMap");
    }
}
