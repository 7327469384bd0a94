//! Snapshot errors
//!
//! Every error is fatal to the current session. A snapshot that fails to
//! load is discarded as a whole; nothing is retried or repaired.

use otter_snapshot_format::{FormatError, Space};
use thiserror::Error;

use crate::heap::{Address, ObjectId};

/// Errors that can occur while serializing or deserializing a snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Byte-level format error
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Synchronization marker missing or misplaced; the snapshot was built
    /// for a different version or configuration
    #[error(
        "Format mismatch at offset {offset}: expected synchronization marker, found {}",
        describe_byte(.found)
    )]
    FormatMismatch {
        /// Stream offset of the checkpoint
        offset: usize,
        /// Byte found instead of the marker, `None` at end of stream
        found: Option<u8>,
    },

    /// Known bytecode at a position where it has no meaning
    #[error("Bytecode {name} not allowed {context} (offset {offset})")]
    MisplacedBytecode {
        /// Bytecode name
        name: &'static str,
        /// Stream offset
        offset: usize,
        /// Where it was found
        context: &'static str,
    },

    /// Forward reference still open at stream end, or read before resolution
    #[error("Unresolved forward reference {0}")]
    UnresolvedForwardReference(u32),

    /// Resolution without a matching open registration
    #[error("Forward reference {0} resolved without an open registration")]
    DoubleOrMissingResolution(u32),

    /// External, API or off-heap index without a table entry
    #[error("{kind} index {index} out of range")]
    ExternalIndexOutOfRange {
        /// Which table was consulted
        kind: &'static str,
        /// The missing index
        index: u32,
    },

    /// External address the encoder cannot find in its table
    #[error("Unknown external reference 0x{0:x}")]
    UnknownExternalReference(Address),

    /// Reference to an object that this session cannot address
    #[error("{kind} reference {index} out of range")]
    ReferenceOutOfRange {
        /// Addressing scheme used
        kind: &'static str,
        /// The missing index or ordinal
        index: u32,
    },

    /// Body data runs past the end of its object
    #[error("Object {object} overflows its {size} slots")]
    ObjectOverflow {
        /// The object being filled
        object: ObjectId,
        /// Its size in slots
        size: usize,
    },

    /// Object size that no allocation can satisfy
    #[error("Invalid object size {size} at offset {offset}")]
    InvalidObjectSize {
        /// Size read from the stream
        size: usize,
        /// Stream offset of the header
        offset: usize,
    },

    /// Allocation does not fit the current chunk of its space
    #[error("Chunk overflow in {space:?} space: {size} slots")]
    ChunkOverflow {
        /// Space of the allocation
        space: Space,
        /// Requested size in slots
        size: usize,
    },

    /// Objects nested deeper than the decoder allows
    #[error("Object nesting exceeds {limit} levels at offset {offset}")]
    NestingTooDeep {
        /// Configured nesting limit
        limit: usize,
        /// Stream offset of the header that exceeded it
        offset: usize,
    },

    /// Deferred object whose body never arrived
    #[error("Object {0} is incomplete")]
    IncompleteObject(ObjectId),

    /// Object graph shape the format cannot express
    #[error("Cannot serialize object {object:?}: {reason}")]
    Unserializable {
        /// Offending object, if the problem is tied to one
        object: Option<ObjectId>,
        /// What is wrong
        reason: &'static str,
    },

    /// Embedder callback rejected its serialized data
    #[error("Invalid embedder field data")]
    InvalidEmbedderData,

    /// Allocation capability refused a placement
    #[error("Allocation of {size} slots in {space:?} space failed")]
    AllocationFailed {
        /// Requested space
        space: Space,
        /// Requested size in slots
        size: usize,
    },

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Config(String),
}

fn describe_byte(found: &Option<u8>) -> String {
    match found {
        Some(byte) => format!("0x{byte:02x}"),
        None => "end of stream".to_string(),
    }
}

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, SnapshotError>;
