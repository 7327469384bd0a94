//! Snapshot format errors

use thiserror::Error;

/// Errors raised while encoding or decoding the raw snapshot byte format
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Byte outside every defined bytecode range
    #[error("Unknown bytecode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode {
        /// The offending byte
        opcode: u8,
        /// Stream offset of the byte
        offset: usize,
    },

    /// Encoder tried to embed a parameter outside its declared range
    #[error("Parameter {value} out of range for {what}")]
    OutOfRangeParameter {
        /// Which embedding was attempted
        what: &'static str,
        /// The rejected value
        value: u32,
    },

    /// Fewer bytes available than an instruction requires
    #[error("Truncated stream: needed {needed} byte(s) at offset {offset}")]
    TruncatedStream {
        /// Offset where the read started
        offset: usize,
        /// Bytes the read required
        needed: usize,
    },

    /// LEB128 integer does not fit in 32 bits
    #[error("Integer overflow at offset {0}")]
    IntegerOverflow(usize),

    /// Invalid magic bytes in snapshot header
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Snapshot written by an incompatible format version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// Space id outside the six allocation spaces
    #[error("Invalid space id: {0}")]
    InvalidSpace(u8),
}

/// Result type for format operations
pub type Result<T> = std::result::Result<T, FormatError>;
